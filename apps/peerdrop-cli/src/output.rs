//! Terminal output and saving received files.

use std::io::Write;
use std::path::{Path, PathBuf};

use peerdrop_transfer::{ReceivedFile, TransferProgress, sanitize_file_name};

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn progress_line(p: &TransferProgress) {
    let eta = p
        .eta
        .map(|d| format!(", {}s left", d.as_secs()))
        .unwrap_or_default();
    print!(
        "\r{}: {:5.1}% at {}/s{eta}   ",
        p.name,
        p.percent(),
        human_bytes(p.bytes_per_second as u64)
    );
    if p.bytes >= p.total {
        println!();
    }
    let _ = std::io::stdout().flush();
}

/// Writes `file` into `dir` under its sanitized name, never overwriting:
/// `name.ext` becomes `name (1).ext` and so on.
pub async fn write_received(dir: &Path, file: &ReceivedFile) -> anyhow::Result<PathBuf> {
    let name = sanitize_file_name(&file.meta.name)?;
    let path = unique_path(dir, &name);
    tokio::fs::write(&path, &file.data).await?;
    Ok(path)
}

fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (name, String::new()),
    };
    (1..)
        .map(|n| dir.join(format!("{stem} ({n}){ext}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
