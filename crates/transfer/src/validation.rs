use std::path::{Component, Path};

use crate::TransferError;

/// Reduces an incoming file name to a single safe path component.
///
/// The name comes from the remote peer, so directory parts are stripped
/// and anything that would resolve outside the output directory is
/// rejected:
/// - empty names
/// - `.` and `..`
/// - Windows prefixes (`C:`, `\\server`)
pub fn sanitize_file_name(name: &str) -> Result<String, TransferError> {
    let normalized = name.replace('\\', "/");
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        return Err(TransferError::InvalidPath("empty name".into()));
    }

    let mut last = None;
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => last = Some(part),
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {name}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {name}"
                )));
            }
            Component::RootDir | Component::CurDir => {}
        }
    }

    let last = last
        .and_then(|part| part.to_str())
        .map(|part| part.trim_matches(|c: char| c.is_control()))
        .filter(|part| !part.is_empty())
        .ok_or_else(|| TransferError::InvalidPath(format!("no file name in {name:?}")))?;
    Ok(last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("   ").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(sanitize_file_name("../../../etc/passwd").is_err());
        assert!(sanitize_file_name("..").is_err());
    }

    #[test]
    fn rejects_windows_style_traversal() {
        assert!(sanitize_file_name("..\\..\\evil.exe").is_err());
    }

    #[test]
    fn strips_directories() {
        assert_eq!(sanitize_file_name("/tmp/report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_file_name("sub/dir/file.txt").unwrap(), "file.txt");
        assert_eq!(sanitize_file_name("./notes.md").unwrap(), "notes.md");
    }

    #[test]
    fn keeps_plain_names_and_dotfiles() {
        assert_eq!(sanitize_file_name("a.bin").unwrap(), "a.bin");
        assert_eq!(sanitize_file_name(".bashrc").unwrap(), ".bashrc");
    }

    #[test]
    fn rejects_bare_root() {
        assert!(sanitize_file_name("/").is_err());
        assert!(sanitize_file_name(".").is_err());
    }
}
