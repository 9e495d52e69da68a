//! Peer configuration.
//!
//! Reads/writes TOML at `~/.config/peerdrop/peer.toml`. Environment
//! variables override the file, command-line flags override both.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use peerdrop_negotiation::IceServerConfig;
use peerdrop_protocol::TransferConfig;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8080";

pub const ENV_RELAY_URL: &str = "PEERDROP_RELAY_URL";
pub const ENV_STORE_DIR: &str = "PEERDROP_STORE_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// WebSocket URL of the signaling relay.
    pub relay_url: String,
    /// Where incoming chunks are spooled before reassembly.
    pub store_dir: PathBuf,
    pub ice_servers: Vec<IceServerConfig>,
    pub transfer: TransferConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.into(),
            store_dir: std::env::temp_dir().join("peerdrop-chunks"),
            ice_servers: IceServerConfig::default_servers(),
            transfer: TransferConfig::default(),
        }
    }
}

impl PeerConfig {
    /// Loads `path` (or the default location), writing defaults on first
    /// run, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => config_file_path(),
        };
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.transfer.validate()?;
        Ok(config)
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            if let Err(e) = config.save(path) {
                tracing::warn!(path = %path.display(), "could not write default config: {e}");
            }
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        match toml::from_str::<Self>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to parse config, using defaults: {e}");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_RELAY_URL).filter(|v| !v.is_empty()) {
            self.relay_url = url;
        }
        if let Some(dir) = lookup(ENV_STORE_DIR).filter(|v| !v.is_empty()) {
            self.store_dir = PathBuf::from(dir);
        }
    }
}

fn config_file_path() -> PathBuf {
    config_base_dir().join("peerdrop").join("peer.toml")
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}
