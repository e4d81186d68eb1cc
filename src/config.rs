//! Configuration for standing-circle

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("standing-circle")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage directory for the circle database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Origin used when deriving share URLs
    #[serde(default = "default_public_origin")]
    pub public_origin: String,

    /// Maximum retained position history entries (0 = full audit trail)
    #[serde(default)]
    pub history_retention: usize,

    /// Broadcast channel capacity for the live feed
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_http_port() -> u16 {
    8094
}

fn default_public_origin() -> String {
    "http://localhost:8094".to_string()
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            public_origin: default_public_origin(),
            history_retention: 0,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get circle database path
    pub fn circles_db_path(&self) -> PathBuf {
        self.storage_dir.join("circles.sled")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: Config = toml::from_str("http_port = 9000").unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.history_retention, 0);
        assert_eq!(config.channel_capacity, 256);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config {
            http_port: 8100,
            public_origin: "https://circle.example.org".to_string(),
            history_retention: 500,
            ..Default::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.http_port, 8100);
        assert_eq!(back.public_origin, "https://circle.example.org");
        assert_eq!(back.history_retention, 500);
    }
}
