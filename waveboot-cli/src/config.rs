//! Configuration file support for waveboot.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (WAVEBOOT_*)
//! 3. Local config file (./waveboot.toml)
//! 4. Global config file (~/.config/waveboot/config.toml)
//!
//! `--config <PATH>` replaces 3 and 4.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use waveboot::TransferConfig;

/// Name of the per-project config file.
pub const LOCAL_CONFIG_FILE: &str = "waveboot.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port of the programmer bridge (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Bridge baud rate.
    pub baud: Option<u32>,
}

/// Programming defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramConfig {
    /// Reset code of the target node.
    pub reset_code: Option<String>,
    /// Attempts per line.
    pub attempts: Option<u32>,
    /// Per-attempt acknowledgment timeout in milliseconds.
    pub ack_timeout_ms: Option<u64>,
    /// Wait for the ready token, in seconds.
    pub handshake_timeout_secs: Option<u64>,
    /// Leave record checks to the bootloader.
    #[serde(default)]
    pub skip_verify: bool,
}

impl ProgramConfig {
    /// Transfer settings with every configured value applied over the defaults.
    pub fn transfer_config(&self) -> TransferConfig {
        let mut config = TransferConfig::default().with_verify_records(!self.skip_verify);
        if let Some(attempts) = self.attempts {
            config = config.with_max_attempts(attempts);
        }
        if let Some(ms) = self.ack_timeout_ms {
            config = config.with_attempt_timeout(Duration::from_millis(ms));
        }
        if let Some(secs) = self.handshake_timeout_secs {
            config = config.with_handshake_timeout(Duration::from_secs(secs));
        }
        config
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Programming defaults.
    #[serde(default)]
    pub program: ProgramConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "waveboot").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        if other.program.reset_code.is_some() {
            self.program.reset_code = other.program.reset_code;
        }
        if other.program.attempts.is_some() {
            self.program.attempts = other.program.attempts;
        }
        if other.program.ack_timeout_ms.is_some() {
            self.program.ack_timeout_ms = other.program.ack_timeout_ms;
        }
        if other.program.handshake_timeout_secs.is_some() {
            self.program.handshake_timeout_secs = other.program.handshake_timeout_secs;
        }
        if other.program.skip_verify {
            self.program.skip_verify = true;
        }
    }
}
