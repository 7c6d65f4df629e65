//! GrantCraft Settings
//!
//! Configuration for the grant service and CLI.
//!
//! ## Features
//!
//! - Ledger connection (mock or live node)
//! - Verifier and faucet policy thresholds
//! - Gas and retry timing
//! - JSON file storage with `GRANTCRAFT_*` environment overrides
//!
//! ## Usage
//!
//! ```no_run
//! use grantcraft_settings::Settings;
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.apply_env_overrides()?;
//! settings.validate()?;
//! # Ok::<(), grantcraft_settings::SettingsError>(())
//! ```

mod config;

pub use config::{
    AuthSettings, FaucetSettings, GasSettings, LedgerSettings, ServerSettings, Settings,
    TimingSettings, VerifierSettings,
};

use std::path::PathBuf;

use thiserror::Error;

/// Environment variable naming an alternative settings file
pub const SETTINGS_PATH_ENV: &str = "GRANTCRAFT_CONFIG";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("grantcraft.json"))
}
