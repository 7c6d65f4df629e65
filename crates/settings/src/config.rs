//! Configuration types

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use grantcraft_core::{Address, Amount, GIB};
use grantcraft_ledger::{LedgerConfig, LedgerMode};

use crate::{default_settings_path, Result, SettingsError};

const DAY_SECS: u64 = 24 * 60 * 60;

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,

    /// DataCap allocation policy
    #[serde(default)]
    pub verifier: VerifierSettings,

    /// Faucet payout policy
    #[serde(default)]
    pub faucet: FaucetSettings,

    #[serde(default)]
    pub gas: GasSettings,

    #[serde(default)]
    pub timing: TimingSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.to_path_buf());
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            let mut settings = Self::default();
            settings.config_path = Some(path.to_path_buf());
            Ok(settings)
        }
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Apply `GRANTCRAFT_*` variables from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GRANTCRAFT_LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Some(v) = lookup("GRANTCRAFT_LEDGER_MODE") {
            self.ledger.mode = match v.to_ascii_lowercase().as_str() {
                "mock" => LedgerMode::Mock,
                "live" => LedgerMode::Live,
                _ => return Err(invalid("GRANTCRAFT_LEDGER_MODE", &v)),
            };
        }
        if let Some(v) = lookup("GRANTCRAFT_RPC_URL") {
            self.ledger.rpc_url = v;
        }
        if let Some(v) = lookup("GRANTCRAFT_API_TOKEN") {
            self.ledger.api_token = Some(v);
        }
        if let Some(v) = lookup("GRANTCRAFT_VERIFIER_ADDRESS") {
            let address = Address::parse(&v).map_err(|_| invalid("GRANTCRAFT_VERIFIER_ADDRESS", &v))?;
            self.verifier.verifier_address = Some(address);
        }
        if let Some(v) = lookup("GRANTCRAFT_FAUCET_ADDRESS") {
            let address = Address::parse(&v).map_err(|_| invalid("GRANTCRAFT_FAUCET_ADDRESS", &v))?;
            self.faucet.faucet_address = Some(address);
        }
        if let Some(v) = lookup("GRANTCRAFT_JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        Ok(())
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.verifier.verifier_address.is_none() {
            return Err(SettingsError::Invalid("verifier.verifier_address is required".to_string()));
        }
        if self.gas.multiple == 0 {
            return Err(SettingsError::Invalid("gas.multiple must be at least 1".to_string()));
        }
        if self.timing.retry_factor.is_nan() || self.timing.retry_factor < 1.0 {
            return Err(SettingsError::Invalid("timing.retry_factor must be >= 1".to_string()));
        }
        if self.timing.retry_initial_secs == 0 {
            return Err(SettingsError::Invalid("timing.retry_initial_secs must be positive".to_string()));
        }
        if self.ledger.mode == LedgerMode::Live && self.auth.jwt_secret.is_empty() {
            return Err(SettingsError::Invalid("auth.jwt_secret is required in live mode".to_string()));
        }
        Ok(())
    }

    /// Path these settings were loaded from, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

fn invalid(key: &str, value: &str) -> SettingsError {
    SettingsError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Ledger node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default)]
    pub mode: LedgerMode,

    /// JSON-RPC endpoint (live mode only)
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    #[serde(default)]
    pub api_token: Option<String>,

    /// Confirmations to wait for before a message counts as settled
    #[serde(default = "default_confidence")]
    pub confidence: u64,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:1234/rpc/v0".to_string()
}

fn default_confidence() -> u64 {
    5
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            mode: LedgerMode::default(),
            rpc_url: default_rpc_url(),
            api_token: None,
            confidence: default_confidence(),
        }
    }
}

impl LedgerSettings {
    pub fn client_config(&self) -> LedgerConfig {
        match self.mode {
            LedgerMode::Mock => LedgerConfig::mock(),
            LedgerMode::Live => LedgerConfig::live(self.rpc_url.clone(), self.api_token.clone()),
        }
    }
}

/// Verified DataCap allocation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierSettings {
    /// Address that signs allocations
    #[serde(default)]
    pub verifier_address: Option<Address>,

    /// Target DataCap per client; allocations top up to this amount
    #[serde(default = "default_max_allowance")]
    pub max_allowance_bytes: Amount,

    #[serde(default = "default_verifier_min_age")]
    pub min_account_age_days: u64,

    #[serde(default = "default_cooldown_days")]
    pub cooldown_days: u64,
}

fn default_max_allowance() -> Amount {
    Amount(32 * GIB)
}

fn default_verifier_min_age() -> u64 {
    30
}

fn default_cooldown_days() -> u64 {
    30
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            verifier_address: None,
            max_allowance_bytes: default_max_allowance(),
            min_account_age_days: default_verifier_min_age(),
            cooldown_days: default_cooldown_days(),
        }
    }
}

impl VerifierSettings {
    pub fn min_account_age(&self) -> Duration {
        Duration::from_secs(self.min_account_age_days * DAY_SECS)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_days * DAY_SECS)
    }
}

/// Faucet payout policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaucetSettings {
    /// Paying address; the node's default wallet when unset
    #[serde(default)]
    pub faucet_address: Option<Address>,

    #[serde(default = "default_faucet_min_age")]
    pub min_account_age_days: u64,

    /// Minimum interval between repeat miner grants
    #[serde(default = "default_rate_limit_hours")]
    pub rate_limit_hours: u64,

    /// Grant for non-miners and first-time miners
    #[serde(default = "default_base_rate")]
    pub base_rate: Amount,

    /// Floor for repeat miner grants
    #[serde(default = "default_min_grant")]
    pub min_grant: Amount,
}

fn default_faucet_min_age() -> u64 {
    7
}

fn default_rate_limit_hours() -> u64 {
    24
}

fn default_base_rate() -> Amount {
    Amount(100)
}

fn default_min_grant() -> Amount {
    Amount(1)
}

impl Default for FaucetSettings {
    fn default() -> Self {
        Self {
            faucet_address: None,
            min_account_age_days: default_faucet_min_age(),
            rate_limit_hours: default_rate_limit_hours(),
            base_rate: default_base_rate(),
            min_grant: default_min_grant(),
        }
    }
}

impl FaucetSettings {
    pub fn min_account_age(&self) -> Duration {
        Duration::from_secs(self.min_account_age_days * DAY_SECS)
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_secs(self.rate_limit_hours * 60 * 60)
    }
}

/// Gas estimation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasSettings {
    /// Safety multiple applied to both gas estimates
    #[serde(default = "default_gas_multiple")]
    pub multiple: u64,
}

fn default_gas_multiple() -> u64 {
    2
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            multiple: default_gas_multiple(),
        }
    }
}

/// Retry and deadline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "default_retry_initial")]
    pub retry_initial_secs: u64,

    #[serde(default = "default_retry_factor")]
    pub retry_factor: f64,

    /// Deadline for the capacity/power reads and gas estimates
    #[serde(default = "default_quote_deadline")]
    pub quote_deadline_secs: u64,

    /// Deadline for pushing the message
    #[serde(default = "default_submit_deadline")]
    pub submit_deadline_secs: u64,

    /// Deadline for observing the message's outcome
    #[serde(default = "default_settlement_timeout")]
    pub settlement_timeout_secs: u64,
}

fn default_retry_initial() -> u64 {
    5
}

fn default_retry_factor() -> f64 {
    1.5
}

fn default_quote_deadline() -> u64 {
    120
}

fn default_submit_deadline() -> u64 {
    600
}

fn default_settlement_timeout() -> u64 {
    600
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            retry_initial_secs: default_retry_initial(),
            retry_factor: default_retry_factor(),
            quote_deadline_secs: default_quote_deadline(),
            submit_deadline_secs: default_submit_deadline(),
            settlement_timeout_secs: default_settlement_timeout(),
        }
    }
}

impl TimingSettings {
    pub fn retry_initial(&self) -> Duration {
        Duration::from_secs(self.retry_initial_secs)
    }

    pub fn quote_deadline(&self) -> Duration {
        Duration::from_secs(self.quote_deadline_secs)
    }

    pub fn submit_deadline(&self) -> Duration {
        Duration::from_secs(self.submit_deadline_secs)
    }

    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement_timeout_secs)
    }
}

/// Bearer token settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    /// HS256 signing secret
    #[serde(default)]
    pub jwt_secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> Settings {
        let mut settings = Settings::default();
        settings.verifier.verifier_address = Some(Address::parse("f0100").unwrap());
        settings
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(settings.ledger.mode, LedgerMode::Mock);
        assert_eq!(settings.ledger.confidence, 5);
        assert_eq!(settings.verifier.min_account_age_days, 30);
        assert_eq!(settings.verifier.cooldown_days, 30);
        assert_eq!(settings.faucet.min_account_age_days, 7);
        assert_eq!(settings.faucet.rate_limit_hours, 24);
        assert_eq!(settings.gas.multiple, 2);
        assert_eq!(settings.timing.retry_initial(), Duration::from_secs(5));
        assert_eq!(settings.timing.settlement_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let json = r#"{ "verifier": { "verifier_address": "t01001", "cooldown_days": 7 } }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.verifier.cooldown(), Duration::from_secs(7 * DAY_SECS));
        assert_eq!(settings.verifier.min_account_age_days, 30);
        assert_eq!(settings.verifier.verifier_address.unwrap().to_string(), "t01001");
        assert_eq!(settings.faucet.base_rate, default_base_rate());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("grantcraft.json");

        let mut settings = valid();
        settings.faucet.min_grant = Amount(42);
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.faucet.min_grant, Amount(42));
        assert_eq!(loaded.config_path(), Some(path.as_path()));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.gas.multiple, 2);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GRANTCRAFT_LEDGER_MODE", "LIVE"),
            ("GRANTCRAFT_RPC_URL", "http://node:1234/rpc/v0"),
            ("GRANTCRAFT_FAUCET_ADDRESS", "f0200"),
            ("GRANTCRAFT_JWT_SECRET", "s3cret"),
        ]
        .into_iter()
        .collect();

        let mut settings = valid();
        settings
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.ledger.mode, LedgerMode::Live);
        assert_eq!(settings.ledger.client_config().rpc_url, "http://node:1234/rpc/v0");
        assert_eq!(settings.faucet.faucet_address.unwrap().to_string(), "f0200");
        assert_eq!(settings.auth.jwt_secret, "s3cret");
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut settings = valid();
        let err = settings
            .apply_overrides(|key| (key == "GRANTCRAFT_VERIFIER_ADDRESS").then(|| "nope".to_string()))
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidOverride { .. }));
    }

    #[test]
    fn test_validate() {
        assert!(Settings::default().validate().is_err());
        assert!(valid().validate().is_ok());

        let mut settings = valid();
        settings.gas.multiple = 0;
        assert!(settings.validate().is_err());

        let mut settings = valid();
        settings.timing.retry_factor = 0.5;
        assert!(settings.validate().is_err());

        let mut settings = valid();
        settings.ledger.mode = LedgerMode::Live;
        assert!(settings.validate().is_err());
        settings.auth.jwt_secret = "s3cret".to_string();
        assert!(settings.validate().is_ok());
    }
}
