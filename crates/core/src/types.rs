use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{CoreError, Result};

/// Bytes in one gibibyte
pub const GIB: u128 = 1 << 30;

/// Non-negative ledger quantity.
///
/// Used for both DataCap (bytes) and token balances (atto units). Serialized
/// as a decimal string, which is how the ledger's JSON API encodes big integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn new(value: u128) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `self - other`, or `None` when the result would be negative
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_mul(self, factor: u64) -> Amount {
        Amount(self.0.saturating_mul(factor as u128))
    }

    /// Big-endian magnitude with a leading sign byte; zero encodes as empty.
    pub fn to_signed_bytes(&self) -> Vec<u8> {
        if self.0 == 0 {
            return Vec::new();
        }
        let be = self.0.to_be_bytes();
        let first = be.iter().position(|&b| b != 0).unwrap_or(be.len());
        let mut out = Vec::with_capacity(1 + be.len() - first);
        out.push(0);
        out.extend_from_slice(&be[first..]);
        out
    }

    /// Inverse of [`Amount::to_signed_bytes`]. Negative or oversized values
    /// are rejected.
    pub fn from_signed_bytes(bytes: &[u8]) -> Result<Self> {
        let invalid = || CoreError::InvalidAmount(format!("{:02x?}", bytes));
        let Some((&sign, magnitude)) = bytes.split_first() else {
            return Ok(Amount::ZERO);
        };
        if sign != 0 {
            return Err(invalid());
        }
        let magnitude = match magnitude.iter().position(|&b| b != 0) {
            Some(first) => &magnitude[first..],
            None => return Ok(Amount::ZERO),
        };
        if magnitude.len() > 16 {
            return Err(invalid());
        }
        let mut be = [0u8; 16];
        be[16 - magnitude.len()..].copy_from_slice(magnitude);
        Ok(Amount(u128::from_be_bytes(be)))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u128>()
            .map(Amount)
            .map_err(|_| CoreError::InvalidAmount(s.to_string()))
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Amount(value)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Repr::Number(n) => Ok(Amount(n as u128)),
        }
    }
}

/// Content-addressed reference to a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(pub String);

impl TxRef {
    pub fn new(cid: impl Into<String>) -> Self {
        Self(cid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a tipset. The empty key means "current head".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TipSetKey(pub Vec<String>);

impl TipSetKey {
    pub fn head() -> Self {
        Self(Vec::new())
    }

    pub fn is_head(&self) -> bool {
        self.0.is_empty()
    }
}

/// Stable identifier of an authenticated subject
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier for a newly created record
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lock domain on a subject record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockName {
    /// Verified-account DataCap allocation
    Verifier,
    /// Faucet payout
    Faucet,
}

impl LockName {
    pub const ALL: [LockName; 2] = [LockName::Verifier, LockName::Faucet];

    pub fn as_str(&self) -> &'static str {
        match self {
            LockName::Verifier => "verifier",
            LockName::Faucet => "faucet",
        }
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "verifier" => Ok(LockName::Verifier),
            "faucet" => Ok(LockName::Faucet),
            _ => Err(CoreError::UnknownLock(s.to_string())),
        }
    }
}

/// Identity provider an external account was linked through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    GitHub,
    Google,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::Google => "google",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(Provider::GitHub),
            "google" => Ok(Provider::Google),
            _ => Err(CoreError::UnsupportedProvider(s.to_string())),
        }
    }
}

/// Metadata of an account linked through a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountData {
    /// Provider-side unique identifier
    pub unique_id: String,
    /// Display name
    pub username: String,
    /// When the provider account was created
    pub created_at: DateTime<Utc>,
}
