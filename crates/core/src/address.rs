//! Ledger addresses
//!
//! Addresses use the Filecoin textual form: a network prefix (`f` mainnet,
//! `t` testnet), a protocol digit, and a protocol-specific payload. Hashed,
//! key and delegated payloads carry a 4-byte blake2b checksum over the binary
//! form of the address; parsing rejects any address whose checksum does not
//! match or whose base32 text is not canonical.

use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{CoreError, Result};

/// Checksum length appended to hashed payloads
const CHECKSUM_LEN: usize = 4;

/// Secp256k1 and actor payloads are 20-byte hashes
const HASH_LEN: usize = 20;

/// BLS public key length
const BLS_KEY_LEN: usize = 48;

/// Maximum delegated sub-address length
const MAX_SUBADDRESS_LEN: usize = 54;

/// Network an address belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    fn prefix(&self) -> char {
        match self {
            Network::Mainnet => 'f',
            Network::Testnet => 't',
        }
    }
}

/// Address protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    /// Numeric actor ID
    Id = 0,
    /// Hash of a secp256k1 public key
    Secp256k1 = 1,
    /// Hash of actor constructor data
    Actor = 2,
    /// BLS public key
    Bls = 3,
    /// Namespaced sub-address
    Delegated = 4,
}

impl Protocol {
    fn from_digit(c: char) -> Option<Self> {
        c.to_digit(10)
            .and_then(|d| u8::try_from(d).ok())
            .and_then(Self::from_byte)
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Protocol::Id),
            1 => Some(Protocol::Secp256k1),
            2 => Some(Protocol::Actor),
            3 => Some(Protocol::Bls),
            4 => Some(Protocol::Delegated),
            _ => None,
        }
    }

    /// Expected raw payload length for hash and key protocols
    fn key_len(&self) -> Option<usize> {
        match self {
            Protocol::Secp256k1 | Protocol::Actor => Some(HASH_LEN),
            Protocol::Bls => Some(BLS_KEY_LEN),
            Protocol::Id | Protocol::Delegated => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Payload {
    Id(u64),
    Key(Vec<u8>),
    Delegated { namespace: u64, sub: Vec<u8> },
}

/// A validated ledger address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    network: Network,
    protocol: Protocol,
    payload: Payload,
}

impl Address {
    /// Parse and validate an address string
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidAddress(s.to_string());

        let mut chars = s.chars();
        let network = match chars.next() {
            Some('f') => Network::Mainnet,
            Some('t') => Network::Testnet,
            _ => return Err(invalid()),
        };
        let protocol = chars.next().and_then(Protocol::from_digit).ok_or_else(invalid)?;
        let text = chars.as_str();

        let (payload, checksum) = match protocol {
            Protocol::Id => (Payload::Id(parse_id(text).ok_or_else(invalid)?), None),
            Protocol::Delegated => {
                let (namespace, sub) = text.split_once('f').ok_or_else(invalid)?;
                let namespace = parse_id(namespace).ok_or_else(invalid)?;
                let (sub, checksum) = split_checksum(sub).ok_or_else(invalid)?;
                if sub.len() > MAX_SUBADDRESS_LEN {
                    return Err(invalid());
                }
                (Payload::Delegated { namespace, sub }, Some(checksum))
            }
            _ => {
                let (key, checksum) = split_checksum(text).ok_or_else(invalid)?;
                if Some(key.len()) != protocol.key_len() {
                    return Err(invalid());
                }
                (Payload::Key(key), Some(checksum))
            }
        };

        let address = Self {
            network,
            protocol,
            payload,
        };
        if let Some(checksum) = checksum {
            if checksum != address.checksum() {
                return Err(invalid());
            }
        }
        Ok(address)
    }

    /// Decode the binary form produced by [`Address::to_bytes`]
    pub fn from_bytes(network: Network, bytes: &[u8]) -> Result<Self> {
        let invalid = || CoreError::InvalidAddress(format!("{:02x?}", bytes));

        let (&first, rest) = bytes.split_first().ok_or_else(invalid)?;
        let protocol = Protocol::from_byte(first).ok_or_else(invalid)?;

        let payload = match protocol {
            Protocol::Id => {
                let (id, tail) = unsigned_varint::decode::u64(rest).map_err(|_| invalid())?;
                if !tail.is_empty() {
                    return Err(invalid());
                }
                Payload::Id(id)
            }
            Protocol::Delegated => {
                let (namespace, sub) =
                    unsigned_varint::decode::u64(rest).map_err(|_| invalid())?;
                if sub.len() > MAX_SUBADDRESS_LEN {
                    return Err(invalid());
                }
                Payload::Delegated {
                    namespace,
                    sub: sub.to_vec(),
                }
            }
            _ => {
                if Some(rest.len()) != protocol.key_len() {
                    return Err(invalid());
                }
                Payload::Key(rest.to_vec())
            }
        };

        Ok(Self {
            network,
            protocol,
            payload,
        })
    }

    /// Build an ID address
    pub fn new_id(network: Network, id: u64) -> Self {
        Self {
            network,
            protocol: Protocol::Id,
            payload: Payload::Id(id),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Actor ID for ID addresses
    pub fn id(&self) -> Option<u64> {
        match self.payload {
            Payload::Id(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_id(&self) -> bool {
        self.protocol == Protocol::Id
    }

    /// Binary form: protocol byte followed by the protocol payload
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.protocol as u8];
        let mut buf = unsigned_varint::encode::u64_buffer();
        match &self.payload {
            Payload::Id(id) => out.extend_from_slice(unsigned_varint::encode::u64(*id, &mut buf)),
            Payload::Key(key) => out.extend_from_slice(key),
            Payload::Delegated { namespace, sub } => {
                out.extend_from_slice(unsigned_varint::encode::u64(*namespace, &mut buf));
                out.extend_from_slice(sub);
            }
        }
        out
    }

    fn checksum(&self) -> [u8; CHECKSUM_LEN] {
        let hash = blake2b_simd::Params::new()
            .hash_length(CHECKSUM_LEN)
            .hash(&self.to_bytes());
        let mut out = [0u8; CHECKSUM_LEN];
        out.copy_from_slice(hash.as_bytes());
        out
    }

    /// Base32 text of `raw` followed by this address's checksum
    fn encode_with_checksum(&self, raw: &[u8]) -> String {
        let mut buf = raw.to_vec();
        buf.extend_from_slice(&self.checksum());
        BASE32_NOPAD.encode(&buf).to_ascii_lowercase()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.network.prefix(), self.protocol as u8)?;
        match &self.payload {
            Payload::Id(id) => write!(f, "{}", id),
            Payload::Key(key) => write!(f, "{}", self.encode_with_checksum(key)),
            Payload::Delegated { namespace, sub } => {
                write!(f, "{}f{}", namespace, self.encode_with_checksum(sub))
            }
        }
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Canonical decimal actor ID (no leading zeros, fits in u64)
fn parse_id(payload: &str) -> Option<u64> {
    if payload.is_empty() || !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id: u64 = payload.parse().ok()?;
    (id.to_string() == payload).then_some(id)
}

/// Decode canonical lowercase unpadded base32 and split off the checksum
fn split_checksum(text: &str) -> Option<(Vec<u8>, [u8; CHECKSUM_LEN])> {
    if text.bytes().any(|b| b.is_ascii_uppercase()) {
        return None;
    }
    let raw = BASE32_NOPAD.decode(text.to_ascii_uppercase().as_bytes()).ok()?;
    // Non-zero trailing bits decode to the same bytes; only one spelling is valid
    if BASE32_NOPAD.encode(&raw).to_ascii_lowercase() != text {
        return None;
    }
    let split = raw.len().checked_sub(CHECKSUM_LEN)?;
    let mut checksum = [0u8; CHECKSUM_LEN];
    checksum.copy_from_slice(&raw[split..]);
    Some((raw[..split].to_vec(), checksum))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECP_ADDR: &str = "f1abjxfbp274xpdqcpuaykwkfb43omjotacm2p3za";
    const ACTOR_ADDR: &str = "f2beeqscijbeeqscijbeeqscijbeeqscijgfcq74i";
    const BLS_ADDR: &str = "f3aaaqeayeaudaocajbifqydiob4ibceqtcqkrmfyydenbwha5dypsaijcemsckjrhfausukzmfuxc7xayzmkq";
    const DELEGATED_ADDR: &str = "f410faaaqeayeaudaocajbifqydiob4ibceqtvnhu7zy";

    #[test]
    fn test_parse_id_address() {
        let addr = Address::parse("f01234").unwrap();
        assert_eq!(addr.protocol(), Protocol::Id);
        assert_eq!(addr.network(), Network::Mainnet);
        assert_eq!(addr.id(), Some(1234));
        assert_eq!(addr.to_string(), "f01234");
    }

    #[test]
    fn test_parse_testnet_id_address() {
        let addr = Address::parse("t01000").unwrap();
        assert_eq!(addr.network(), Network::Testnet);
        assert!(addr.is_id());
    }

    #[test]
    fn test_parse_secp_address() {
        let addr = Address::parse(SECP_ADDR).unwrap();
        assert_eq!(addr.protocol(), Protocol::Secp256k1);
        assert_eq!(addr.id(), None);
        assert_eq!(addr.to_string(), SECP_ADDR);
    }

    #[test]
    fn test_parse_actor_address() {
        let addr = Address::parse(ACTOR_ADDR).unwrap();
        assert_eq!(addr.protocol(), Protocol::Actor);
        assert_eq!(addr.to_bytes()[1..], [9u8; 20]);
    }

    #[test]
    fn test_parse_bls_address() {
        let addr = Address::parse(BLS_ADDR).unwrap();
        assert_eq!(addr.protocol(), Protocol::Bls);
        // 48-byte key, protocol byte in front
        let bytes = addr.to_bytes();
        assert_eq!(bytes.len(), 49);
        assert_eq!(bytes[1..], (0u8..48).collect::<Vec<_>>()[..]);
        assert_eq!(addr.to_string(), BLS_ADDR);
    }

    #[test]
    fn test_parse_delegated_address() {
        let addr = Address::parse(DELEGATED_ADDR).unwrap();
        assert_eq!(addr.protocol(), Protocol::Delegated);
        assert_eq!(addr.to_bytes()[..2], [4, 10]);
        assert_eq!(addr.to_bytes().len(), 22);
        assert_eq!(addr.to_string(), DELEGATED_ADDR);
    }

    #[test]
    fn test_reject_bad_checksum() {
        // Flips payload bits
        assert!(Address::parse("f1abjyfbp274xpdqcpuaykwkfb43omjotacm2p3za").is_err());
        // Same bytes, non-canonical trailing bits
        assert!(Address::parse("f1abjxfbp274xpdqcpuaykwkfb43omjotacm2p3zb").is_err());
        // Valid secp text under a different protocol digit
        assert!(Address::parse("f2abjxfbp274xpdqcpuaykwkfb43omjotacm2p3za").is_err());
        assert!(Address::parse(&format!("f3{}", "a".repeat(84))).is_err());
        assert!(Address::parse("f410fabcdefghijklmn").is_err());
    }

    #[test]
    fn test_reject_malformed() {
        for bad in [
            "",
            "f",
            "x01234",
            "f9abc",
            "f0",
            "f0012",
            "f0abc",
            "f1short",
            "f1ABJXFBP274XPDQCPUAYKWKFB43OMJOTACM2P3ZA",
            "f4f",
            "f410f",
            "f018446744073709551616",
        ] {
            assert!(Address::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_id_to_bytes_uses_uvarint() {
        let addr = Address::parse("f01234").unwrap();
        assert_eq!(addr.to_bytes(), vec![0, 0xd2, 0x09]);
    }

    #[test]
    fn test_secp_to_bytes_strips_checksum() {
        let addr = Address::parse(SECP_ADDR).unwrap();
        let bytes = addr.to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes.len(), 21);
    }

    #[test]
    fn test_from_bytes() {
        let mut raw = vec![1u8];
        raw.extend(0u8..20);
        let addr = Address::from_bytes(Network::Mainnet, &raw).unwrap();
        assert_eq!(addr.to_string(), "f1aaaqeayeaudaocajbifqydiob4ibceqt2oc2pvy");
        assert_eq!(addr.to_bytes(), raw);

        let id = Address::from_bytes(Network::Testnet, &[0, 0xd2, 0x09]).unwrap();
        assert_eq!(id.to_string(), "t01234");

        for parsed in [SECP_ADDR, ACTOR_ADDR, BLS_ADDR, DELEGATED_ADDR] {
            let addr = Address::parse(parsed).unwrap();
            assert_eq!(Address::from_bytes(Network::Mainnet, &addr.to_bytes()).unwrap(), addr);
        }
    }

    #[test]
    fn test_from_bytes_rejects_bad_lengths() {
        assert!(Address::from_bytes(Network::Mainnet, &[]).is_err());
        assert!(Address::from_bytes(Network::Mainnet, &[1, 2, 3]).is_err());
        assert!(Address::from_bytes(Network::Mainnet, &[0, 0xd2, 0x09, 0x00]).is_err());
        assert!(Address::from_bytes(Network::Mainnet, &[7, 0]).is_err());
    }

    #[test]
    fn test_new_id() {
        let addr = Address::new_id(Network::Testnet, 42);
        assert_eq!(addr.to_string(), "t042");
    }

    #[test]
    fn test_serde_as_string() {
        let addr = Address::parse("f01234").unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"f01234\"");
        let parsed: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, addr);
        assert!(serde_json::from_str::<Address>("\"nope\"").is_err());
    }
}
