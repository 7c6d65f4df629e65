//! Verified registry tables read straight from chain state
//!
//! The registry actor keeps verifiers and verified clients in two HAMTs whose
//! keys are address bytes and whose values are DataCap big integers. The node
//! exposes raw IPLD blocks through `ChainReadObj`, so listing a table means
//! fetching the actor head, picking the table root out of it and walking every
//! node below that root.

use async_trait::async_trait;
use ciborium::value::Value;
use data_encoding::BASE32_NOPAD;
use tracing::debug;

use grantcraft_core::{Address, Amount, Network};

use crate::{LedgerError, Result, VerifiedEntry};

/// Verified registry actor
pub(crate) const VERIFIED_REGISTRY_ACTOR: &str = "f06";

/// CBOR tag for IPLD links
const CID_TAG: u64 = 42;

/// Tables in the registry actor state (positions in the state tuple)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegistryTable {
    Verifiers = 1,
    VerifiedClients = 2,
}

/// Raw IPLD block access
#[async_trait]
pub(crate) trait BlockSource: Send + Sync {
    async fn read_block(&self, cid: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq)]
enum NodeEntry {
    Link(String),
    Pair { key: Vec<u8>, value: Vec<u8> },
}

/// Every entry of `table`, given the CID of the registry actor's head state
pub(crate) async fn list_table(
    source: &dyn BlockSource,
    head: &str,
    table: RegistryTable,
) -> Result<Vec<VerifiedEntry>> {
    let state = decode_block(&source.read_block(head).await?)?;
    let root = table_root(&state, table)?;

    let mut pending = vec![root];
    let mut out = Vec::new();
    while let Some(cid) = pending.pop() {
        let node = decode_block(&source.read_block(&cid).await?)?;
        for entry in node_entries(&node)? {
            match entry {
                NodeEntry::Link(child) => pending.push(child),
                NodeEntry::Pair { key, value } => out.push(VerifiedEntry {
                    address: Address::from_bytes(Network::Mainnet, &key).map_err(malformed)?,
                    data_cap: Amount::from_signed_bytes(&value).map_err(malformed)?,
                }),
            }
        }
    }

    debug!("Read {} entries from {:?}", out.len(), table);
    out.sort_by(|a, b| a.address.cmp(&b.address));
    Ok(out)
}

fn decode_block(bytes: &[u8]) -> Result<Value> {
    ciborium::de::from_reader(bytes).map_err(malformed)
}

fn table_root(state: &Value, table: RegistryTable) -> Result<String> {
    let fields = state
        .as_array()
        .ok_or_else(|| LedgerError::SerializationError("registry state is not a tuple".into()))?;
    let link = fields.get(table as usize).ok_or_else(|| {
        LedgerError::SerializationError(format!("registry state has no {:?}", table))
    })?;
    cid_from_link(link)
}

/// HAMT node: `[bitfield, [pointer...]]`. A pointer is either a link to a
/// child node or a bucket of `[key, value]` pairs. Older encodings wrap the
/// two cases in a map keyed `"0"` (link) and `"1"` (bucket).
fn node_entries(node: &Value) -> Result<Vec<NodeEntry>> {
    let pointers = node
        .as_array()
        .and_then(|fields| fields.get(1))
        .and_then(Value::as_array)
        .ok_or_else(|| LedgerError::SerializationError("malformed HAMT node".into()))?;

    let mut out = Vec::new();
    for pointer in pointers {
        match pointer {
            Value::Tag(..) => out.push(NodeEntry::Link(cid_from_link(pointer)?)),
            Value::Array(bucket) => push_bucket(bucket, &mut out)?,
            Value::Map(fields) => {
                for (kind, inner) in fields {
                    match (kind.as_text(), inner) {
                        (Some("0"), link) => out.push(NodeEntry::Link(cid_from_link(link)?)),
                        (Some("1"), Value::Array(bucket)) => push_bucket(bucket, &mut out)?,
                        _ => {
                            return Err(LedgerError::SerializationError(
                                "malformed HAMT pointer".into(),
                            ))
                        }
                    }
                }
            }
            _ => {
                return Err(LedgerError::SerializationError(
                    "malformed HAMT pointer".into(),
                ))
            }
        }
    }
    Ok(out)
}

fn push_bucket(bucket: &[Value], out: &mut Vec<NodeEntry>) -> Result<()> {
    for pair in bucket {
        match pair.as_array().map(Vec::as_slice) {
            Some([Value::Bytes(key), Value::Bytes(value)]) => out.push(NodeEntry::Pair {
                key: key.clone(),
                value: value.clone(),
            }),
            _ => {
                return Err(LedgerError::SerializationError(
                    "malformed HAMT entry".into(),
                ))
            }
        }
    }
    Ok(())
}

/// Tag 42 byte strings carry a `0x00` multibase prefix before the binary CID;
/// the node accepts the base32 string form.
fn cid_from_link(link: &Value) -> Result<String> {
    match link {
        Value::Tag(CID_TAG, inner) => match inner.as_ref() {
            Value::Bytes(bytes) if bytes.first() == Some(&0) && bytes.len() > 1 => {
                Ok(format!("b{}", BASE32_NOPAD.encode(&bytes[1..]).to_ascii_lowercase()))
            }
            _ => Err(LedgerError::SerializationError("malformed CID link".into())),
        },
        _ => Err(LedgerError::SerializationError("expected CID link".into())),
    }
}

fn malformed(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::SerializationError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const PREFIX: [u8; 7] = [0x00, 0x01, 0x71, 0xa0, 0xe4, 0x02, 0x20];

    fn link(fill: u8) -> (Value, String) {
        let mut bytes = PREFIX.to_vec();
        bytes.extend([fill; 32]);
        let value = Value::Tag(CID_TAG, Box::new(Value::Bytes(bytes)));
        let cid = cid_from_link(&value).unwrap();
        (value, cid)
    }

    fn pair(id: u64, cap: u128) -> Value {
        Value::Array(vec![
            Value::Bytes(Address::new_id(Network::Mainnet, id).to_bytes()),
            Value::Bytes(Amount(cap).to_signed_bytes()),
        ])
    }

    fn node(pointers: Vec<Value>) -> Value {
        Value::Array(vec![Value::Bytes(vec![0xff]), Value::Array(pointers)])
    }

    fn encode(value: &Value) -> Vec<u8> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(value, &mut out).unwrap();
        out
    }

    struct Blocks(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl BlockSource for Blocks {
        async fn read_block(&self, cid: &str) -> Result<Vec<u8>> {
            self.0
                .get(cid)
                .cloned()
                .ok_or_else(|| LedgerError::NotFound(cid.to_string()))
        }
    }

    #[test]
    fn test_cid_from_link() {
        let (_, cid) = link(0);
        assert_eq!(
            cid,
            "bafy2bzaceaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
        assert!(cid_from_link(&Value::Bytes(vec![0, 1])).is_err());
        assert!(cid_from_link(&Value::Tag(CID_TAG, Box::new(Value::Bytes(vec![1, 2])))).is_err());
    }

    #[test]
    fn test_node_entries_both_pointer_forms() {
        let (child, child_cid) = link(1);
        let node = node(vec![
            child.clone(),
            Value::Array(vec![pair(100, 5)]),
            Value::Map(vec![(Value::Text("0".into()), child)]),
            Value::Map(vec![(Value::Text("1".into()), Value::Array(vec![pair(200, 6)]))]),
        ]);

        let entries = node_entries(&node).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0], NodeEntry::Link(child_cid.clone()));
        assert_eq!(entries[2], NodeEntry::Link(child_cid));
        assert!(matches!(&entries[3], NodeEntry::Pair { key, .. } if key == &vec![0, 200, 1]));
    }

    #[test]
    fn test_node_entries_rejects_garbage() {
        assert!(node_entries(&Value::Bool(true)).is_err());
        assert!(node_entries(&node(vec![Value::Text("x".into())])).is_err());
        assert!(node_entries(&node(vec![Value::Array(vec![Value::Bytes(vec![0])])])).is_err());
    }

    #[tokio::test]
    async fn test_list_table_walks_children() {
        let (_, head) = link(2);
        let (verifiers_link, verifiers_root) = link(3);
        let (clients_link, clients_root) = link(4);
        let (child_link, child) = link(5);

        let state = Value::Array(vec![
            Value::Bytes(Address::new_id(Network::Mainnet, 80).to_bytes()),
            verifiers_link,
            clients_link,
        ]);

        let mut blocks = HashMap::new();
        blocks.insert(head.clone(), encode(&state));
        blocks.insert(
            verifiers_root,
            encode(&node(vec![Value::Array(vec![pair(100, 1000)])])),
        );
        blocks.insert(
            clients_root,
            encode(&node(vec![Value::Array(vec![pair(300, 3)]), child_link])),
        );
        blocks.insert(
            child,
            encode(&node(vec![Value::Array(vec![pair(200, 2), pair(201, 0)])])),
        );
        let source = Blocks(blocks);

        let verifiers = list_table(&source, &head, RegistryTable::Verifiers).await.unwrap();
        assert_eq!(verifiers.len(), 1);
        assert_eq!(verifiers[0].address.to_string(), "f0100");
        assert_eq!(verifiers[0].data_cap, Amount(1000));

        let clients = list_table(&source, &head, RegistryTable::VerifiedClients).await.unwrap();
        let listed: Vec<_> = clients
            .iter()
            .map(|e| (e.address.to_string(), e.data_cap))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("f0200".to_string(), Amount(2)),
                ("f0201".to_string(), Amount::ZERO),
                ("f0300".to_string(), Amount(3)),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_table_missing_block() {
        let (_, head) = link(6);
        let source = Blocks(HashMap::new());
        let err = list_table(&source, &head, RegistryTable::Verifiers).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
