//! CBOR encoding of actor method parameters

use ciborium::value::Value;
use grantcraft_core::{Address, Amount};

use crate::{LedgerError, MethodCall, Result};

/// Encoded parameters for `call`, or `None` for parameterless methods
pub(crate) fn encode(call: &MethodCall) -> Result<Option<Vec<u8>>> {
    match call {
        MethodCall::Send => Ok(None),
        MethodCall::AddVerifiedClient { client, allowance } => {
            add_verified_client(client, allowance).map(Some)
        }
    }
}

/// `[address bytes, bigint bytes]` as a two-element CBOR array
fn add_verified_client(client: &Address, allowance: &Amount) -> Result<Vec<u8>> {
    let params = Value::Array(vec![
        Value::Bytes(client.to_bytes()),
        Value::Bytes(allowance.to_signed_bytes()),
    ]);
    let mut out = Vec::new();
    ciborium::ser::into_writer(&params, &mut out)
        .map_err(|e| LedgerError::SerializationError(e.to_string()))?;
    Ok(out)
}
