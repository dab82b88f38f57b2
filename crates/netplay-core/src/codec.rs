//! CBOR encoding for the netplay control channel.
//!
//! The transport is message-oriented (one WebSocket binary message per
//! frame), so no length prefix is needed.

use crate::error::{PlayError, PlayResult};
use ciborium::Value;
use std::io::Cursor;

/// Encode a serializable value into a CBOR frame.
pub fn encode<T: serde::Serialize>(value: &T) -> PlayResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;
    Ok(payload)
}

/// Decode a CBOR frame into a typed value.
pub fn decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> PlayResult<T> {
    let value: T = ciborium::from_reader(Cursor::new(data))?;
    Ok(value)
}

/// Positional string argument.
pub fn arg_str(args: &[Value], idx: usize) -> PlayResult<&str> {
    args.get(idx)
        .and_then(|v| v.as_text())
        .ok_or_else(|| PlayError::InvalidCall(format!("argument {idx}: expected string")))
}

/// Positional unsigned integer argument.
pub fn arg_u64(args: &[Value], idx: usize) -> PlayResult<u64> {
    args.get(idx)
        .and_then(|v| v.as_integer())
        .and_then(|i| u64::try_from(i128::from(i)).ok())
        .ok_or_else(|| PlayError::InvalidCall(format!("argument {idx}: expected unsigned integer")))
}

/// Positional byte-string argument.
pub fn arg_bytes(args: &[Value], idx: usize) -> PlayResult<&[u8]> {
    args.get(idx)
        .and_then(|v| v.as_bytes())
        .map(|v| v.as_slice())
        .ok_or_else(|| PlayError::InvalidCall(format!("argument {idx}: expected bytes")))
}

/// Positional boolean argument; absent counts as `false`.
pub fn arg_bool_or_false(args: &[Value], idx: usize) -> bool {
    args.get(idx).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Positional argument as a raw value, if present.
pub fn arg_value(args: &[Value], idx: usize) -> Option<&Value> {
    args.get(idx)
}
