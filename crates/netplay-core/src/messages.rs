//! RPC message types for the netplay wire protocol.
//!
//! One WebSocket binary message carries one CBOR map with fixed short keys:
//! `F` (function name), `I` (terminal identifier), `R` (result payload),
//! `A` (positional argument list). Requests carry `F` + `A`; responses and
//! pushes carry `F` + `R` (and `I` for terminal-scoped pushes).

use ciborium::Value;
use serde::{Deserialize, Serialize};

/// Remotely invokable function names, shared between client and server.
pub mod funcs {
    pub const GET_TOPO: &str = "get_topo";
    pub const ADD_NODE: &str = "add_node";
    pub const DEL_NODE: &str = "del_node";
    pub const ADD_LINK: &str = "add_link";
    pub const DEL_LINK: &str = "del_link";
    pub const UPD_LINK: &str = "upd_link";
    pub const GET_FIB: &str = "get_fib";
    pub const GET_PCAP: &str = "get_pcap";
    pub const GET_PCAP_WIRE: &str = "get_pcap_wire";
    pub const PTY_IN: &str = "pty_in";
    pub const PTY_OUT: &str = "pty_out";
    pub const PTY_RESIZE: &str = "pty_resize";
    pub const OPEN_TERMINAL: &str = "open_term";
    pub const CLOSE_TERMINAL: &str = "close_term";
    pub const OPEN_ALL_PTYS: &str = "open_all_ptys";
    pub const MONITOR_COUNTS: &str = "monitor_counts";
}

/// One framed request, response, or push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    /// Function name.
    #[serde(rename = "F")]
    pub fun: String,
    /// Terminal identifier for terminal-scoped pushes.
    #[serde(rename = "I", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Result payload of a response or push.
    #[serde(rename = "R", default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Positional arguments of a request.
    #[serde(rename = "A", default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
}

impl RpcMessage {
    /// A request frame: `F` + `A`.
    pub fn call(fun: &str, args: Vec<Value>) -> Self {
        Self {
            fun: fun.to_string(),
            id: None,
            result: None,
            args: Some(args),
        }
    }

    /// A response or unsolicited push frame: `F` + `R`.
    pub fn push(fun: &str, result: Value) -> Self {
        Self {
            fun: fun.to_string(),
            id: None,
            result: Some(result),
            args: None,
        }
    }

    /// Terminal output push: `pty_out` with the terminal id and raw bytes.
    pub fn pty_out(id: &str, data: &[u8]) -> Self {
        Self {
            fun: funcs::PTY_OUT.to_string(),
            id: Some(id.to_string()),
            result: Some(Value::Bytes(data.to_vec())),
            args: None,
        }
    }

    /// Terminal closed push: `close_term` with the terminal id.
    pub fn close_term(id: &str) -> Self {
        Self {
            fun: funcs::CLOSE_TERMINAL.to_string(),
            id: Some(id.to_string()),
            result: None,
            args: None,
        }
    }
}

/// Build a CBOR map value with text keys.
pub fn obj<I>(entries: I) -> Value
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::Text(k.to_string()), v))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};

    #[test]
    fn request_round_trip() {
        let msg = RpcMessage::call(funcs::OPEN_TERMINAL, vec![Value::Text("h1".into())]);
        let bytes = encode(&msg).unwrap();
        let back: RpcMessage = decode(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn wire_uses_short_keys() {
        let msg = RpcMessage::pty_out("cli", b"hello");
        let bytes = encode(&msg).unwrap();
        let raw: Value = decode(&bytes).unwrap();
        let map = raw.as_map().expect("message is a map");
        let keys: Vec<&str> = map
            .iter()
            .filter_map(|(k, _)| k.as_text())
            .collect();
        assert_eq!(keys, vec!["F", "I", "R"]);
    }

    #[test]
    fn absent_fields_are_omitted() {
        let msg = RpcMessage::close_term("t1");
        let bytes = encode(&msg).unwrap();
        let raw: Value = decode(&bytes).unwrap();
        let map = raw.as_map().unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.iter().all(|(k, _)| {
            let k = k.as_text().unwrap();
            k == "F" || k == "I"
        }));
    }

    #[test]
    fn obj_builds_text_keyed_map() {
        let v = obj([
            ("id", Value::Text("h1".into())),
            ("fib", Value::Text("...".into())),
        ]);
        let map = v.as_map().unwrap();
        assert_eq!(map[0].0.as_text(), Some("id"));
        assert_eq!(map[1].0.as_text(), Some("fib"));
    }
}
