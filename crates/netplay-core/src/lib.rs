//! netplay-core: Shared protocol library for the netplay control plane.
//!
//! Provides the CBOR RPC message types, codec helpers, the error taxonomy,
//! and persistent auth-token handling.

pub mod codec;
pub mod error;
pub mod messages;
pub mod token;

// Re-export commonly used items at crate root.
pub use ciborium::Value;
pub use codec::{arg_bool_or_false, arg_bytes, arg_str, arg_u64, arg_value, decode, encode};
pub use error::{PlayError, PlayResult};
pub use messages::{funcs, obj, RpcMessage};
