//! MCP JSON-RPC protocol types used by the client transport

mod messages;

pub use messages::*;

/// MCP protocol version advertised in the `MCP-Protocol-Version` header
pub const PROTOCOL_VERSION: &str = "2025-03-26";
