// crates/partid-rpc/src/lib.rs
//
// partid-rpc: JSON-RPC server and handlers for the PartID engine.
//
// A single tonic service accepts `{method, params}` envelopes over HTTP/1 or
// HTTP/2 and dispatches them to `IdentificationEngine` operations.

pub mod handlers;
pub mod middleware;
pub mod server;

// Re-export the main server type for ergonomic access.
pub use server::{JsonRpcRequest, JsonRpcResponse, PartIdRpcServer, RpcConfig};
