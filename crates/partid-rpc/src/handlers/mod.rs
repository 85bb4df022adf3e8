// crates/partid-rpc/src/handlers/mod.rs
//
// Handler modules for all RPC endpoints.
// Each module defines request/response types and handler functions
// for one API group.

pub mod catalog;
pub mod feedback;
pub mod identify;
pub mod jobs;
pub mod node;
