//! The external interface (§6): a JSON-RPC 2.0 tool server over HTTP. Kept
//! out of the core spec's scope, but a server binary needs one, so it is
//! built the way the rest of the ambient stack is — thin, and grounded on
//! the same crates the rest of this crate already depends on.

pub mod schema;
pub mod server;
pub mod tools;

pub use server::{build_router, serve};
pub use tools::ToolState;
