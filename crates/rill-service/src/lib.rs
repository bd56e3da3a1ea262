//! JSON-RPC front end for a [`rill::Session`].
//!
//! The binary speaks JSON-RPC 2.0 over stdio with `Content-Length` framing.
//! Requests are served on their own threads: `executeTurn` blocks for as
//! long as the code runs, and the whole point of the protocol is that
//! `sendLine`, `interrupt`, and `nextAsyncEvent` keep working while it does.

pub mod handler;

pub use handler::{RpcError, ServiceHandler};
