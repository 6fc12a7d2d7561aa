//! In-process implementations of the remote client contracts.
//!
//! Used for testing and for running remote-engine code paths without a
//! network. State is shared between clones, so a test can keep a handle to
//! the "server" while the engine owns a client.

mod object_store;
mod tree_server;

pub use object_store::InMemoryObjectStore;
pub use tree_server::{InMemoryTreeClient, InMemoryTreeServer};
