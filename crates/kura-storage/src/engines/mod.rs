//! Engine implementations.
//!
//! Each engine implements [`Engine`](crate::Engine) for one kind of backend.

mod archive;
mod local;
mod memory;
mod remote_object;
mod remote_tree;

pub use archive::ArchiveEngine;
pub use local::LocalEngine;
pub use memory::MemoryEngine;
pub use remote_object::RemoteObjectEngine;
pub use remote_tree::{ListEntry, RemoteTreeEngine, parse_list_line};
