//! Client boundaries for the remote engines.
//!
//! The network clients that actually talk to an object store or a file
//! server live outside this crate. Engines only see the [`ObjectClient`] and
//! [`TreeClient`] traits; connectors turn a volume configuration into a
//! connected client. [`memory`] holds in-process implementations of both.

pub mod memory;
mod object;
mod tree;

use thiserror::Error;

pub use object::{
    DeleteFailure, ListObjectsPage, ListObjectsRequest, ObjectClient, ObjectConnector,
    ObjectData, ObjectSummary,
};
pub use tree::{TreeClient, TreeConnector};

/// Error reported by a remote client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The requested object key does not exist.
    #[error("no such key: {0}")]
    NoSuchKey(String),

    /// The bucket does not exist.
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    /// The bucket already exists.
    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    /// The bucket still holds objects.
    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    /// Credentials were rejected.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The file server refused a command.
    #[error("server replied {code}: {message}")]
    Reply { code: u16, message: String },

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Create a Reply error.
    pub fn reply(code: u16, message: impl Into<String>) -> Self {
        Self::Reply {
            code,
            message: message.into(),
        }
    }

    /// Create a Transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}
