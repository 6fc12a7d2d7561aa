//! File server client contract (FTP-style command set).

use std::io::{Read, Write};

use crate::config::RemoteTreeConfig;
use crate::error::StorageResult;

use super::ClientError;

/// Blocking client for a hierarchical file server session.
///
/// The session has a working directory; relative paths resolve against it.
/// One command per call, no retries.
pub trait TreeClient: Send {
    /// Authenticate the session.
    fn login(&mut self, username: &str, password: &str) -> Result<(), ClientError>;

    /// Switch data connections between passive and active mode.
    fn set_passive(&mut self, passive: bool) -> Result<(), ClientError>;

    /// Current working directory (absolute).
    fn pwd(&mut self) -> Result<String, ClientError>;

    /// Change the working directory. Fails if `path` is not a directory.
    fn cwd(&mut self, path: &str) -> Result<(), ClientError>;

    /// Create one directory. The parent must exist.
    fn mkdir(&mut self, path: &str) -> Result<(), ClientError>;

    /// Remove an empty directory.
    fn rmdir(&mut self, path: &str) -> Result<(), ClientError>;

    /// Remove a file.
    fn remove(&mut self, path: &str) -> Result<(), ClientError>;

    /// Download a file into `sink`.
    fn retrieve(&mut self, path: &str, sink: &mut dyn Write) -> Result<(), ClientError>;

    /// Upload `source` to `path`, replacing any existing file.
    fn store(&mut self, path: &str, source: &mut dyn Read) -> Result<(), ClientError>;

    /// Raw `LIST` output for a directory, one line per entry.
    fn list(&mut self, path: &str) -> Result<Vec<String>, ClientError>;

    /// `NLST` output for a directory.
    fn name_list(&mut self, path: &str) -> Result<Vec<String>, ClientError>;

    /// Modification time of a file, seconds since the epoch.
    fn mdtm(&mut self, path: &str) -> Result<i64, ClientError>;

    /// Set permission bits (`SITE CHMOD`).
    fn chmod(&mut self, path: &str, mode: u32) -> Result<(), ClientError>;

    /// End the session.
    fn quit(&mut self) -> Result<(), ClientError>;
}

/// Opens a [`TreeClient`] connection for a volume configuration.
///
/// The connector establishes transport (including TLS when
/// `config.secure` is set) within `config.timeout_secs`; login and mode
/// negotiation are left to the engine.
pub trait TreeConnector: Send + Sync {
    fn connect(&self, config: &RemoteTreeConfig) -> StorageResult<Box<dyn TreeClient>>;
}

impl<F> TreeConnector for F
where
    F: Fn(&RemoteTreeConfig) -> StorageResult<Box<dyn TreeClient>> + Send + Sync,
{
    fn connect(&self, config: &RemoteTreeConfig) -> StorageResult<Box<dyn TreeClient>> {
        self(config)
    }
}
