//! Volume configuration.
//!
//! A configuration file names one or more volumes, each selecting an engine:
//!
//! ```toml
//! default = "files"
//!
//! [volumes.files]
//! engine = "local"
//! root = "/var/lib/app"
//!
//! [volumes.scratch]
//! engine = "memory"
//! ```
//!
//! Settings are validated once when a volume is registered and again when
//! its engine is built. Invalid settings are always a `Configuration` error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::engine::EngineKind;
use crate::error::{StorageError, StorageResult};

/// Name used when a caller does not select a volume.
pub const DEFAULT_VOLUME: &str = "default";

/// Settings for one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "kebab-case")]
pub enum EngineConfig {
    Local(LocalConfig),
    Memory,
    Archive(ArchiveConfig),
    RemoteObject(RemoteObjectConfig),
    RemoteTree(RemoteTreeConfig),
}

impl EngineConfig {
    /// Which engine these settings build.
    pub fn kind(&self) -> EngineKind {
        match self {
            EngineConfig::Local(_) => EngineKind::Local,
            EngineConfig::Memory => EngineKind::Memory,
            EngineConfig::Archive(_) => EngineKind::Archive,
            EngineConfig::RemoteObject(_) => EngineKind::RemoteObject,
            EngineConfig::RemoteTree(_) => EngineKind::RemoteTree,
        }
    }

    /// Check the settings without touching any backend.
    pub fn validate(&self) -> StorageResult<()> {
        match self {
            EngineConfig::Local(c) => c.validate(),
            EngineConfig::Memory => Ok(()),
            EngineConfig::Archive(c) => c.validate(),
            EngineConfig::RemoteObject(c) => c.validate(),
            EngineConfig::RemoteTree(c) => c.validate(),
        }
    }
}

/// Local filesystem volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Existing directory every path is relative to.
    #[serde(default)]
    pub root: PathBuf,
    /// Take an advisory lock around each read and write.
    #[serde(default)]
    pub lock: bool,
}

impl LocalConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: false,
        }
    }

    /// Enable advisory locking.
    pub fn with_lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    /// Check the settings.
    pub fn validate(&self) -> StorageResult<()> {
        if self.root.as_os_str().is_empty() {
            return Err(StorageError::configuration("local: root not set"));
        }
        Ok(())
    }
}

/// Archive file volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Archive file, created if missing.
    #[serde(default)]
    pub file: PathBuf,
}

impl ArchiveConfig {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }

    /// Check the settings.
    pub fn validate(&self) -> StorageResult<()> {
        if self.file.as_os_str().is_empty() {
            return Err(StorageError::configuration("archive: file not set"));
        }
        Ok(())
    }
}

/// Access key pair for an object store.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub secret: String,
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn default_region() -> String {
    "main-rack".to_string()
}

fn default_bucket() -> String {
    "data".to_string()
}

fn default_wait_attempts() -> u32 {
    20
}

fn default_wait_interval_ms() -> u64 {
    5000
}

/// Remote object store volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObjectConfig {
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for compatible stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Key prefix the volume lives under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Polls before bucket administration gives up.
    #[serde(default = "default_wait_attempts")]
    pub wait_attempts: u32,
    /// Delay between polls.
    #[serde(default = "default_wait_interval_ms")]
    pub wait_interval_ms: u64,
}

impl RemoteObjectConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            region: default_region(),
            endpoint: None,
            bucket: default_bucket(),
            root: None,
            wait_attempts: default_wait_attempts(),
            wait_interval_ms: default_wait_interval_ms(),
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Set the bucket polling budget.
    pub fn with_wait(mut self, attempts: u32, interval_ms: u64) -> Self {
        self.wait_attempts = attempts;
        self.wait_interval_ms = interval_ms;
        self
    }

    /// Check the settings.
    pub fn validate(&self) -> StorageResult<()> {
        if self.credentials.key.is_empty() || self.credentials.secret.is_empty() {
            return Err(StorageError::configuration(
                "remote-object: invalid credentials settings",
            ));
        }
        if self.region.is_empty() {
            return Err(StorageError::configuration("remote-object: region not set"));
        }
        if self.bucket.is_empty() {
            return Err(StorageError::configuration("remote-object: bucket not set"));
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    21
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_passive() -> bool {
    true
}

/// Remote file server volume.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTreeConfig {
    #[serde(default)]
    pub host: String,
    /// Login name, anonymous when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Absolute directory on the server. Defaults to the login directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Connection establishment timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Use a TLS control connection.
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_passive")]
    pub passive: bool,
}

impl RemoteTreeConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: None,
            password: None,
            port: default_port(),
            root: None,
            timeout_secs: default_timeout_secs(),
            secure: false,
            passive: default_passive(),
        }
    }

    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the settings.
    pub fn validate(&self) -> StorageResult<()> {
        if self.host.is_empty() {
            return Err(StorageError::configuration("remote-tree: no host set"));
        }
        if let Some(root) = &self.root {
            if !root.starts_with('/') {
                return Err(StorageError::configuration(format!(
                    "remote-tree: root {root} must be absolute"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RemoteTreeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTreeConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("port", &self.port)
            .field("root", &self.root)
            .field("timeout_secs", &self.timeout_secs)
            .field("secure", &self.secure)
            .field("passive", &self.passive)
            .finish()
    }
}

fn default_volume() -> String {
    DEFAULT_VOLUME.to_string()
}

/// A configuration file: named volumes plus the default selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Volume used when a call does not name one.
    #[serde(default = "default_volume")]
    pub default: String,
    #[serde(default)]
    pub volumes: BTreeMap<String, EngineConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default: default_volume(),
            volumes: BTreeMap::new(),
        }
    }
}

impl StorageConfig {
    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> StorageResult<Self> {
        let config: StorageConfig = toml::from_str(text)
            .map_err(|e| StorageError::configuration(format!("invalid configuration: {e}")))?;
        for (name, volume) in &config.volumes {
            volume.validate().map_err(|e| {
                StorageError::configuration(format!("volume {name}: {e}"))
            })?;
        }
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            StorageError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_volumes() {
        let config = StorageConfig::from_toml_str(
            r#"
            default = "files"

            [volumes.files]
            engine = "local"
            root = "/srv/files"
            lock = true

            [volumes.scratch]
            engine = "memory"

            [volumes.media]
            engine = "remote-object"
            endpoint = "http://127.0.0.1:9000"
            credentials = { key = "minio", secret = "minio123" }

            [volumes.legacy]
            engine = "remote-tree"
            host = "ftp.example.com"
            root = "/pub"
            "#,
        )
        .unwrap();

        assert_eq!(config.default, "files");
        assert_eq!(
            config.volumes["files"],
            EngineConfig::Local(LocalConfig::new("/srv/files").with_lock(true))
        );
        assert_eq!(config.volumes["scratch"], EngineConfig::Memory);

        let EngineConfig::RemoteObject(media) = &config.volumes["media"] else {
            panic!("expected remote-object volume");
        };
        assert_eq!(media.region, "main-rack");
        assert_eq!(media.bucket, "data");
        assert_eq!(media.wait_attempts, 20);

        let EngineConfig::RemoteTree(legacy) = &config.volumes["legacy"] else {
            panic!("expected remote-tree volume");
        };
        assert_eq!(legacy.port, 21);
        assert_eq!(legacy.timeout_secs, 10);
        assert!(legacy.passive);
        assert!(!legacy.secure);
        assert_eq!(legacy.address(), "ftp.example.com:21");
        assert_eq!(config.volumes["legacy"].kind(), EngineKind::RemoteTree);
    }

    #[test]
    fn test_default_volume_name() {
        let config = StorageConfig::from_toml_str("[volumes.default]\nengine = \"memory\"\n").unwrap();
        assert_eq!(config.default, DEFAULT_VOLUME);
    }

    #[test]
    fn test_invalid_settings() {
        let err = StorageConfig::from_toml_str("[volumes.a]\nengine = \"local\"\n").unwrap_err();
        assert!(err.is_configuration());

        let err = StorageConfig::from_toml_str(
            "[volumes.a]\nengine = \"remote-object\"\ncredentials = { key = \"k\" }\n",
        )
        .unwrap_err();
        assert!(err.is_configuration());

        let err = StorageConfig::from_toml_str("[volumes.a]\nengine = \"warp-drive\"\n").unwrap_err();
        assert!(err.is_configuration());

        assert!(
            EngineConfig::RemoteTree(RemoteTreeConfig::new("h").with_root("pub"))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_secrets_redacted() {
        let object = RemoteObjectConfig::new(Credentials::new("access", "hunter2"));
        let tree = RemoteTreeConfig::new("ftp").with_login("amy", "hunter2");
        assert!(!format!("{object:?}").contains("hunter2"));
        assert!(!format!("{tree:?}").contains("hunter2"));
        assert!(format!("{tree:?}").contains("amy"));
    }
}
