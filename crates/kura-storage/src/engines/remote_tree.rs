//! Remote file server engine.
//!
//! One session per engine, opened at construction and parked in the volume
//! root between calls. Every operation addresses absolute paths so the
//! working directory only matters for directory probes, which always
//! change back to the root afterwards.

use std::io::Cursor;

use crate::client::{ClientError, TreeClient, TreeConnector};
use crate::config::RemoteTreeConfig;
use crate::engine::{Engine, EngineKind};
use crate::error::{StorageError, StorageResult};
use crate::object::FileObject;
use crate::path::{self, SEPARATOR};

/// Mode for directories created by `write`.
const DIRECTORY_MODE: u32 = 0o744;

/// One parsed line of a raw `LIST` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Take `count` whitespace-separated fields, returning them and the rest of
/// the line (which may itself contain spaces).
fn split_fields(line: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(count);
    let mut rest = line.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    Some((fields, rest))
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Index of the month field in a Unix `ls -l` line: month, day, then a
/// time or a year, preceded by the size and followed by the name.
fn unix_date_index(line: &str) -> Option<usize> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    (2..fields.len().saturating_sub(3)).find(|&i| {
        MONTHS.iter().any(|m| fields[i].eq_ignore_ascii_case(m))
            && is_number(fields[i + 1])
            && (fields[i + 2].contains(':')
                || (fields[i + 2].len() == 4 && is_number(fields[i + 2])))
            && is_number(fields[i - 1])
    })
}

/// Parse one line of `LIST` output.
///
/// Understands Unix `ls -l` lines and MS-DOS/IIS lines. Summary lines
/// (`total 12`), the `.` and `..` entries and anything unrecognized yield
/// `None`. Symlinks are reported under their own name as files.
pub fn parse_list_line(line: &str) -> Option<ListEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    let first = line.split_whitespace().next()?;

    let entry = if first.starts_with(|c: char| c.is_ascii_digit()) && first.contains('-') {
        // 10-31-19  02:40PM       <DIR>          docs
        let (fields, name) = split_fields(line, 3)?;
        let is_dir = fields[2].eq_ignore_ascii_case("<DIR>");
        let size = if is_dir { 0 } else { fields[2].parse().ok()? };
        ListEntry {
            name: name.to_string(),
            is_dir,
            size,
        }
    } else if first.len() == 10 && first.starts_with(['-', 'd', 'l', 'b', 'c', 'p', 's']) {
        // drwxr-xr-x 1 ftp ftp 4096 Oct 31 14:40 docs
        // Owner and group columns vary between servers, so the date decides
        // where the size and the name are.
        let date = unix_date_index(line)?;
        let (fields, name) = split_fields(line, date + 3)?;
        let name = if first.starts_with('l') {
            name.split(" -> ").next().unwrap_or(name)
        } else {
            name
        };
        ListEntry {
            name: name.to_string(),
            is_dir: first.starts_with('d'),
            size: fields[date - 1].parse().ok()?,
        }
    } else {
        return None;
    };

    if entry.name.is_empty() || entry.name == "." || entry.name == ".." {
        return None;
    }
    Some(entry)
}

/// Append `name` to an absolute directory.
fn child(directory: &str, name: &str) -> String {
    if directory == "/" {
        format!("/{name}")
    } else {
        format!("{directory}/{name}")
    }
}

fn session(slot: &mut Option<Box<dyn TreeClient>>) -> StorageResult<&mut (dyn TreeClient + 'static)> {
    slot.as_deref_mut()
        .ok_or_else(|| StorageError::backend("remote-tree: session closed"))
}

/// Engine over a directory on a remote file server.
pub struct RemoteTreeEngine {
    session: Option<Box<dyn TreeClient>>,
    /// Absolute volume root on the server.
    root: String,
    address: String,
}

impl std::fmt::Debug for RemoteTreeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTreeEngine")
            .field("address", &self.address)
            .field("root", &self.root)
            .field("connected", &self.session.is_some())
            .finish()
    }
}

impl RemoteTreeEngine {
    /// Connect through `connector` and open the session.
    pub fn connect(config: &RemoteTreeConfig, connector: &dyn TreeConnector) -> StorageResult<Self> {
        config.validate()?;
        let client = connector.connect(config).map_err(|e| match e {
            StorageError::Configuration(_) => e,
            other => StorageError::configuration(format!(
                "remote-tree: error connecting to {}: {other}",
                config.address()
            )),
        })?;
        Self::open(config, client)
    }

    /// Log in on an already connected client and enter the volume root.
    ///
    /// Without a configured root the login directory is used. Rejected
    /// credentials or a root that cannot be entered close the session and
    /// fail with a configuration error.
    pub fn open(config: &RemoteTreeConfig, mut client: Box<dyn TreeClient>) -> StorageResult<Self> {
        config.validate()?;
        let address = config.address();

        let username = config.username.as_deref().unwrap_or("anonymous");
        let password = config.password.as_deref().unwrap_or("");
        if let Err(e) = client.login(username, password) {
            let _ = client.quit();
            return Err(StorageError::configuration(format!(
                "remote-tree: invalid username or password for {address}: {e}"
            )));
        }

        let setup = client.set_passive(config.passive).and_then(|()| match &config.root {
            Some(root) => Ok(root.clone()),
            None => client.pwd(),
        });
        let root = match setup {
            Ok(root) => root,
            Err(e) => {
                let _ = client.quit();
                return Err(StorageError::configuration(format!(
                    "remote-tree: session setup failed on {address}: {e}"
                )));
            }
        };
        let root = match root.trim_end_matches(SEPARATOR) {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };

        if let Err(e) = client.cwd(&root) {
            let _ = client.quit();
            return Err(StorageError::configuration(format!(
                "remote-tree: invalid root {root}: {e}"
            )));
        }

        tracing::info!(address = %address, root = %root, passive = config.passive, "remote tree engine ready");
        Ok(Self {
            session: Some(client),
            root,
            address,
        })
    }

    /// Absolute volume root on the server.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Returns true while the session is open.
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// End the session. Further calls fail with a backend error.
    pub fn disconnect(&mut self) {
        if let Some(mut client) = self.session.take() {
            if let Err(e) = client.quit() {
                tracing::warn!(address = %self.address, error = %e, "remote-tree: quit failed");
            } else {
                tracing::debug!(address = %self.address, "remote-tree: disconnected");
            }
        }
    }

    /// Absolute server path for a normalized relative path.
    fn absolute(&self, relative: &str) -> String {
        if relative.is_empty() {
            self.root.clone()
        } else {
            child(&self.root, relative)
        }
    }

    /// Probe a directory by entering it, then return to the root.
    fn is_dir(&mut self, absolute: &str) -> StorageResult<bool> {
        let client = session(&mut self.session)?;
        match client.cwd(absolute) {
            Ok(()) => {}
            Err(ClientError::Transport(e)) => return Err(StorageError::backend(e)),
            Err(_) => return Ok(false),
        }
        client.cwd(&self.root)?;
        Ok(true)
    }

    fn is_file(&mut self, absolute: &str) -> StorageResult<bool> {
        let (directory, leaf) = match absolute.rsplit_once(SEPARATOR) {
            Some(("", leaf)) => ("/", leaf),
            Some((directory, leaf)) => (directory, leaf),
            None => return Ok(false),
        };
        let client = session(&mut self.session)?;
        match client.name_list(directory) {
            Ok(names) => Ok(names.iter().any(|n| n == absolute || n == leaf)),
            Err(ClientError::Transport(e)) => Err(StorageError::backend(e)),
            Err(_) => Ok(false),
        }
    }

    fn list_dir(&mut self, absolute: &str) -> StorageResult<Vec<ListEntry>> {
        let lines = session(&mut self.session)?.list(absolute)?;
        let mut entries: Vec<ListEntry> = lines.iter().filter_map(|l| parse_list_line(l)).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Create `relative` below the root one segment at a time.
    fn create_dirs(&mut self, relative: &str) -> StorageResult<()> {
        let client = session(&mut self.session)?;
        let mut location = self.root.clone();
        for part in relative.split(SEPARATOR).filter(|p| !p.is_empty()) {
            location = child(&location, part);
            if client.cwd(&location).is_ok() {
                continue;
            }
            client.mkdir(&location).map_err(|e| {
                StorageError::backend(format!("error creating directory {location}: {e}"))
            })?;
            client.chmod(&location, DIRECTORY_MODE).map_err(|e| {
                StorageError::backend(format!("error setting mode on {location}: {e}"))
            })?;
            tracing::debug!(directory = %location, "remote-tree: created directory");
        }
        Ok(())
    }

    /// Files first, then subdirectories, then the directory itself.
    fn remove_dir(&mut self, absolute: &str) -> StorageResult<bool> {
        let entries = self.list_dir(absolute)?;
        let (dirs, files): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.is_dir);

        for file in files {
            session(&mut self.session)?.remove(&child(absolute, &file.name))?;
        }
        for dir in dirs {
            self.remove_dir(&child(absolute, &dir.name))?;
        }
        match session(&mut self.session)?.rmdir(absolute) {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(directory = absolute, error = %e, "remote-tree: rmdir failed");
                Ok(false)
            }
        }
    }

    fn scan(&mut self, absolute: &str, files: &mut Vec<FileObject>) -> StorageResult<()> {
        for entry in self.list_dir(absolute)? {
            let location = child(absolute, &entry.name);
            if entry.is_dir {
                self.scan(&location, files)?;
            } else {
                let timestamp = session(&mut self.session)?.mdtm(&location).unwrap_or(0);
                let relative = path::rebase(&location, &self.root);
                files.push(FileObject::new(relative, entry.size, timestamp));
            }
        }
        Ok(())
    }
}

impl Engine for RemoteTreeEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::RemoteTree
    }

    fn read(&mut self, name: &str) -> StorageResult<Vec<u8>> {
        let relative = path::normalize(name)?;
        if relative.is_empty() {
            return Err(StorageError::not_found(name));
        }
        let absolute = self.absolute(&relative);

        let mut buffer = Vec::new();
        match session(&mut self.session)?.retrieve(&absolute, &mut buffer) {
            Ok(()) => Ok(buffer),
            Err(ClientError::Transport(e)) => Err(StorageError::backend(e)),
            Err(_) => Err(StorageError::not_found(name)),
        }
    }

    fn write(&mut self, name: &str, data: &[u8]) -> StorageResult<bool> {
        let relative = path::normalize(name)?;
        if relative.is_empty() || path::is_protected(name) {
            return Err(StorageError::invalid_path(name));
        }
        let absolute = self.absolute(&relative);

        if let (Some(directory), _) = path::split(&relative) {
            if !self.is_dir(&self.absolute(directory))? {
                let created = self.create_dirs(directory);
                let restored = session(&mut self.session)?.cwd(&self.root);
                created?;
                restored?;
            }
        }

        let mut source = Cursor::new(data);
        session(&mut self.session)?.store(&absolute, &mut source)?;
        Ok(true)
    }

    fn delete(&mut self, name: &str) -> StorageResult<bool> {
        if path::is_protected(name) {
            return Ok(false);
        }
        let relative = path::normalize(name)?;
        if relative.is_empty() {
            return Err(StorageError::not_found(name));
        }
        let absolute = self.absolute(&relative);

        if self.is_dir(&absolute)? {
            tracing::debug!(directory = %absolute, "remote-tree: removing tree");
            return self.remove_dir(&absolute);
        }
        match session(&mut self.session)?.remove(&absolute) {
            Ok(()) => Ok(true),
            Err(ClientError::Transport(e)) => Err(StorageError::backend(e)),
            Err(_) => Err(StorageError::not_found(name)),
        }
    }

    fn exists(&mut self, name: &str) -> bool {
        let relative = match path::normalize(name) {
            Ok(relative) if !relative.is_empty() => relative,
            _ => return false,
        };
        let absolute = self.absolute(&relative);
        let found = self
            .is_dir(&absolute)
            .and_then(|dir| if dir { Ok(true) } else { self.is_file(&absolute) });
        found.unwrap_or_else(|e| {
            tracing::warn!(name, error = %e, "remote-tree: existence probe failed");
            false
        })
    }

    fn list(&mut self, prefix: Option<&str>) -> StorageResult<Vec<FileObject>> {
        let relative = path::normalize(prefix.unwrap_or(""))?;
        let absolute = self.absolute(&relative);

        let mut files = Vec::new();
        if relative.is_empty() || self.is_dir(&absolute)? {
            self.scan(&absolute, &mut files)?;
        } else if self.is_file(&absolute)? {
            let size = self
                .list_dir(&absolute)?
                .first()
                .map_or(0, |entry| entry.size);
            let timestamp = session(&mut self.session)?.mdtm(&absolute).unwrap_or(0);
            files.push(FileObject::new(&relative, size, timestamp));
        } else {
            return Err(StorageError::not_found(relative));
        }
        Ok(files)
    }

    fn close(&mut self) -> StorageResult<()> {
        self.disconnect();
        Ok(())
    }
}

impl Drop for RemoteTreeEngine {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::InMemoryTreeServer;

    fn config() -> RemoteTreeConfig {
        RemoteTreeConfig::new("ftp.test").with_login("amy", "secret")
    }

    fn server() -> InMemoryTreeServer {
        InMemoryTreeServer::new()
            .with_credentials("amy", "secret")
            .with_home("/home/amy")
    }

    #[test]
    fn test_parse_unix_lines() {
        assert_eq!(parse_list_line("total 8"), None);
        assert_eq!(parse_list_line("drwxr-xr-x 2 ftp ftp 4096 Oct 31 14:40 ."), None);
        assert_eq!(
            parse_list_line("drwxr-xr-x 2 ftp ftp 4096 Oct 31 14:40 docs"),
            Some(ListEntry {
                name: "docs".into(),
                is_dir: true,
                size: 4096
            })
        );
        assert_eq!(
            parse_list_line("-rw-r--r-- 1 ftp ftp 1234 Oct 31  2019 my report.txt\r"),
            Some(ListEntry {
                name: "my report.txt".into(),
                is_dir: false,
                size: 1234
            })
        );
        assert_eq!(
            parse_list_line("-rw-r--r-- 1 ftp 1234 Oct 31 14:40 a.txt"),
            Some(ListEntry {
                name: "a.txt".into(),
                is_dir: false,
                size: 1234
            })
        );
        assert_eq!(
            parse_list_line("-rw-r--r--   1 1000 1000 77 Jan  5  2021 Oct 31 notes.txt")
                .map(|e| e.name),
            Some("Oct 31 notes.txt".into())
        );
        let link = parse_list_line("lrwxrwxrwx 1 ftp ftp 7 Oct 31 14:40 latest -> v2/app").unwrap();
        assert_eq!(link.name, "latest");
        assert!(!link.is_dir);
    }

    #[test]
    fn test_parse_dos_lines() {
        assert_eq!(
            parse_list_line("10-31-19  02:40PM       <DIR>          old docs"),
            Some(ListEntry {
                name: "old docs".into(),
                is_dir: true,
                size: 0
            })
        );
        assert_eq!(
            parse_list_line("10-31-19  02:40PM                 5120 readme.txt"),
            Some(ListEntry {
                name: "readme.txt".into(),
                is_dir: false,
                size: 5120
            })
        );
        assert_eq!(parse_list_line("garbage"), None);
    }

    #[test]
    fn test_root_defaults_to_login_directory() {
        let server = server();
        let engine = RemoteTreeEngine::open(&config(), Box::new(server.client())).unwrap();
        assert_eq!(engine.root(), "/home/amy");
    }

    #[test]
    fn test_bad_login_closes_session() {
        let server = server();
        let bad = RemoteTreeConfig::new("ftp.test").with_login("amy", "wrong");
        let err = RemoteTreeEngine::open(&bad, Box::new(server.client())).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(server.open_sessions(), 0);
    }

    #[test]
    fn test_missing_root_is_configuration_error() {
        let server = server();
        let err = RemoteTreeEngine::open(&config().with_root("/nope"), Box::new(server.client()))
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(server.open_sessions(), 0);
    }

    #[test]
    fn test_write_creates_directories_with_mode() {
        let server = server();
        let mut engine = RemoteTreeEngine::open(&config(), Box::new(server.client())).unwrap();
        engine.write("a/b/c.txt", b"hello").unwrap();

        assert!(server.contains("/home/amy/a/b/c.txt"));
        assert_eq!(server.mode("/home/amy/a"), Some(0o744));
        assert_eq!(server.mode("/home/amy/a/b"), Some(0o744));
        assert_eq!(engine.read("a/b/c.txt").unwrap(), b"hello");
    }

    #[test]
    fn test_list_and_single_file() {
        let server = server();
        let mut engine = RemoteTreeEngine::open(&config(), Box::new(server.client())).unwrap();
        engine.write("docs/x y.txt", b"12345").unwrap();
        engine.write("docs/sub/z.txt", b"1").unwrap();

        let paths: Vec<_> = engine
            .list(None)
            .unwrap()
            .into_iter()
            .map(|o| o.path().to_string())
            .collect();
        assert_eq!(paths, vec!["docs/sub/z.txt", "docs/x y.txt"]);

        let single = engine.list(Some("docs/x y.txt")).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].size(), 5);
        assert!(single[0].timestamp() > 0);
    }

    #[test]
    fn test_recursive_delete() {
        let server = server();
        let mut engine = RemoteTreeEngine::open(&config(), Box::new(server.client())).unwrap();
        engine.write("docs/a.txt", b"a").unwrap();
        engine.write("docs/deep/er/b.txt", b"b").unwrap();

        assert!(engine.delete("docs").unwrap());
        assert!(!server.contains("/home/amy/docs"));
        assert!(engine.delete("docs").unwrap_err().is_not_found());
    }

    #[test]
    fn test_exists_degrades_when_offline() {
        let server = server();
        let mut engine = RemoteTreeEngine::open(&config(), Box::new(server.client())).unwrap();
        engine.write("docs/a.txt", b"a").unwrap();

        server.set_offline(true);
        assert!(!engine.exists("docs"));
        assert!(!engine.exists("docs/a.txt"));
        assert_eq!(engine.read("docs/a.txt").unwrap_err().kind(), crate::ErrorKind::Storage);
        assert_eq!(engine.list(None).unwrap_err().kind(), crate::ErrorKind::Storage);

        server.set_offline(false);
        assert!(engine.exists("docs"));
        assert!(engine.exists("docs/a.txt"));
    }

    #[test]
    fn test_disconnect_on_drop() {
        let server = server();
        {
            let _engine = RemoteTreeEngine::open(&config(), Box::new(server.client())).unwrap();
            assert_eq!(server.open_sessions(), 1);
        }
        assert_eq!(server.open_sessions(), 0);

        let mut engine = RemoteTreeEngine::open(&config(), Box::new(server.client())).unwrap();
        engine.disconnect();
        assert!(!engine.is_connected());
        assert_eq!(engine.read("a.txt").unwrap_err().kind(), crate::ErrorKind::Storage);
    }
}
