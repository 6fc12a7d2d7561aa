//! In-memory file server.
//!
//! Behaves like a strict FTP server: `mkdir` needs an existing parent,
//! `rmdir` only removes empty directories, uploads need an existing parent
//! directory, and `LIST` answers in Unix `ls -l` format.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::client::{ClientError, TreeClient};
use crate::object::now;

#[derive(Debug, Clone)]
struct Node {
    mode: u32,
    modified: i64,
    /// `None` for directories.
    data: Option<Vec<u8>>,
}

impl Node {
    fn directory() -> Self {
        Self {
            mode: 0o755,
            modified: now(),
            data: None,
        }
    }

    fn is_dir(&self) -> bool {
        self.data.is_none()
    }
}

#[derive(Debug)]
struct ServerState {
    /// Absolute path -> node. `/` is always present.
    nodes: BTreeMap<String, Node>,
    home: String,
    credentials: Option<(String, String)>,
    sessions: usize,
    offline: bool,
}

/// File server held in process memory.
///
/// Cloning shares state; each [`client`](Self::client) call opens a new
/// session with its own working directory.
#[derive(Debug, Clone)]
pub struct InMemoryTreeServer {
    state: Arc<Mutex<ServerState>>,
}

impl Default for InMemoryTreeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTreeServer {
    /// Create a server with an empty `/` as home directory that accepts any
    /// login.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::directory());
        Self {
            state: Arc::new(Mutex::new(ServerState {
                nodes,
                home: "/".to_string(),
                credentials: None,
                sessions: 0,
                offline: false,
            })),
        }
    }

    /// Only accept this username and password.
    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.state.lock().credentials = Some((username.into(), password.into()));
        self
    }

    /// Create `path` (and its parents) as a directory.
    pub fn with_directory(self, path: &str) -> Self {
        let path = resolve("/", path);
        let mut state = self.state.lock();
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            state
                .nodes
                .entry(current.clone())
                .or_insert_with(Node::directory);
        }
        drop(state);
        self
    }

    /// Start new sessions in `path`, creating it if needed.
    pub fn with_home(self, path: &str) -> Self {
        let server = self.with_directory(path);
        server.state.lock().home = resolve("/", path);
        server
    }

    /// Open a new session.
    pub fn client(&self) -> InMemoryTreeClient {
        let mut state = self.state.lock();
        state.sessions += 1;
        InMemoryTreeClient {
            state: Arc::clone(&self.state),
            cwd: state.home.clone(),
            logged_in: false,
            passive: false,
            open: true,
        }
    }

    /// Simulate a dropped connection: every command on every session fails
    /// with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Number of sessions that have not sent `QUIT`.
    pub fn open_sessions(&self) -> usize {
        self.state.lock().sessions
    }

    /// Permission bits of the node at `path`.
    pub fn mode(&self, path: &str) -> Option<u32> {
        self.state.lock().nodes.get(&resolve("/", path)).map(|n| n.mode)
    }

    /// Returns true if a file or directory exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.state.lock().nodes.contains_key(&resolve("/", path))
    }
}

/// One session on an [`InMemoryTreeServer`].
#[derive(Debug)]
pub struct InMemoryTreeClient {
    state: Arc<Mutex<ServerState>>,
    cwd: String,
    logged_in: bool,
    passive: bool,
    open: bool,
}

impl InMemoryTreeClient {
    /// Whether the session negotiated passive mode.
    pub fn is_passive(&self) -> bool {
        self.passive
    }

    fn ready(&self) -> Result<(), ClientError> {
        if !self.open {
            return Err(ClientError::transport("session closed"));
        }
        if self.state.lock().offline {
            return Err(ClientError::transport("connection reset"));
        }
        if !self.logged_in {
            return Err(ClientError::reply(530, "not logged in"));
        }
        Ok(())
    }

    fn resolve(&self, path: &str) -> String {
        resolve(&self.cwd, path)
    }
}

/// Resolve `path` against `cwd` into a normalized absolute path.
fn resolve(cwd: &str, path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let base = if path.starts_with('/') { "" } else { cwd };
    for segment in base.split('/').chain(path.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn leaf_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Direct children of `dir`, sorted by path.
fn children<'a>(nodes: &'a BTreeMap<String, Node>, dir: &str) -> Vec<(&'a String, &'a Node)> {
    nodes
        .iter()
        .filter(|(path, _)| path.as_str() != "/" && parent_of(path) == dir)
        .collect()
}

fn permissions(mode: u32) -> String {
    let mut out = String::with_capacity(9);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

fn list_line(name: &str, node: &Node) -> String {
    let kind = if node.is_dir() { 'd' } else { '-' };
    let size = node.data.as_ref().map_or(4096, |d| d.len());
    let date = chrono::DateTime::from_timestamp(node.modified, 0)
        .map(|t| t.format("%b %d %H:%M").to_string())
        .unwrap_or_else(|| "Jan 01 1970".to_string());
    format!(
        "{kind}{} 1 ftp ftp {size:>12} {date} {name}",
        permissions(node.mode)
    )
}

impl TreeClient for InMemoryTreeClient {
    fn login(&mut self, username: &str, password: &str) -> Result<(), ClientError> {
        let state = self.state.lock();
        if !self.open || state.offline {
            return Err(ClientError::transport("session closed"));
        }
        match &state.credentials {
            Some((user, pass)) if user != username || pass != password => {
                Err(ClientError::reply(530, "login incorrect"))
            }
            _ => {
                self.logged_in = true;
                Ok(())
            }
        }
    }

    fn set_passive(&mut self, passive: bool) -> Result<(), ClientError> {
        self.ready()?;
        self.passive = passive;
        Ok(())
    }

    fn pwd(&mut self) -> Result<String, ClientError> {
        self.ready()?;
        Ok(self.cwd.clone())
    }

    fn cwd(&mut self, path: &str) -> Result<(), ClientError> {
        self.ready()?;
        let target = self.resolve(path);
        let is_dir = self
            .state
            .lock()
            .nodes
            .get(&target)
            .is_some_and(Node::is_dir);
        if !is_dir {
            return Err(ClientError::reply(550, format!("{target}: no such directory")));
        }
        self.cwd = target;
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> Result<(), ClientError> {
        self.ready()?;
        let target = self.resolve(path);
        let mut state = self.state.lock();
        if state.nodes.contains_key(&target) {
            return Err(ClientError::reply(550, format!("{target}: file exists")));
        }
        if !state.nodes.get(parent_of(&target)).is_some_and(Node::is_dir) {
            return Err(ClientError::reply(550, format!("{target}: no such directory")));
        }
        state.nodes.insert(target, Node::directory());
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> Result<(), ClientError> {
        self.ready()?;
        let target = self.resolve(path);
        let mut state = self.state.lock();
        if target == "/" || !state.nodes.get(&target).is_some_and(Node::is_dir) {
            return Err(ClientError::reply(550, format!("{target}: no such directory")));
        }
        if !children(&state.nodes, &target).is_empty() {
            return Err(ClientError::reply(550, format!("{target}: directory not empty")));
        }
        state.nodes.remove(&target);
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), ClientError> {
        self.ready()?;
        let target = self.resolve(path);
        let mut state = self.state.lock();
        match state.nodes.get(&target) {
            Some(node) if !node.is_dir() => {
                state.nodes.remove(&target);
                Ok(())
            }
            _ => Err(ClientError::reply(550, format!("{target}: no such file"))),
        }
    }

    fn retrieve(&mut self, path: &str, sink: &mut dyn Write) -> Result<(), ClientError> {
        self.ready()?;
        let target = self.resolve(path);
        let data = {
            let state = self.state.lock();
            match state.nodes.get(&target).and_then(|n| n.data.clone()) {
                Some(data) => data,
                None => return Err(ClientError::reply(550, format!("{target}: no such file"))),
            }
        };
        sink.write_all(&data)
            .map_err(|e| ClientError::transport(e.to_string()))
    }

    fn store(&mut self, path: &str, source: &mut dyn Read) -> Result<(), ClientError> {
        self.ready()?;
        let target = self.resolve(path);
        let mut data = Vec::new();
        source
            .read_to_end(&mut data)
            .map_err(|e| ClientError::transport(e.to_string()))?;

        let mut state = self.state.lock();
        if !state.nodes.get(parent_of(&target)).is_some_and(Node::is_dir) {
            return Err(ClientError::reply(553, format!("{target}: no such directory")));
        }
        if state.nodes.get(&target).is_some_and(Node::is_dir) {
            return Err(ClientError::reply(553, format!("{target}: is a directory")));
        }
        state.nodes.insert(
            target,
            Node {
                mode: 0o644,
                modified: now(),
                data: Some(data),
            },
        );
        Ok(())
    }

    fn list(&mut self, path: &str) -> Result<Vec<String>, ClientError> {
        self.ready()?;
        let target = self.resolve(path);
        let state = self.state.lock();
        let node = state
            .nodes
            .get(&target)
            .ok_or_else(|| ClientError::reply(450, format!("{target}: no such file or directory")))?;

        if !node.is_dir() {
            return Ok(vec![list_line(leaf_of(&target), node)]);
        }

        let entries = children(&state.nodes, &target);
        let mut lines = Vec::with_capacity(entries.len() + 3);
        lines.push(format!("total {}", entries.len()));
        lines.push(list_line(".", node));
        lines.push(list_line("..", node));
        for (child, child_node) in entries {
            lines.push(list_line(leaf_of(child), child_node));
        }
        Ok(lines)
    }

    fn name_list(&mut self, path: &str) -> Result<Vec<String>, ClientError> {
        self.ready()?;
        let target = self.resolve(path);
        let state = self.state.lock();
        if !state.nodes.get(&target).is_some_and(Node::is_dir) {
            return Err(ClientError::reply(450, format!("{target}: no such directory")));
        }
        Ok(children(&state.nodes, &target)
            .into_iter()
            .map(|(child, _)| child.clone())
            .collect())
    }

    fn mdtm(&mut self, path: &str) -> Result<i64, ClientError> {
        self.ready()?;
        let target = self.resolve(path);
        let state = self.state.lock();
        match state.nodes.get(&target) {
            Some(node) if !node.is_dir() => Ok(node.modified),
            _ => Err(ClientError::reply(550, format!("{target}: no such file"))),
        }
    }

    fn chmod(&mut self, path: &str, mode: u32) -> Result<(), ClientError> {
        self.ready()?;
        let target = self.resolve(path);
        let mut state = self.state.lock();
        match state.nodes.get_mut(&target) {
            Some(node) => {
                node.mode = mode;
                Ok(())
            }
            None => Err(ClientError::reply(550, format!("{target}: no such file"))),
        }
    }

    fn quit(&mut self) -> Result<(), ClientError> {
        if self.open {
            self.open = false;
            self.logged_in = false;
            self.state.lock().sessions -= 1;
        }
        Ok(())
    }
}
