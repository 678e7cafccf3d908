//! In-memory FTP server fake shared by the integration tests.
//!
//! [`TestServer`] holds a directory tree behind a mutex together with
//! bookkeeping the tests assert on: how many control connections were
//! opened, how many are live, the highest number ever live at once, and
//! the order in which entries were deleted. [`TestServer::factory`]
//! produces [`FtpClient`]s that operate on the shared tree, so two
//! sessions observe each other's changes just like two connections to a
//! real server would.

use std::{
    collections::BTreeMap,
    io,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use ftp_remote_fs::{ByteStream, FtpClient, FtpClientFactory, FtpEntry, TransferMode};

const CHUNK_LEN: usize = 4096;

/// How a [`TestServer`] sabotages the next connection attempts.
#[derive(Debug, Clone, Copy)]
pub enum ConnectFailure {
    /// The connect call hangs until the caller's timeout fires.
    Timeout,
    /// The connect call fails with `ConnectionRefused`.
    Refused,
    /// The connect call fails like a resolver miss.
    UnknownHost,
    /// The handshake completes with this reply code.
    Reply(u16),
}

#[derive(Debug)]
enum Node {
    Dir(BTreeMap<String, Node>),
    File(Vec<u8>),
}

#[derive(Debug, Default)]
struct State {
    root: BTreeMap<String, Node>,
    live_connections: usize,
    max_live_connections: usize,
    connect_count: usize,
    delete_log: Vec<String>,
    connect_failure: Option<ConnectFailure>,
    login_reply: Option<u16>,
}

/// Shared in-memory remote file system plus per-server bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct TestServer {
    state: Arc<Mutex<State>>,
}

impl TestServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory producing clients connected to this server.
    pub fn factory(&self) -> Arc<dyn FtpClientFactory> {
        Arc::new(TestFactory {
            state: Arc::clone(&self.state),
        })
    }

    /// Create a directory, creating missing parents.
    pub fn add_dir(&self, path: &str) {
        let mut state = lock_state(&self.state);
        let mut node = &mut state.root;
        for component in components(path) {
            node = match node
                .entry(component.to_string())
                .or_insert_with(|| Node::Dir(BTreeMap::new()))
            {
                Node::Dir(children) => children,
                Node::File(_) => panic!("'{path}' crosses a file"),
            };
        }
    }

    /// Create a file with `content`, creating missing parent directories.
    pub fn add_file(&self, path: &str, content: &[u8]) {
        let components: Vec<_> = components(path).collect();
        let (name, parents) = components.split_last().expect("file path may not be empty");

        let mut state = lock_state(&self.state);
        let mut node = &mut state.root;
        for component in parents {
            node = match node
                .entry(component.to_string())
                .or_insert_with(|| Node::Dir(BTreeMap::new()))
            {
                Node::Dir(children) => children,
                Node::File(_) => panic!("'{path}' crosses a file"),
            };
        }
        node.insert(name.to_string(), Node::File(content.to_vec()));
    }

    /// The current content of a file, `None` if absent or a directory.
    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        let state = lock_state(&self.state);
        match state.find(path)? {
            Node::File(content) => Some(content.clone()),
            Node::Dir(_) => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        lock_state(&self.state).find(path).is_some()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(lock_state(&self.state).find(path), Some(Node::Dir(_)))
    }

    /// Remove an entry out-of-band, simulating a concurrent deletion by
    /// another party.
    pub fn remove(&self, path: &str) {
        let mut state = lock_state(&self.state);
        state.remove(path);
    }

    /// Paths deleted through the protocol, in deletion order.
    pub fn delete_log(&self) -> Vec<String> {
        lock_state(&self.state).delete_log.clone()
    }

    /// Number of control connections opened so far.
    pub fn connect_count(&self) -> usize {
        lock_state(&self.state).connect_count
    }

    /// Number of currently live control connections.
    pub fn live_connections(&self) -> usize {
        lock_state(&self.state).live_connections
    }

    /// Highest number of simultaneously live control connections seen.
    pub fn max_live_connections(&self) -> usize {
        lock_state(&self.state).max_live_connections
    }

    /// Sabotage subsequent connection attempts.
    pub fn fail_connects(&self, failure: ConnectFailure) {
        lock_state(&self.state).connect_failure = Some(failure);
    }

    /// Make subsequent logins fail with the given reply code.
    pub fn fail_logins_with_reply(&self, code: u16) {
        lock_state(&self.state).login_reply = Some(code);
    }
}

impl State {
    fn find(&self, path: &str) -> Option<&Node> {
        let mut components = components(path);
        let first = match components.next() {
            Some(first) => first,
            // The root itself.
            None => return None,
        };

        let mut node = self.root.get(first)?;
        for component in components {
            node = match node {
                Node::Dir(children) => children.get(component)?,
                Node::File(_) => return None,
            };
        }
        Some(node)
    }

    fn parent_of<'p>(&mut self, path: &'p str) -> Option<(&mut BTreeMap<String, Node>, &'p str)> {
        let components: Vec<_> = components(path).collect();
        let (name, parents) = components.split_last()?;

        let mut node = &mut self.root;
        for component in parents {
            node = match node.get_mut(*component) {
                Some(Node::Dir(children)) => children,
                _ => return None,
            };
        }
        Some((node, name))
    }

    fn remove(&mut self, path: &str) -> Option<Node> {
        let (parent, name) = self.parent_of(path)?;
        parent.remove(name)
    }
}

struct TestFactory {
    state: Arc<Mutex<State>>,
}

impl FtpClientFactory for TestFactory {
    fn create(&self) -> Box<dyn FtpClient> {
        Box::new(TestClient {
            state: Arc::clone(&self.state),
            cwd: "/".to_string(),
            connected: false,
            reply: 0,
        })
    }
}

struct TestClient {
    state: Arc<Mutex<State>>,
    cwd: String,
    connected: bool,
    reply: u16,
}

impl TestClient {
    /// Resolve a possibly relative path against the session working
    /// directory into an absolute normalized path.
    fn resolve(&self, path: &str) -> String {
        let mut resolved: Vec<String> = if path.starts_with('/') {
            Vec::new()
        } else {
            components(&self.cwd).map(str::to_string).collect()
        };

        for component in path.split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    resolved.pop();
                }
                other => resolved.push(other.to_string()),
            }
        }

        format!("/{}", resolved.join("/"))
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}

// Borrows only the state field, leaving the caller's other fields free to
// assign while the guard is live.
fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn entry_for(name: &str, node: &Node) -> FtpEntry {
    FtpEntry {
        name: name.to_string(),
        size: match node {
            Node::File(content) => content.len() as u64,
            Node::Dir(_) => 0,
        },
        modified: Some(SystemTime::UNIX_EPOCH),
        is_directory: matches!(node, Node::Dir(_)),
    }
}

fn synthetic_entry(name: &str) -> FtpEntry {
    FtpEntry {
        name: name.to_string(),
        size: 0,
        modified: None,
        is_directory: true,
    }
}

#[async_trait]
impl FtpClient for TestClient {
    async fn connect(&mut self, _host: &str, _port: u16) -> io::Result<()> {
        let failure = lock_state(&self.state).connect_failure;
        match failure {
            Some(ConnectFailure::Timeout) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
            }
            Some(ConnectFailure::Refused) => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ));
            }
            Some(ConnectFailure::UnknownHost) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "failed to lookup address information",
                ));
            }
            Some(ConnectFailure::Reply(code)) => {
                let mut state = lock_state(&self.state);
                state.connect_count += 1;
                state.live_connections += 1;
                state.max_live_connections =
                    state.max_live_connections.max(state.live_connections);
                self.connected = true;
                self.reply = code;
                return Ok(());
            }
            None => {}
        }

        let mut state = lock_state(&self.state);
        state.connect_count += 1;
        state.live_connections += 1;
        state.max_live_connections = state.max_live_connections.max(state.live_connections);
        self.connected = true;
        self.reply = 220;
        Ok(())
    }

    async fn login(&mut self, _user: &str, _password: &str) -> io::Result<bool> {
        if let Some(code) = lock_state(&self.state).login_reply {
            self.reply = code;
            return Ok(false);
        }
        self.reply = 230;
        Ok(true)
    }

    fn reply_code(&self) -> u16 {
        self.reply
    }

    async fn noop(&mut self) -> io::Result<()> {
        if !self.connected {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "not connected"));
        }
        self.reply = 200;
        Ok(())
    }

    async fn retrieve(&mut self, path: &str) -> io::Result<ByteStream> {
        let path = self.resolve(path);
        let state = lock_state(&self.state);
        match state.find(&path) {
            Some(Node::File(content)) => {
                let chunks: Vec<io::Result<Bytes>> = content
                    .chunks(CHUNK_LEN.max(1))
                    .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                    .collect();
                Ok(Box::pin(futures_util::stream::iter(chunks)))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {path}"),
            )),
        }
    }

    async fn store(&mut self, path: &str, mut content: ByteStream, append: bool) -> io::Result<()> {
        let mut data = Vec::new();
        while let Some(chunk) = content.next().await {
            data.extend_from_slice(&chunk?);
        }

        let path = self.resolve(path);
        let mut state = lock_state(&self.state);
        let (parent, name) = state.parent_of(&path).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such directory: {path}"))
        })?;

        match parent.get_mut(name) {
            Some(Node::File(existing)) if append => existing.extend_from_slice(&data),
            Some(Node::Dir(_)) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("is a directory: {path}"),
                ));
            }
            _ => {
                parent.insert(name.to_string(), Node::File(data));
            }
        }
        self.reply = 226;
        Ok(())
    }

    async fn complete_pending_command(&mut self) -> io::Result<()> {
        self.reply = 226;
        Ok(())
    }

    async fn delete_file(&mut self, path: &str) -> io::Result<bool> {
        let path = self.resolve(path);
        let mut state = lock_state(&self.state);
        match state.find(&path) {
            Some(Node::File(_)) => {
                state.remove(&path);
                state.delete_log.push(path);
                self.reply = 250;
                Ok(true)
            }
            _ => {
                self.reply = 550;
                Ok(false)
            }
        }
    }

    async fn list_entries(&mut self, path: &str) -> io::Result<Vec<FtpEntry>> {
        let path = self.resolve(path);
        let state = lock_state(&self.state);

        if path == "/" {
            let mut entries = vec![synthetic_entry("."), synthetic_entry("..")];
            entries.extend(state.root.iter().map(|(name, node)| entry_for(name, node)));
            return Ok(entries);
        }

        match state.find(&path) {
            Some(Node::Dir(children)) => {
                let mut entries = vec![synthetic_entry("."), synthetic_entry("..")];
                entries.extend(children.iter().map(|(name, node)| entry_for(name, node)));
                Ok(entries)
            }
            Some(node @ Node::File(_)) => {
                let name = path.rsplit('/').next().unwrap_or_default();
                Ok(vec![entry_for(name, node)])
            }
            None => Ok(Vec::new()),
        }
    }

    async fn change_working_directory(&mut self, path: &str) -> io::Result<bool> {
        let path = self.resolve(path);
        let ok = path == "/" || matches!(lock_state(&self.state).find(&path), Some(Node::Dir(_)));
        if ok {
            self.cwd = path;
            self.reply = 250;
        } else {
            self.reply = 550;
        }
        Ok(ok)
    }

    async fn change_to_parent_directory(&mut self) -> io::Result<bool> {
        self.cwd = self.resolve("..");
        self.reply = 250;
        Ok(true)
    }

    async fn make_directory(&mut self, path: &str) -> io::Result<bool> {
        let path = self.resolve(path);
        let mut state = lock_state(&self.state);
        let Some((parent, name)) = state.parent_of(&path) else {
            self.reply = 550;
            return Ok(false);
        };
        if parent.contains_key(name) {
            self.reply = 550;
            return Ok(false);
        }
        parent.insert(name.to_string(), Node::Dir(BTreeMap::new()));
        self.reply = 257;
        Ok(true)
    }

    async fn remove_directory(&mut self, path: &str) -> io::Result<bool> {
        let path = self.resolve(path);
        let mut state = lock_state(&self.state);
        match state.find(&path) {
            Some(Node::Dir(children)) if children.is_empty() => {
                state.remove(&path);
                state.delete_log.push(path);
                self.reply = 250;
                Ok(true)
            }
            _ => {
                self.reply = 550;
                Ok(false)
            }
        }
    }

    fn set_transfer_mode(&mut self, _mode: TransferMode) {}

    fn set_passive_mode(&mut self, _passive: bool) {}

    fn set_response_timeout(&mut self, _timeout: Duration) {}

    async fn disconnect(&mut self) -> io::Result<()> {
        if self.connected {
            self.connected = false;
            lock_state(&self.state).live_connections -= 1;
        }
        Ok(())
    }
}

impl Drop for TestClient {
    fn drop(&mut self) {
        if self.connected {
            lock_state(&self.state).live_connections -= 1;
        }
    }
}
