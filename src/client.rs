use std::{io, pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;

/// Content delivered by [`FtpClient::retrieve`] and consumed by
/// [`FtpClient::store`].
///
/// The stream owns its data connection; the control connection stays usable
/// for reply handling via [`FtpClient::complete_pending_command`] once the
/// stream is drained or dropped.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Transfer mode negotiated on the control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Image type, bytes are transferred unmodified.
    Binary,
    /// Text type with line ending translation.
    Ascii,
}

/// How [`crate::RemoteSession::write`] treats an existing entry at the
/// target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Add to existing content, creating the file if absent.
    Append,
    /// Replace the existing content.
    Overwrite,
    /// Fail if the target already exists.
    CreateNew,
}

/// A single entry as reported by the server in a directory listing.
///
/// This is the native metadata [`crate::FileAttributes`] is rebuilt from;
/// the `name` is relative to the listed directory and may be one of the
/// synthetic `.`/`..` markers.
#[derive(Debug, Clone)]
pub struct FtpEntry {
    /// Name of the entry within the listed directory.
    pub name: String,
    /// Size in bytes, 0 for directories on most servers.
    pub size: u64,
    /// Last modification time, if the server reported one.
    pub modified: Option<std::time::SystemTime>,
    /// Whether the entry denotes a directory.
    pub is_directory: bool,
}

/// Wire-level FTP protocol client.
///
/// This crate does not implement the command grammar itself; it drives an
/// implementation of this trait. All methods operate on the single stateful
/// control connection the client owns, so a client must never be shared
/// between two logical operations.
///
/// Failure conventions the engine relies on:
///
/// - connect/login failures are `io::Error`s: [`io::ErrorKind::TimedOut`]
///   for a socket timeout, [`io::ErrorKind::ConnectionRefused`] for a
///   refused connection, [`io::ErrorKind::NotFound`] for a resolver
///   failure. Server rejections leave the reply code readable through
///   [`FtpClient::reply_code`].
/// - [`FtpClient::retrieve`] reports a missing file as
///   [`io::ErrorKind::NotFound`].
/// - the `bool` returning operations report server refusal as `Ok(false)`
///   and reserve `Err` for transport failures, mirroring the reply-code
///   channel of the wire protocol.
#[async_trait]
pub trait FtpClient: Send {
    /// Open the control connection.
    async fn connect(&mut self, host: &str, port: u16) -> io::Result<()>;

    /// Authenticate on an established control connection.
    ///
    /// Returns `Ok(false)` if the server rejected the credentials; the
    /// rejecting reply code is available via [`FtpClient::reply_code`].
    async fn login(&mut self, user: &str, password: &str) -> io::Result<bool>;

    /// Last reply code received on the control connection, 0 if none.
    fn reply_code(&self) -> u16;

    /// Protocol no-op, used as the health check before pool reuse.
    async fn noop(&mut self) -> io::Result<()>;

    /// Start retrieving the content of the file at `path`.
    async fn retrieve(&mut self, path: &str) -> io::Result<ByteStream>;

    /// Store `content` at `path`, appending if `append` is set.
    async fn store(&mut self, path: &str, content: ByteStream, append: bool) -> io::Result<()>;

    /// Read the final transfer reply after a retrieve finished or was
    /// abandoned, leaving the control connection usable again.
    async fn complete_pending_command(&mut self) -> io::Result<()>;

    /// Delete the regular file at `path`.
    async fn delete_file(&mut self, path: &str) -> io::Result<bool>;

    /// List the entries of the directory at `path`.
    ///
    /// A missing path yields an empty listing, matching LIST on servers
    /// that reply with an empty data transfer.
    async fn list_entries(&mut self, path: &str) -> io::Result<Vec<FtpEntry>>;

    /// Change the working directory of the control connection.
    async fn change_working_directory(&mut self, path: &str) -> io::Result<bool>;

    /// Move the working directory to its parent.
    async fn change_to_parent_directory(&mut self) -> io::Result<bool>;

    /// Create a single directory; the parent must already exist.
    async fn make_directory(&mut self, path: &str) -> io::Result<bool>;

    /// Remove an empty directory.
    async fn remove_directory(&mut self, path: &str) -> io::Result<bool>;

    /// Switch between binary and ascii transfers.
    fn set_transfer_mode(&mut self, mode: TransferMode);

    /// Toggle passive mode for data connections.
    fn set_passive_mode(&mut self, passive: bool);

    /// Timeout applied to every subsequent reply read.
    fn set_response_timeout(&mut self, timeout: Duration);

    /// Close the control connection.
    async fn disconnect(&mut self) -> io::Result<()>;
}

/// Factory producing unconnected [`FtpClient`]s for the pool.
///
/// This is the seam tests use to substitute an in-memory server for a real
/// client implementation.
pub trait FtpClientFactory: Send + Sync {
    /// Create a new, unconnected client.
    fn create(&self) -> Box<dyn FtpClient>;
}
