//! Connection-scoped remote file access over stateful FTP sessions.
//!
//! Each logical file operation checks an exclusive connection out of a
//! bounded pool, uses it for the duration of the operation and returns it
//! exactly once, even under partial failure. The protocol is stateful
//! (working directory, transfer mode), so a session is never shared
//! between two concurrent logical operations.
//!
//! The crate does not implement the FTP command grammar itself; it drives
//! an implementation of [`FtpClient`] supplied through an
//! [`FtpClientFactory`]. All protocol calls suspend at the blocking
//! network boundary; there is no internal scheduler and no mid-operation
//! cancellation beyond the configured connection timeouts.

#![forbid(unsafe_code)]

mod client;
mod copy;
mod delete;
mod lock;
mod metadata;
mod options;
mod session;
mod source;
mod stream;
mod utils;

pub use ftp_remote_fs_error::Error;

pub use client::{ByteStream, FtpClient, FtpClientFactory, FtpEntry, TransferMode, WriteMode};
pub use copy::CopyEngine;
pub use delete::delete;
pub use lock::{PathLock, PathLockFactory};
pub use metadata::FileAttributes;
pub use options::FtpOptions;
pub use session::RemoteSession;
pub use source::ConnectionSource;
pub use stream::{BeforeRelease, LazyRemoteStream};
