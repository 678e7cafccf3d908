#![forbid(unsafe_code)]

use std::io;

use thiserror::Error as ThisError;

/// Error returned by [`ftp-remote-fs`](https://docs.rs/ftp-remote-fs).
///
/// The connection variants (`ConnectionTimeout` through `Connection`) are
/// raised only while acquiring a connection; callers use them to decide
/// whether a retry makes sense. The file-operation variants are raised by
/// the individual file operations.
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum Error {
    /// Establishing the control connection took longer than the configured
    /// connect timeout.
    #[error("Connection timed out while connecting to host '{host}' at port '{port}'")]
    ConnectionTimeout {
        /// Host the connect attempt was made against.
        host: String,
        /// Port the connect attempt was made against.
        port: u16,
    },

    /// The server actively refused the connection.
    #[error("Cannot reach host '{host}' at port '{port}': connection refused")]
    CannotReach {
        /// Host the connect attempt was made against.
        host: String,
        /// Port the connect attempt was made against.
        port: u16,
    },

    /// The host name could not be resolved.
    #[error("Could not resolve host '{host}'")]
    UnknownHost {
        /// Host name that failed to resolve.
        host: String,
    },

    /// The server rejected the supplied credentials (reply 530 or 501).
    #[error("Error code: {code} - User cannot log in")]
    InvalidCredentials {
        /// The reply code returned by the server.
        code: u16,
    },

    /// The server reported that the service is not available (reply 421).
    #[error("Error code: {code} - Service is unavailable")]
    ServiceUnavailable {
        /// The reply code returned by the server.
        code: u16,
    },

    /// Connection establishment failed with a reply code that has no more
    /// specific classification.
    #[error("Could not establish FTP connection with host '{host}' at port '{port}' - Error code: {code}")]
    Connectivity {
        /// Host the connect attempt was made against.
        host: String,
        /// Port the connect attempt was made against.
        port: u16,
        /// The reply code returned by the server.
        code: u16,
    },

    /// Connection establishment failed without a server reply code.
    #[error("Could not establish FTP connection: {0}")]
    Connection(String),

    /// The target path already denotes an existing entry.
    #[error("File '{0}' already exists. Use a different write mode or point to a path which doesn't exist")]
    AlreadyExists(String),

    /// The path cannot be used for the requested operation, e.g. its parent
    /// directory does not exist or it denotes a directory where a regular
    /// file is required.
    #[error("Cannot use path '{path}': {reason}")]
    IllegalPath {
        /// The offending path.
        path: String,
        /// Why the path cannot be used.
        reason: String,
    },

    /// No entry exists at the given path.
    #[error("Path '{0}' doesn't exist")]
    NotFound(String),

    /// A conflicting lock is held on the path by another operation.
    #[error("File '{0}' is locked by another operation")]
    FileLock(String),

    /// The file was deleted on the remote server while it was being read.
    #[error("File '{0}' was deleted while it was being read")]
    DeletedWhileReading(String),

    /// IO error raised by the underlying protocol client.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// An unclassified failure, wrapped once at the point of detection with
    /// context identifying the operation and the paths involved.
    #[error("{context}: {source}")]
    Operation {
        /// Human readable description of the failed operation.
        context: String,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Whether this error already carries a domain classification.
    ///
    /// Classified errors are propagated unchanged through recursive
    /// operations so that callers can still branch on their kind.
    pub fn is_classified(&self) -> bool {
        !matches!(self, Error::Io(_))
    }

    /// Wrap an unclassified error with contextual information.
    ///
    /// Errors that already carry a domain classification are returned
    /// unchanged, never nested inside a generic one.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        if self.is_classified() {
            self
        } else {
            Error::Operation {
                context: context.into(),
                source: Box::new(self),
            }
        }
    }

    /// Wrap unconditionally, used where an operation must report its own
    /// context even for io errors it detected itself.
    pub fn operation(context: impl Into<String>, source: Error) -> Self {
        Error::Operation {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// An operation failure reported through a negative completion reply,
    /// with no underlying io error to attach.
    pub fn server(context: impl Into<String>) -> Self {
        Error::operation(
            context,
            Error::Io(io::Error::other(
                "server returned a negative completion reply",
            )),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_keeps_classified_errors_unchanged() {
        let err = Error::AlreadyExists("/a".into()).wrap("copying '/a' to '/b'");
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn wrap_adds_context_to_io_errors() {
        let io = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let err = Error::from(io).wrap("copying '/a' to '/b'");
        match err {
            Error::Operation { context, source } => {
                assert_eq!(context, "copying '/a' to '/b'");
                assert!(matches!(*source, Error::Io(_)));
            }
            other => panic!("expected Operation, got {other:?}"),
        }
    }

    #[test]
    fn operation_error_is_not_rewrapped() {
        let io = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let err = Error::from(io).wrap("inner").wrap("outer");
        match err {
            Error::Operation { context, .. } => assert_eq!(context, "inner"),
            other => panic!("expected Operation, got {other:?}"),
        }
    }
}
