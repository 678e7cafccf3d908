use std::{
    io,
    sync::{Arc, Mutex},
};

use ftp_remote_fs_error::Error;
use tokio::sync::Semaphore;

use crate::{
    client::{FtpClient, FtpClientFactory},
    lock::PathLockFactory,
    options::FtpOptions,
    session::RemoteSession,
};

/// Acquires and releases [`RemoteSession`]s from a bounded pool.
///
/// Connections are opened lazily, kept on an idle list after release and
/// health-checked with a protocol no-op before reuse. The semaphore bounds
/// the number of concurrently checked-out sessions; capacity is freed
/// whether a session is released back or simply dropped.
///
/// Cloning shares the pool.
#[derive(Clone)]
pub struct ConnectionSource {
    factory: Arc<dyn FtpClientFactory>,
    options: Arc<FtpOptions>,
    locks: PathLockFactory,
    idle: Arc<Mutex<Vec<Box<dyn FtpClient>>>>,
    semaphore: Arc<Semaphore>,
}

impl std::fmt::Debug for ConnectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSource")
            .field("host", &self.options.get_host())
            .field("port", &self.options.get_port())
            .finish_non_exhaustive()
    }
}

impl ConnectionSource {
    /// Create a pool over `factory` configured by `options`.
    pub fn new(factory: Arc<dyn FtpClientFactory>, options: FtpOptions) -> Self {
        let max_connections = options.get_max_connections();
        Self {
            factory,
            options: Arc::new(options),
            locks: PathLockFactory::new(),
            idle: Arc::new(Mutex::new(Vec::new())),
            semaphore: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// The options this pool connects with.
    pub fn options(&self) -> &FtpOptions {
        &self.options
    }

    /// The path lock factory shared by every session of this pool.
    pub fn locks(&self) -> &PathLockFactory {
        &self.locks
    }

    /// Number of idle connections currently parked in the pool.
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Check out a session, reusing a healthy idle connection or opening a
    /// new one.
    ///
    /// Waits if the maximum number of concurrently checked-out sessions is
    /// reached. Connection failures are classified so callers can tell
    /// retryable transient failures (timeout, service unavailable) from
    /// permanent ones (bad credentials).
    pub async fn acquire(&self) -> Result<RemoteSession, Error> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::Connection("connection pool is closed".to_string()))?;

        while let Some(client) = self.pop_idle() {
            let mut client = client;
            if client.noop().await.is_ok() {
                self.configure_on_borrow(&mut client);
                return Ok(RemoteSession::new(client, self.locks.clone(), permit));
            }

            tracing::debug!("discarding pooled connection that failed validation");
            let _ = client.disconnect().await;
        }

        // Permit is dropped on the error path, freeing the capacity.
        let client = self.connect_new().await?;
        Ok(RemoteSession::new(client, self.locks.clone(), permit))
    }

    /// Return `session` to the pool for reuse.
    ///
    /// Taking the session by value makes a second release of the same
    /// acquisition unrepresentable. Must be called at most once per
    /// acquisition; dropping the session instead discards its connection
    /// while still freeing pool capacity.
    pub fn release(&self, session: RemoteSession) {
        let client = session.into_client();
        self.idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(client);
        tracing::debug!("released connection back to the pool");
    }

    /// Health check hook delegating to the protocol no-op command.
    pub async fn validate(&self, session: &mut RemoteSession) -> bool {
        session.validate().await
    }

    fn pop_idle(&self) -> Option<Box<dyn FtpClient>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }

    fn configure_on_borrow(&self, client: &mut Box<dyn FtpClient>) {
        client.set_transfer_mode(self.options.get_transfer_mode());
        client.set_passive_mode(self.options.get_passive());
        if let Some(timeout) = self.options.get_response_timeout() {
            client.set_response_timeout(timeout);
        }
    }

    async fn connect_new(&self) -> Result<Box<dyn FtpClient>, Error> {
        let host = self.options.get_host();
        let port = self.options.get_port();
        let mut client = self.factory.create();

        tracing::debug!(host, port, "connecting");

        let connected = match self.options.get_connection_timeout() {
            Some(timeout) => {
                match tokio::time::timeout(timeout, client.connect(host, port)).await {
                    Ok(res) => res,
                    Err(_elapsed) => {
                        return Err(Error::ConnectionTimeout {
                            host: host.to_string(),
                            port,
                        })
                    }
                }
            }
            None => client.connect(host, port).await,
        };

        if let Err(e) = connected {
            return Err(self.classify_connect_error(e, client.reply_code()));
        }
        if !is_positive_completion(client.reply_code()) {
            return Err(self.classify_reply_code(client.reply_code()));
        }

        let user = self.options.get_username();
        let password = self.options.get_password();
        match client.login(user, password).await {
            Ok(true) => {}
            Ok(false) => return Err(self.classify_reply_code(client.reply_code())),
            Err(e) => return Err(self.classify_connect_error(e, client.reply_code())),
        }

        if let Some(working_dir) = self.options.get_working_dir() {
            let changed = client
                .change_working_directory(working_dir)
                .await
                .unwrap_or(false);
            if !changed {
                let _ = client.disconnect().await;
                return Err(Error::Connection(format!(
                    "Could not change to configured working directory '{working_dir}'"
                )));
            }
        }

        self.configure_on_borrow(&mut client);
        Ok(client)
    }

    /// Classify a low-level connect/login failure into the typed
    /// connectivity taxonomy.
    fn classify_connect_error(&self, error: io::Error, reply_code: u16) -> Error {
        let host = self.options.get_host().to_string();
        let port = self.options.get_port();

        match error.kind() {
            io::ErrorKind::TimedOut => Error::ConnectionTimeout { host, port },
            io::ErrorKind::ConnectionRefused => Error::CannotReach { host, port },
            io::ErrorKind::NotFound => Error::UnknownHost { host },
            _ if reply_code != 0 => self.classify_reply_code(reply_code),
            _ => Error::Connection(format!(
                "Could not establish FTP connection with host '{host}' at port '{port}' - {error}"
            )),
        }
    }

    /// Classify a server reply code received while connecting or logging
    /// in.
    fn classify_reply_code(&self, code: u16) -> Error {
        match code {
            530 | 501 => Error::InvalidCredentials { code },
            421 => Error::ServiceUnavailable { code },
            0 => Error::Connection(format!(
                "Could not establish FTP connection with host '{}' at port '{}'",
                self.options.get_host(),
                self.options.get_port()
            )),
            _ => Error::Connectivity {
                host: self.options.get_host().to_string(),
                port: self.options.get_port(),
                code,
            },
        }
    }
}

fn is_positive_completion(code: u16) -> bool {
    (200..300).contains(&code)
}
