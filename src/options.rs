use std::{num::NonZeroUsize, time::Duration};

use crate::client::TransferMode;

const DEFAULT_PORT: u16 = 21;
const DEFAULT_MAX_CONNECTIONS: usize = 8;

/// Options for connecting to an FTP server.
///
/// Timeouts are applied once per connection at acquisition/borrow time;
/// they are not adjustable for an in-flight call.
#[derive(Debug, Clone)]
pub struct FtpOptions {
    host: String,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    working_dir: Option<String>,
    connection_timeout: Option<Duration>,
    response_timeout: Option<Duration>,
    transfer_mode: Option<TransferMode>,
    passive: Option<bool>,
    max_connections: Option<NonZeroUsize>,
    time_between_size_check: Option<Duration>,
}

impl FtpOptions {
    /// Create a new set of options for the given host with every other
    /// field at its default.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            username: None,
            password: None,
            working_dir: None,
            connection_timeout: None,
            response_timeout: None,
            transfer_mode: None,
            passive: None,
            max_connections: None,
            time_between_size_check: None,
        }
    }

    /// Set the control connection port.
    ///
    /// Defaults to 21.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the username to authenticate with.
    ///
    /// Defaults to `anonymous`.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password to authenticate with.
    ///
    /// Defaults to the empty string.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// The directory to consider the root of every relative path used with
    /// this connection.
    ///
    /// Defaults to the remote server default.
    pub fn working_dir(mut self, working_dir: impl Into<String>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    /// Timeout for establishing the control connection.
    ///
    /// Defaults to no timeout beyond what the OS applies.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Timeout for each server reply, configured on the client when a
    /// connection is borrowed.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// The transfer mode to be used.
    ///
    /// Defaults to [`TransferMode::Binary`].
    pub fn transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer_mode = Some(mode);
        self
    }

    /// Whether to use passive mode. Set to `false` to switch to active
    /// mode.
    ///
    /// Defaults to `true`.
    pub fn passive(mut self, passive: bool) -> Self {
        self.passive = Some(passive);
        self
    }

    /// Maximum number of concurrently checked-out connections.
    ///
    /// Recursive copy holds two connections for the whole walk and a
    /// lazy stream with freshness rechecks enabled briefly holds a second
    /// one, so this should account for held-during-traversal semantics and
    /// never be less than 2 in those setups.
    ///
    /// Defaults to 8.
    pub fn max_connections(mut self, max_connections: NonZeroUsize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    /// How often a lazy content stream re-fetches the source attributes to
    /// detect concurrent deletion or modification.
    ///
    /// Disabled by default; detection is advisory either way.
    pub fn time_between_size_check(mut self, interval: Duration) -> Self {
        self.time_between_size_check = Some(interval);
        self
    }
}

impl FtpOptions {
    pub(crate) fn get_host(&self) -> &str {
        &self.host
    }

    pub(crate) fn get_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub(crate) fn get_username(&self) -> &str {
        self.username.as_deref().unwrap_or("anonymous")
    }

    pub(crate) fn get_password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    pub(crate) fn get_working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    pub(crate) fn get_connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout
    }

    pub(crate) fn get_response_timeout(&self) -> Option<Duration> {
        self.response_timeout
    }

    pub(crate) fn get_transfer_mode(&self) -> TransferMode {
        self.transfer_mode.unwrap_or(TransferMode::Binary)
    }

    pub(crate) fn get_passive(&self) -> bool {
        self.passive.unwrap_or(true)
    }

    pub(crate) fn get_max_connections(&self) -> usize {
        self.max_connections
            .map(NonZeroUsize::get)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    pub(crate) fn get_time_between_size_check(&self) -> Option<Duration> {
        self.time_between_size_check
    }
}
