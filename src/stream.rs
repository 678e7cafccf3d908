use std::{
    future::poll_fn,
    mem,
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use derive_destructure2::destructure;
use ftp_remote_fs_error::Error;

use crate::{
    client::ByteStream, metadata::FileAttributes, session::RemoteSession, source::ConnectionSource,
};

/// Callback run after a stream finished but before its session is released
/// back to the pool.
///
/// A hook error never blocks the release; it is surfaced to the caller
/// once the session has been returned.
pub type BeforeRelease = Box<dyn FnOnce(&mut RemoteSession) -> Result<(), Error> + Send>;

enum StreamState {
    Unopened,
    Open {
        session: RemoteSession,
        content: ByteStream,
    },
    Closed,
}

/// A readable byte stream over a remote file that does not acquire its
/// connection until the first read.
///
/// Construction is cheap and performs no network traffic. On the first
/// call to [`LazyRemoteStream::read_chunk`] a [`RemoteSession`] is checked
/// out of the [`ConnectionSource`] and held until the stream is drained,
/// closed or dropped, at which point it is released exactly once.
///
/// If a recheck interval is configured, the stream periodically re-fetches
/// the source attributes on a separate short-lived session to detect
/// concurrent deletion. Detection is advisory by nature: the file can
/// still vanish between a check and the next read, and data already
/// delivered is never invalidated.
///
/// The stream is single-owner; reads take `&mut self` and closing consumes
/// it.
#[derive(destructure)]
pub struct LazyRemoteStream {
    source: ConnectionSource,
    attributes: FileAttributes,
    time_between_size_check: Option<Duration>,
    last_check: Option<Instant>,
    state: StreamState,
    before_release: Option<BeforeRelease>,
}

impl std::fmt::Debug for LazyRemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyRemoteStream")
            .field("path", &self.attributes.path())
            .field(
                "state",
                match self.state {
                    StreamState::Unopened => &"unopened",
                    StreamState::Open { .. } => &"open",
                    StreamState::Closed => &"closed",
                },
            )
            .finish_non_exhaustive()
    }
}

impl LazyRemoteStream {
    /// Create an unconnected stream over the file described by
    /// `attributes`.
    ///
    /// The recheck interval defaults to the one configured on the
    /// source's [`crate::FtpOptions`].
    pub fn new(source: ConnectionSource, attributes: FileAttributes) -> Self {
        let time_between_size_check = source.options().get_time_between_size_check();
        Self {
            source,
            attributes,
            time_between_size_check,
            last_check: None,
            state: StreamState::Unopened,
            before_release: None,
        }
    }

    /// Install a hook that runs after the stream finished but before the
    /// session is released.
    pub fn before_release(
        mut self,
        hook: impl FnOnce(&mut RemoteSession) -> Result<(), Error> + Send + 'static,
    ) -> Self {
        self.before_release = Some(Box::new(hook));
        self
    }

    /// The snapshot this stream was constructed for.
    pub fn attributes(&self) -> &FileAttributes {
        &self.attributes
    }

    /// Whether the stream has reached its terminal state.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, StreamState::Closed)
    }

    /// Read the next chunk of content, acquiring the session on the first
    /// call.
    ///
    /// Returns `Ok(None)` once the content is exhausted; exhaustion
    /// releases the session. A file deleted concurrently on the server
    /// surfaces as [`Error::DeletedWhileReading`].
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        if matches!(self.state, StreamState::Closed) {
            return Ok(None);
        }

        if matches!(self.state, StreamState::Unopened) {
            self.open().await?;
        }

        self.maybe_recheck_attributes().await?;

        let StreamState::Open { content, .. } = &mut self.state else {
            return Ok(None);
        };

        let chunk = poll_fn(|cx| content.as_mut().poll_next(cx)).await;
        match chunk {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(e)) => Err(Error::from(e).wrap(format!(
                "Found exception while reading file '{}'",
                self.attributes.path()
            ))),
            None => {
                let state = mem::replace(&mut self.state, StreamState::Closed);
                let hook = self.before_release.take();
                finish(&self.source, self.attributes.path(), state, hook).await?;
                Ok(None)
            }
        }
    }

    /// Drain the stream into a single buffer.
    pub async fn read_to_end(&mut self) -> Result<Bytes, Error> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.read_chunk().await? {
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Close the stream, releasing its session exactly once.
    ///
    /// The pre-release hook runs first; even if it fails, the session is
    /// released before the hook error is surfaced. Closing an unopened or
    /// already finished stream is a no-op.
    pub async fn close(self) -> Result<(), Error> {
        let (source, attributes, _interval, _last_check, state, hook) = self.destructure();
        finish(&source, attributes.path(), state, hook).await
    }

    async fn open(&mut self) -> Result<(), Error> {
        let mut session = self.source.acquire().await?;

        match session.retrieve(&self.attributes).await {
            Ok(content) => {
                self.last_check = Some(Instant::now());
                self.state = StreamState::Open { session, content };
                Ok(())
            }
            Err(err) => {
                // The session never started a transfer, so it can go back
                // to the pool as-is; the stream is finished either way.
                if let Some(hook) = self.before_release.take() {
                    if let Err(hook_err) = hook(&mut session) {
                        tracing::warn!(error = %hook_err, "pre-release hook failed");
                    }
                }
                self.source.release(session);
                self.state = StreamState::Closed;

                Err(match err {
                    Error::NotFound(path) => Error::DeletedWhileReading(path),
                    other => other,
                })
            }
        }
    }

    /// Re-fetch the source attributes on a separate pooled session if the
    /// configured interval has elapsed.
    ///
    /// Advisory staleness detection, not transactional read isolation.
    async fn maybe_recheck_attributes(&mut self) -> Result<(), Error> {
        let Some(interval) = self.time_between_size_check else {
            return Ok(());
        };
        let due = match self.last_check {
            Some(last) => last.elapsed() >= interval,
            None => true,
        };
        if !due {
            return Ok(());
        }
        self.last_check = Some(Instant::now());

        let path = self.attributes.path().to_string();
        let mut probe = self
            .source
            .acquire()
            .await
            .map_err(|e| e.wrap(format!("Could not obtain connection to fetch file '{path}'")))?;
        let fresh = probe.attributes(&path).await;
        self.source.release(probe);

        match fresh? {
            Some(updated) => {
                if updated.len() != self.attributes.len() {
                    tracing::warn!(
                        path = path.as_str(),
                        was = self.attributes.len(),
                        now = updated.len(),
                        "file size changed while it was being read"
                    );
                }
                Ok(())
            }
            None => {
                tracing::error!(path = path.as_str(), "file no longer exists");
                Err(Error::DeletedWhileReading(path))
            }
        }
    }
}

/// Tear down a finished stream: run the hook, consume the pending transfer
/// reply and release the session, in that order. The release happens on
/// every path.
async fn finish(
    source: &ConnectionSource,
    path: &str,
    state: StreamState,
    hook: Option<BeforeRelease>,
) -> Result<(), Error> {
    let StreamState::Open {
        mut session,
        content,
    } = state
    else {
        return Ok(());
    };

    // Drop the data connection before reading the final transfer reply.
    drop(content);

    let hook_result = match hook {
        Some(hook) => hook(&mut session),
        None => Ok(()),
    };

    if let Err(e) = session.complete_pending().await {
        tracing::debug!(path, error = %e, "failed to complete pending transfer reply");
    }

    source.release(session);

    hook_result.map_err(|e| e.wrap(format!("Error closing stream for '{path}'")))
}

/// Abandoned streams release their session on drop so a forgotten stream
/// cannot leak a pooled connection. The pending transfer reply cannot be
/// consumed here; the pool's health check weeds the connection out on the
/// next borrow if it was left unusable.
impl Drop for LazyRemoteStream {
    fn drop(&mut self) {
        let state = mem::replace(&mut self.state, StreamState::Closed);
        if let StreamState::Open {
            mut session,
            content,
        } = state
        {
            drop(content);
            if let Some(hook) = self.before_release.take() {
                if let Err(e) = hook(&mut session) {
                    tracing::warn!(error = %e, "pre-release hook failed during drop");
                }
            }
            tracing::debug!(
                path = self.attributes.path(),
                "releasing session of dropped stream"
            );
            self.source.release(session);
        }
    }
}
