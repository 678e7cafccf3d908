use std::io;

use ftp_remote_fs_error::Error;
use tokio::sync::OwnedSemaphorePermit;

use crate::{
    client::{ByteStream, FtpClient, WriteMode},
    lock::PathLockFactory,
    metadata::FileAttributes,
    utils::{file_name, normalize_path, parent_path},
};

/// A single checked-out, stateful connection to the remote server.
///
/// Obtained from [`crate::ConnectionSource::acquire`] and owned by exactly
/// one logical operation for the duration of its checkout. The working
/// directory and transfer mode are implicit protocol state of the wrapped
/// client, which is why a session must never be shared between two
/// concurrent operations.
///
/// Dropping a session discards its connection; returning it for reuse goes
/// through [`crate::ConnectionSource::release`].
pub struct RemoteSession {
    client: Box<dyn FtpClient>,
    locks: PathLockFactory,
    // Held for the whole checkout so the pool accounts for sessions that
    // live across long traversals, not just per-call checkouts.
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession").finish_non_exhaustive()
    }
}

impl RemoteSession {
    pub(crate) fn new(
        client: Box<dyn FtpClient>,
        locks: PathLockFactory,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            client,
            locks,
            _permit: permit,
        }
    }

    pub(crate) fn into_client(self) -> Box<dyn FtpClient> {
        self.client
    }

    /// Start retrieving the content described by `attributes`.
    ///
    /// The session must stay checked out until the returned stream is
    /// drained and [`RemoteSession::complete_pending`] has run.
    pub async fn retrieve(&mut self, attributes: &FileAttributes) -> Result<ByteStream, Error> {
        let path = attributes.path();
        if attributes.is_directory() {
            return Err(Error::IllegalPath {
                path: path.to_string(),
                reason: "cannot read the content of a directory".to_string(),
            });
        }

        tracing::debug!(path, "retrieving file content");
        match self.client.retrieve(path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::NotFound(path.to_string()))
            }
            Err(e) => Err(Error::from(e)
                .wrap(format!("Found exception while trying to read file '{path}'"))),
        }
    }

    /// Consume the final transfer reply of a finished or abandoned
    /// retrieval, leaving the control connection usable again.
    pub async fn complete_pending(&mut self) -> Result<(), Error> {
        self.client.complete_pending_command().await?;
        Ok(())
    }

    /// A point-in-time snapshot of the entry at `path`, `None` if no entry
    /// exists.
    ///
    /// Resolved by listing the parent directory, the only portable way to
    /// obtain metadata over the wire protocol.
    pub async fn attributes(&mut self, path: &str) -> Result<Option<FileAttributes>, Error> {
        let normalized = normalize_path(path);
        if normalized == "/" {
            return Ok(Some(FileAttributes::root()));
        }

        let parent = parent_path(&normalized).unwrap_or_else(|| "/".to_string());
        let name = file_name(&normalized);

        let entries = match self.client.list_entries(&parent).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(entries
            .into_iter()
            .find(|entry| entry.name == name)
            .map(|entry| FileAttributes::from_entry(&parent, entry)))
    }

    /// Like [`RemoteSession::attributes`] but fails with
    /// [`Error::NotFound`] when no entry exists.
    pub async fn existing_attributes(&mut self, path: &str) -> Result<FileAttributes, Error> {
        let normalized = normalize_path(path);
        self.attributes(&normalized)
            .await?
            .ok_or(Error::NotFound(normalized))
    }

    /// List the directory at `path`, resolving every entry against it.
    ///
    /// Synthetic `.`/`..` entries are returned as the server reported
    /// them; directory walks are responsible for skipping them.
    pub async fn list(&mut self, path: &str) -> Result<Vec<FileAttributes>, Error> {
        let normalized = normalize_path(path);
        let entries = self
            .client
            .list_entries(&normalized)
            .await
            .map_err(|e| {
                Error::from(e).wrap(format!(
                    "Could not list contents of directory '{normalized}'"
                ))
            })?;

        Ok(entries
            .into_iter()
            .map(|entry| FileAttributes::from_entry(&normalized, entry))
            .collect())
    }

    /// Write `content` to `path` honoring the write mode.
    ///
    /// With `create_parent_directory` set, missing intermediate
    /// directories are created; otherwise a missing parent fails with
    /// [`Error::IllegalPath`]. With `lock` set, the path lock is held for
    /// the duration of the write; internal writes that are already
    /// serialized by their caller pass `false`.
    pub async fn write(
        &mut self,
        path: &str,
        content: ByteStream,
        mode: WriteMode,
        create_parent_directory: bool,
        lock: bool,
    ) -> Result<(), Error> {
        let normalized = normalize_path(path);
        let _guard = if lock {
            Some(self.locks.try_acquire(&normalized)?)
        } else {
            None
        };

        match self.attributes(&normalized).await? {
            Some(existing) if existing.is_directory() => {
                return Err(Error::IllegalPath {
                    path: normalized,
                    reason: "the path points to a directory".to_string(),
                });
            }
            Some(_) if mode == WriteMode::CreateNew => {
                return Err(Error::AlreadyExists(normalized));
            }
            Some(_) => {}
            None => {
                let parent = parent_path(&normalized).unwrap_or_else(|| "/".to_string());
                match self.attributes(&parent).await? {
                    Some(attrs) if attrs.is_directory() => {}
                    Some(_) => {
                        return Err(Error::IllegalPath {
                            path: normalized,
                            reason: format!("'{parent}' exists but is not a directory"),
                        });
                    }
                    None if create_parent_directory => self.mkdirs(&parent).await?,
                    None => {
                        return Err(Error::IllegalPath {
                            path: normalized,
                            reason: format!(
                                "cannot write to file because path to it doesn't exist, \
                                 parent directory '{parent}' is missing"
                            ),
                        });
                    }
                }
            }
        }

        tracing::debug!(path = normalized.as_str(), ?mode, "writing file content");
        self.client
            .store(&normalized, content, mode == WriteMode::Append)
            .await
            .map_err(|e| {
                Error::from(e).wrap(format!(
                    "Found exception while trying to write to file '{normalized}'"
                ))
            })
    }

    /// Delete the regular file at `path` after verifying no conflicting
    /// lock is held on it.
    pub async fn delete_file(&mut self, path: &str) -> Result<(), Error> {
        let normalized = normalize_path(path);
        self.locks.verify_not_locked(&normalized)?;

        let deleted = self
            .client
            .delete_file(&normalized)
            .await
            .map_err(|e| {
                Error::from(e)
                    .wrap(format!("Found exception while deleting file '{normalized}'"))
            })?;

        if !deleted {
            return Err(Error::server(format!("Could not delete file '{normalized}'")));
        }

        tracing::debug!(path = normalized.as_str(), "successfully deleted");
        Ok(())
    }

    /// Create the directory at `path`, creating missing parents, failing
    /// with [`Error::AlreadyExists`] if an entry is already there.
    pub async fn create_directory(&mut self, path: &str) -> Result<(), Error> {
        let normalized = normalize_path(path);
        if self.attributes(&normalized).await?.is_some() {
            return Err(Error::AlreadyExists(normalized));
        }

        self.mkdirs(&normalized).await
    }

    /// Create every missing directory along `path`.
    pub(crate) async fn mkdirs(&mut self, path: &str) -> Result<(), Error> {
        let normalized = normalize_path(path);
        if normalized == "/" {
            return Ok(());
        }

        let mut prefix = String::new();
        for component in normalized.split('/').filter(|c| !c.is_empty()) {
            prefix.push('/');
            prefix.push_str(component);

            if self.attributes(&prefix).await?.is_none() {
                tracing::debug!(path = prefix.as_str(), "creating directory");
                let created = self.client.make_directory(&prefix).await.map_err(|e| {
                    Error::from(e)
                        .wrap(format!("Found exception creating directory '{prefix}'"))
                })?;
                if !created {
                    return Err(Error::server(format!(
                        "Could not create directory '{prefix}'"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Change the working directory of the underlying connection.
    pub async fn change_working_directory(&mut self, path: &str) -> Result<(), Error> {
        let normalized = normalize_path(path);
        let changed = self
            .client
            .change_working_directory(&normalized)
            .await
            .map_err(Error::from)?;

        if !changed {
            return Err(Error::IllegalPath {
                path: normalized,
                reason: "could not change working directory".to_string(),
            });
        }

        Ok(())
    }

    /// Move the working directory to its parent.
    pub async fn change_to_parent_directory(&mut self) -> Result<(), Error> {
        let changed = self
            .client
            .change_to_parent_directory()
            .await
            .map_err(Error::from)?;

        if !changed {
            return Err(Error::server(
                "Could not change to the parent directory".to_string(),
            ));
        }

        Ok(())
    }

    /// Remove the empty directory at `path`.
    ///
    /// Returns `Ok(false)` when the server refuses, e.g. because the
    /// directory is not actually empty.
    pub async fn remove_directory(&mut self, path: &str) -> Result<bool, Error> {
        let normalized = normalize_path(path);
        self.client
            .remove_directory(&normalized)
            .await
            .map_err(|e| {
                Error::from(e).wrap(format!(
                    "Found exception while trying to remove directory '{normalized}'"
                ))
            })
    }

    /// Health check used before pool reuse, delegating to the protocol
    /// no-op command.
    pub async fn validate(&mut self) -> bool {
        self.client.noop().await.is_ok()
    }
}
