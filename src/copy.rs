use async_recursion::async_recursion;
use ftp_remote_fs_error::Error;

use crate::{
    client::WriteMode,
    delete,
    metadata::FileAttributes,
    session::RemoteSession,
    source::ConnectionSource,
    utils::{is_virtual_directory, join_path, normalize_path},
};

/// Replicates a file or a whole directory tree onto a target path using
/// two independent connections: the caller's reader session for the source
/// side and a second session obtained from the pool for the destination
/// side.
#[derive(Debug, Clone)]
pub struct CopyEngine {
    connections: ConnectionSource,
}

impl CopyEngine {
    /// Create an engine drawing its writer connections from `connections`.
    pub fn new(connections: ConnectionSource) -> Self {
        Self { connections }
    }

    /// Copy the entry described by `source` to `target_path`.
    ///
    /// The caller keeps ownership of `reader`; the writer session this
    /// engine obtains is released exactly once on every exit path,
    /// including failures deep in the recursion. Directories are
    /// replicated parent-first; an existing file target fails with
    /// [`Error::AlreadyExists`] unless `overwrite` is set, in which case
    /// the previous entry is deleted first.
    pub async fn copy(
        &self,
        reader: &mut RemoteSession,
        source: &FileAttributes,
        target_path: &str,
        overwrite: bool,
    ) -> Result<(), Error> {
        let target = normalize_path(target_path);

        let writer = self.connections.acquire().await.map_err(|e| {
            Error::operation(
                format!(
                    "FTP copy operations require the use of two FTP connections. An exception \
                     was found trying to obtain a second connection to copy the path '{}' to '{}'",
                    source.path(),
                    target
                ),
                e,
            )
        })?;

        // Guarantees exactly one release of the writer session no matter
        // which way the recursion exits.
        let mut writer = scopeguard::guard(writer, |session| self.connections.release(session));

        let result = if source.is_directory() {
            self.copy_directory(reader, source.path(), &target, overwrite, &mut writer)
                .await
        } else {
            self.copy_file(reader, source, &target, overwrite, &mut writer)
                .await
        };

        // Releases the writer session.
        drop(writer);

        result.map_err(|e| {
            e.wrap(format!(
                "Found exception copying file '{}' to '{}'",
                source.path(),
                target
            ))
        })
    }

    /// Replicate a directory: create the target, then copy every
    /// non-synthetic child into it, threading the same writer session
    /// through the recursion.
    #[async_recursion]
    async fn copy_directory(
        &self,
        reader: &mut RemoteSession,
        source_path: &str,
        target: &str,
        overwrite: bool,
        writer: &mut RemoteSession,
    ) -> Result<(), Error> {
        tracing::debug!(source = source_path, target, "copying directory");

        if writer.attributes(target).await?.is_none() {
            writer.mkdirs(target).await?;
        }

        for child in reader.list(source_path).await? {
            if is_virtual_directory(child.name()) {
                continue;
            }

            let child_target = join_path(target, child.name());
            if child.is_directory() {
                self.copy_directory(reader, child.path(), &child_target, overwrite, writer)
                    .await?;
            } else {
                self.copy_file(reader, &child, &child_target, overwrite, writer)
                    .await?;
            }
        }

        Ok(())
    }

    /// Copy one individual file into `target`.
    async fn copy_file(
        &self,
        reader: &mut RemoteSession,
        source: &FileAttributes,
        target: &str,
        overwrite: bool,
        writer: &mut RemoteSession,
    ) -> Result<(), Error> {
        tracing::debug!(source = source.path(), target, "copying file");

        if let Some(existing) = writer.attributes(target).await? {
            if !overwrite {
                return Err(Error::AlreadyExists(target.to_string()));
            }
            delete::delete(writer, existing.path()).await?;
        }

        let content = reader.retrieve(source).await.map_err(|e| {
            e.wrap(format!(
                "Could not read file '{}' while trying to copy it to remote path '{}'",
                source.path(),
                target
            ))
        })?;

        let mode = if overwrite {
            WriteMode::Overwrite
        } else {
            WriteMode::CreateNew
        };

        // The whole copy is already serialized by the caller holding both
        // connections, so the internal write skips destination locking.
        let write_result = writer.write(target, content, mode, true, false).await;

        if let Err(e) = reader.complete_pending().await {
            tracing::debug!(
                source = source.path(),
                error = %e,
                "failed to complete pending transfer reply after copy"
            );
        }

        write_result.map_err(|e| {
            e.wrap(format!(
                "Found exception while trying to copy file '{}' to remote path '{}'",
                source.path(),
                target
            ))
        })
    }
}
