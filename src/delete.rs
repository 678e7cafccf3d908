use async_recursion::async_recursion;
use ftp_remote_fs_error::Error;

use crate::{metadata::FileAttributes, session::RemoteSession, utils::is_virtual_directory};

/// Delete the entry at `path`, recursing depth-first through directory
/// trees on the caller's session.
///
/// Children are always removed before their parent; deletion is strictly
/// post-order. A failure anywhere in the subtree aborts the whole
/// operation with that entry's error, without attempting partial cleanup
/// or continuing with siblings. Fails with [`Error::NotFound`] if no entry
/// exists at `path`.
pub async fn delete(session: &mut RemoteSession, path: &str) -> Result<(), Error> {
    let attributes = session.existing_attributes(path).await?;

    if attributes.is_directory() {
        tracing::debug!(path = attributes.path(), "preparing to delete directory");
        delete_directory(session, &attributes).await
    } else {
        session.delete_file(attributes.path()).await
    }
}

/// Remove a directory tree: descend into the directory, delete every
/// non-synthetic child, then step back to the parent and remove the now
/// empty directory itself.
#[async_recursion]
async fn delete_directory(
    session: &mut RemoteSession,
    directory: &FileAttributes,
) -> Result<(), Error> {
    let path = directory.path();
    session.change_working_directory(path).await?;

    for child in session.list(path).await.map_err(|e| {
        e.wrap(format!(
            "Could not list contents of directory '{path}' while trying to delete it"
        ))
    })? {
        if is_virtual_directory(child.name()) {
            continue;
        }

        if child.is_directory() {
            delete_directory(session, &child).await?;
        } else {
            session.delete_file(child.path()).await?;
        }
    }

    session.change_to_parent_directory().await.map_err(|e| {
        e.wrap(format!(
            "Found exception while trying to remove directory '{path}'"
        ))
    })?;

    let removed = session.remove_directory(path).await?;
    if !removed {
        return Err(Error::server(format!("Could not remove directory '{path}'")));
    }

    tracing::debug!(path, "successfully deleted");
    Ok(())
}
