use std::{
    io,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;

use ftp_remote_fs::{
    delete, ByteStream, ConnectionSource, CopyEngine, Error, FileAttributes, FtpEntry, FtpOptions,
    LazyRemoteStream, WriteMode,
};
use ftp_test_common::{ConnectFailure, TestServer};

fn source_with(server: &TestServer, options: FtpOptions) -> ConnectionSource {
    ConnectionSource::new(server.factory(), options)
}

fn source(server: &TestServer) -> ConnectionSource {
    source_with(server, FtpOptions::new("ftp.example.com"))
}

fn content_stream(content: &[u8]) -> ByteStream {
    let chunks: Vec<io::Result<Bytes>> = vec![Ok(Bytes::copy_from_slice(content))];
    Box::pin(futures_util::stream::iter(chunks))
}

fn file_attributes(parent: &str, name: &str, size: u64) -> FileAttributes {
    FileAttributes::from_entry(
        parent,
        FtpEntry {
            name: name.to_string(),
            size,
            modified: None,
            is_directory: false,
        },
    )
}

mod connectivity {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_is_classified() {
        let server = TestServer::new();
        server.fail_connects(ConnectFailure::Timeout);

        let source = source_with(
            &server,
            FtpOptions::new("ftp.example.com").connection_timeout(Duration::from_millis(50)),
        );

        let err = source.acquire().await.unwrap_err();
        assert!(
            matches!(err, Error::ConnectionTimeout { ref host, port: 21 } if host == "ftp.example.com"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn refused_connection_is_classified() {
        let server = TestServer::new();
        server.fail_connects(ConnectFailure::Refused);

        let err = source(&server).acquire().await.unwrap_err();
        assert!(
            matches!(err, Error::CannotReach { port: 21, .. }),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn unresolvable_host_is_classified() {
        let server = TestServer::new();
        server.fail_connects(ConnectFailure::UnknownHost);

        let err = source(&server).acquire().await.unwrap_err();
        assert!(
            matches!(err, Error::UnknownHost { ref host } if host == "ftp.example.com"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn rejected_login_maps_to_invalid_credentials() {
        let server = TestServer::new();
        server.fail_logins_with_reply(530);

        let err = source(&server).acquire().await.unwrap_err();
        assert!(
            matches!(err, Error::InvalidCredentials { code: 530 }),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn service_unavailable_reply_is_classified() {
        let server = TestServer::new();
        server.fail_connects(ConnectFailure::Reply(421));

        let err = source(&server).acquire().await.unwrap_err();
        assert!(
            matches!(err, Error::ServiceUnavailable { code: 421 }),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn other_negative_reply_is_generic_connectivity() {
        let server = TestServer::new();
        server.fail_connects(ConnectFailure::Reply(534));

        let err = source(&server).acquire().await.unwrap_err();
        assert!(
            matches!(err, Error::Connectivity { code: 534, .. }),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn missing_working_dir_fails_the_connection() {
        let server = TestServer::new();
        let source = source_with(
            &server,
            FtpOptions::new("ftp.example.com").working_dir("/does-not-exist"),
        );

        let err = source.acquire().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)), "unexpected error: {err}");
        // The half-configured connection was torn down, not pooled.
        assert_eq!(server.live_connections(), 0);
    }
}

mod pool {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn released_connections_are_reused() {
        let server = TestServer::new();
        let source = source(&server);

        let session = source.acquire().await.unwrap();
        source.release(session);
        assert_eq!(source.idle_connections(), 1);

        let session = source.acquire().await.unwrap();
        source.release(session);

        assert_eq!(server.connect_count(), 1);
    }

    #[tokio::test]
    async fn dropping_a_session_frees_capacity() {
        let server = TestServer::new();
        let source = source_with(
            &server,
            FtpOptions::new("ftp.example.com")
                .max_connections(NonZeroUsize::new(1).unwrap()),
        );

        let session = source.acquire().await.unwrap();
        drop(session);

        // A dropped session discards its connection but the pool slot is
        // usable again.
        let session = source.acquire().await.unwrap();
        source.release(session);

        assert_eq!(server.connect_count(), 2);
        assert_eq!(source.idle_connections(), 1);
    }

    #[tokio::test]
    async fn validate_delegates_to_noop() {
        let server = TestServer::new();
        let source = source(&server);

        let mut session = source.acquire().await.unwrap();
        assert!(source.validate(&mut session).await);
        source.release(session);
    }
}

mod sessions {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn attributes_resolve_through_the_parent_listing() {
        let server = TestServer::new();
        server.add_file("/a/f1", b"0123456789");

        let source = source(&server);
        let mut session = source.acquire().await.unwrap();

        let attrs = session.existing_attributes("/a/f1").await.unwrap();
        assert_eq!(attrs.path(), "/a/f1");
        assert_eq!(attrs.name(), "f1");
        assert_eq!(attrs.len(), 10);
        assert!(attrs.is_regular_file());

        let root = session.attributes("/").await.unwrap().unwrap();
        assert!(root.is_directory());
        assert_eq!(root.path(), "/");

        assert!(session.attributes("/a/missing").await.unwrap().is_none());
        assert!(matches!(
            session.existing_attributes("/a/missing").await.unwrap_err(),
            Error::NotFound(_)
        ));

        source.release(session);
    }

    #[tokio::test]
    async fn listing_keeps_synthetic_entries_and_resolves_paths() {
        let server = TestServer::new();
        server.add_file("/a/f1", b"x");
        server.add_dir("/a/b");

        let source = source(&server);
        let mut session = source.acquire().await.unwrap();

        let listed = session.list("/a").await.unwrap();
        let names: Vec<&str> = listed.iter().map(FileAttributes::name).collect();
        assert_eq!(names, vec![".", "..", "b", "f1"]);
        assert_eq!(listed[3].path(), "/a/f1");

        source.release(session);
    }

    #[tokio::test]
    async fn write_modes() {
        let server = TestServer::new();
        server.add_file("/a/f1", b"old");

        let source = source(&server);
        let mut session = source.acquire().await.unwrap();

        session
            .write("/a/f1", content_stream(b"new"), WriteMode::Overwrite, false, true)
            .await
            .unwrap();
        assert_eq!(server.read_file("/a/f1").unwrap(), b"new");

        session
            .write("/a/f1", content_stream(b"er"), WriteMode::Append, false, true)
            .await
            .unwrap();
        assert_eq!(server.read_file("/a/f1").unwrap(), b"newer");

        let err = session
            .write("/a/f1", content_stream(b"x"), WriteMode::CreateNew, false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)), "unexpected error: {err}");
        assert_eq!(server.read_file("/a/f1").unwrap(), b"newer");

        source.release(session);
    }

    #[tokio::test]
    async fn write_into_missing_directory() {
        let server = TestServer::new();
        let source = source(&server);
        let mut session = source.acquire().await.unwrap();

        let err = session
            .write("/x/y/f", content_stream(b"data"), WriteMode::Overwrite, false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IllegalPath { .. }), "unexpected error: {err}");
        assert!(!server.exists("/x"));

        session
            .write("/x/y/f", content_stream(b"data"), WriteMode::Overwrite, true, true)
            .await
            .unwrap();
        assert!(server.is_dir("/x/y"));
        assert_eq!(server.read_file("/x/y/f").unwrap(), b"data");

        source.release(session);
    }

    #[tokio::test]
    async fn writing_to_a_directory_path_is_rejected() {
        let server = TestServer::new();
        server.add_dir("/a");

        let source = source(&server);
        let mut session = source.acquire().await.unwrap();

        let err = session
            .write("/a", content_stream(b"x"), WriteMode::Overwrite, false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IllegalPath { .. }), "unexpected error: {err}");

        source.release(session);
    }

    #[tokio::test]
    async fn create_directory_and_duplicates() {
        let server = TestServer::new();
        let source = source(&server);
        let mut session = source.acquire().await.unwrap();

        session.create_directory("/a/b/c").await.unwrap();
        assert!(server.is_dir("/a/b/c"));

        let err = session.create_directory("/a/b").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)), "unexpected error: {err}");

        source.release(session);
    }
}

mod locks {
    use super::*;

    #[tokio::test]
    async fn locked_paths_reject_writes_and_deletes() {
        let server = TestServer::new();
        server.add_file("/a/f1", b"content");

        let source = source(&server);
        let mut session = source.acquire().await.unwrap();

        let lock = source.locks().try_acquire("/a/f1").unwrap();

        let err = session
            .write("/a/f1", content_stream(b"x"), WriteMode::Overwrite, false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FileLock(_)), "unexpected error: {err}");

        let err = session.delete_file("/a/f1").await.unwrap_err();
        assert!(matches!(err, Error::FileLock(_)), "unexpected error: {err}");
        assert!(server.exists("/a/f1"));

        drop(lock);
        session.delete_file("/a/f1").await.unwrap();
        assert!(!server.exists("/a/f1"));

        source.release(session);
    }

    #[tokio::test]
    async fn different_spellings_share_one_lock() {
        let server = TestServer::new();
        let source = source(&server);

        let _lock = source.locks().try_acquire("/a//f1/").unwrap();
        let err = source.locks().try_acquire("/a/f1").unwrap_err();
        assert!(matches!(err, Error::FileLock(_)), "unexpected error: {err}");

        // Unrelated paths do not contend.
        let _other = source.locks().try_acquire("/a/f2").unwrap();
    }
}

mod streams {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn no_connection_until_the_first_read() {
        let server = TestServer::new();
        server.add_file("/a/f1", &[7u8; 10_000]);

        let source = source(&server);
        let mut stream = LazyRemoteStream::new(source.clone(), file_attributes("/a", "f1", 10_000));

        assert_eq!(server.connect_count(), 0);

        let content = stream.read_to_end().await.unwrap();
        assert_eq!(content.len(), 10_000);
        assert_eq!(server.connect_count(), 1);

        // Exhaustion released the session back to the pool.
        assert!(stream.is_closed());
        assert_eq!(source.idle_connections(), 1);
        assert_eq!(server.live_connections(), 1);
    }

    #[tokio::test]
    async fn closing_mid_read_releases_the_session() {
        let server = TestServer::new();
        server.add_file("/a/f1", &[7u8; 10_000]);

        let source = source(&server);
        let mut stream = LazyRemoteStream::new(source.clone(), file_attributes("/a", "f1", 10_000));

        let first = stream.read_chunk().await.unwrap().unwrap();
        assert!(!first.is_empty());
        assert_eq!(source.idle_connections(), 0);

        stream.close().await.unwrap();
        assert_eq!(source.idle_connections(), 1);
    }

    #[tokio::test]
    async fn dropping_mid_read_releases_the_session() {
        let server = TestServer::new();
        server.add_file("/a/f1", &[7u8; 10_000]);

        let source = source(&server);
        let mut stream = LazyRemoteStream::new(source.clone(), file_attributes("/a", "f1", 10_000));

        stream.read_chunk().await.unwrap().unwrap();
        drop(stream);

        assert_eq!(source.idle_connections(), 1);
        assert_eq!(server.live_connections(), 1);
    }

    #[tokio::test]
    async fn file_deleted_before_the_first_read() {
        let server = TestServer::new();
        server.add_file("/a/f1", b"content");

        let source = source(&server);
        let mut stream = LazyRemoteStream::new(source.clone(), file_attributes("/a", "f1", 7));

        server.remove("/a/f1");

        let err = stream.read_chunk().await.unwrap_err();
        assert!(
            matches!(err, Error::DeletedWhileReading(ref path) if path == "/a/f1"),
            "unexpected error: {err}"
        );
        assert!(stream.is_closed());
        assert_eq!(source.idle_connections(), 1);
    }

    #[tokio::test]
    async fn freshness_recheck_detects_concurrent_deletion() {
        let server = TestServer::new();
        server.add_file("/a/f1", &[7u8; 10_000]);

        let source = source_with(
            &server,
            FtpOptions::new("ftp.example.com").time_between_size_check(Duration::ZERO),
        );
        let mut stream = LazyRemoteStream::new(source.clone(), file_attributes("/a", "f1", 10_000));

        stream.read_chunk().await.unwrap().unwrap();

        server.remove("/a/f1");

        let err = stream.read_chunk().await.unwrap_err();
        assert!(
            matches!(err, Error::DeletedWhileReading(_)),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn pre_release_hook_runs_before_the_session_returns() {
        let server = TestServer::new();
        server.add_file("/a/f1", b"content");

        let source = source(&server);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let mut stream = LazyRemoteStream::new(source.clone(), file_attributes("/a", "f1", 7))
            .before_release(move |_session| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });

        stream.read_to_end().await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(source.idle_connections(), 1);
    }

    #[tokio::test]
    async fn hook_failure_surfaces_after_the_release() {
        let server = TestServer::new();
        server.add_file("/a/f1", b"content");

        let source = source(&server);
        let mut stream = LazyRemoteStream::new(source.clone(), file_attributes("/a", "f1", 7))
            .before_release(|_session| Err(Error::Connection("hook failed".to_string())));

        let err = stream.read_to_end().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)), "unexpected error: {err}");
        assert_eq!(source.idle_connections(), 1);
    }
}

mod deletion {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn deletes_a_single_file() {
        let server = TestServer::new();
        server.add_file("/a/f1", b"content");

        let source = source(&server);
        let mut session = source.acquire().await.unwrap();

        delete(&mut session, "/a/f1").await.unwrap();
        assert!(!server.exists("/a/f1"));
        assert_eq!(server.delete_log(), vec!["/a/f1".to_string()]);

        source.release(session);
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        let server = TestServer::new();
        let source = source(&server);
        let mut session = source.acquire().await.unwrap();

        let err = delete(&mut session, "/nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "unexpected error: {err}");

        source.release(session);
    }

    #[tokio::test]
    async fn directory_tree_is_removed_children_first() {
        let server = TestServer::new();
        server.add_file("/a/f1", b"one");
        server.add_file("/a/b/f2", b"two");

        let source = source(&server);
        let mut session = source.acquire().await.unwrap();

        delete(&mut session, "/a").await.unwrap();
        assert!(!server.exists("/a"));
        assert_eq!(
            server.delete_log(),
            vec![
                "/a/b/f2".to_string(),
                "/a/b".to_string(),
                "/a/f1".to_string(),
                "/a".to_string(),
            ]
        );

        source.release(session);
    }

    #[tokio::test]
    async fn locked_file_aborts_the_recursion() {
        let server = TestServer::new();
        server.add_file("/a/f1", b"one");

        let source = source(&server);
        let mut session = source.acquire().await.unwrap();

        let _lock = source.locks().try_acquire("/a/f1").unwrap();

        let err = delete(&mut session, "/a").await.unwrap_err();
        assert!(matches!(err, Error::FileLock(_)), "unexpected error: {err}");
        assert!(server.exists("/a/f1"));

        source.release(session);
    }
}

mod copying {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn copies_a_file_creating_target_parents() {
        let server = TestServer::new();
        server.add_file("/a/f1", b"payload");

        let source = source(&server);
        let engine = CopyEngine::new(source.clone());
        let mut reader = source.acquire().await.unwrap();

        let attrs = reader.existing_attributes("/a/f1").await.unwrap();
        engine.copy(&mut reader, &attrs, "/dest/f1", false).await.unwrap();

        assert_eq!(server.read_file("/dest/f1").unwrap(), b"payload");
        assert_eq!(server.read_file("/a/f1").unwrap(), b"payload");

        source.release(reader);
        assert_eq!(source.idle_connections(), 2);
    }

    #[tokio::test]
    async fn existing_target_requires_overwrite() {
        let server = TestServer::new();
        server.add_file("/a/f1", b"new content");
        server.add_file("/dest/f1", b"old content");

        let source = source(&server);
        let engine = CopyEngine::new(source.clone());
        let mut reader = source.acquire().await.unwrap();
        let attrs = reader.existing_attributes("/a/f1").await.unwrap();

        let err = engine
            .copy(&mut reader, &attrs, "/dest/f1", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)), "unexpected error: {err}");
        assert_eq!(server.read_file("/dest/f1").unwrap(), b"old content");

        engine.copy(&mut reader, &attrs, "/dest/f1", true).await.unwrap();
        assert_eq!(server.read_file("/dest/f1").unwrap(), b"new content");

        source.release(reader);
    }

    #[tokio::test]
    async fn copies_a_directory_tree_with_two_connections() {
        let server = TestServer::new();
        server.add_file("/a/f1", &[1u8; 10]);
        server.add_file("/a/b/f2", &[2u8; 5]);

        let source = source_with(
            &server,
            FtpOptions::new("ftp.example.com")
                .max_connections(NonZeroUsize::new(2).unwrap()),
        );
        let engine = CopyEngine::new(source.clone());
        let mut reader = source.acquire().await.unwrap();

        let attrs = reader.existing_attributes("/a").await.unwrap();
        engine.copy(&mut reader, &attrs, "/dest", false).await.unwrap();

        assert_eq!(server.read_file("/dest/f1").unwrap(), &[1u8; 10]);
        assert_eq!(server.read_file("/dest/b/f2").unwrap(), &[2u8; 5]);
        assert_eq!(server.max_live_connections(), 2);

        source.release(reader);
    }

    #[tokio::test]
    async fn failing_to_obtain_the_writer_connection_is_reported() {
        let server = TestServer::new();
        server.add_file("/a/f1", b"payload");

        let source = source(&server);
        let engine = CopyEngine::new(source.clone());
        let mut reader = source.acquire().await.unwrap();
        let attrs = reader.existing_attributes("/a/f1").await.unwrap();

        server.fail_connects(ConnectFailure::Refused);

        let err = engine
            .copy(&mut reader, &attrs, "/dest/f1", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Operation { .. }), "unexpected error: {err}");
        assert!(
            err.to_string().contains("two FTP connections"),
            "unexpected message: {err}"
        );

        source.release(reader);
    }
}
