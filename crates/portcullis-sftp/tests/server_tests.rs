//! Server lifecycle tests.

use std::sync::Arc;
use std::time::Duration;

use portcullis_core::{CancelCause, CancelToken};
use portcullis_sftp::{Config, Server};
use portcullis_users::UserDirectory;

fn test_config(root: &std::path::Path) -> Config {
    Config {
        bind_address: "127.0.0.1".to_string(),
        port: 0, // ephemeral
        root_dir: root.to_path_buf(),
        // Absent on purpose: the server generates an ephemeral key.
        host_key_path: root.join("host_key"),
        ..Config::default()
    }
}

#[tokio::test]
async fn run_returns_once_the_shutdown_token_fires() {
    let root = tempfile::tempdir().unwrap();
    let server = Server::new(test_config(root.path()), Arc::new(UserDirectory::new()))
        .await
        .unwrap();

    let shutdown = server.shutdown_token();
    let running = tokio::spawn(async move { server.run().await });

    // Let the listener come up, then drain.
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel(CancelCause::Shutdown);

    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("run did not return after shutdown")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn shutdown_before_run_prevents_accepting() {
    let root = tempfile::tempdir().unwrap();
    let server = Server::new(test_config(root.path()), Arc::new(UserDirectory::new()))
        .await
        .unwrap();

    server.shutdown_token().cancel(CancelCause::Shutdown);
    tokio::time::timeout(Duration::from_secs(5), server.run())
        .await
        .expect("run did not observe a pre-cancelled token")
        .unwrap();
    assert_eq!(server.registry().active().await, 0);
}

#[tokio::test]
async fn construction_fails_without_a_root_directory() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.root_dir = root.path().join("does-not-exist");

    let result = Server::new(config, Arc::new(UserDirectory::new())).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn shutdown_tokens_fan_out_to_connection_children() {
    // The per-connection tokens the server derives must observe the root.
    let root = CancelToken::new();
    let children: Vec<CancelToken> = (0..4).map(|_| root.child()).collect();

    root.cancel(CancelCause::Shutdown);
    for child in children {
        child.cancelled().await;
        assert_eq!(child.cause(), Some(CancelCause::Shutdown));
    }
}
