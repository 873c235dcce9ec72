//! In-process server for client integration tests.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use parlor_server::{
    ServerConfig, ServerError, ServerHandle, Server, infrastructure::InMemoryAccountStore,
};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpSocket};

pub fn test_config(dir: &TempDir) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        files_dir: dir.path().join("files"),
        staging_dir: dir.path().join("tmp"),
        shutdown_grace: Duration::from_millis(100),
        ..ServerConfig::default()
    }
}

/// Start a server on a free control port with its side-channel pool above it.
pub async fn start_server(config: ServerConfig) -> ServerHandle {
    let accounts = Arc::new(InMemoryAccountStore::new());
    for _ in 0..50 {
        let mut config = config.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        config.port = port.min(65_000);
        match Server::new(config, accounts.clone()).start().await {
            Ok(handle) => return handle,
            Err(ServerError::Bind { .. }) => continue,
            Err(e) => panic!("failed to start server: {}", e),
        }
    }
    panic!("no free port block found");
}

/// Start a server and keep the port just above its side-channel pool bound but
/// not listening, so nothing else can accept there during the test.
pub async fn start_server_with_closed_gap(config: ServerConfig) -> (ServerHandle, TcpSocket) {
    for _ in 0..50 {
        let server = start_server(config.clone()).await;
        let gap = server.local_addr().port() + config.side_channels + 1;
        match reserve_port(gap) {
            Some(socket) => return (server, socket),
            None => server.shutdown().await,
        }
    }
    panic!("no port block with a free gap found");
}

fn reserve_port(port: u16) -> Option<TcpSocket> {
    let socket = TcpSocket::new_v4().ok()?;
    socket.bind(([127, 0, 0, 1], port).into()).ok()?;
    Some(socket)
}

pub async fn wait_for_count(handle: &ServerHandle, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handle.registry().current_count().await != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "registry never reached {} connections",
            expected
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Every regular file under `root`, recursively.
pub fn stored_files(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                found.push(path);
            }
        }
    }
    found
}
