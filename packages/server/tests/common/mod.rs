//! Shared helpers for server integration tests.

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use parlor_server::{
    Server, ServerConfig, ServerError, ServerHandle, infrastructure::InMemoryAccountStore,
};
use parlor_shared::{
    frame::{FrameHeader, copy_payload, read_header},
    protocol::{read_line, write_line},
};
use tempfile::TempDir;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf},
    net::{TcpListener, TcpStream},
};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A test configuration whose storage lives in `dir`.
pub fn test_config(dir: &TempDir) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        files_dir: dir.path().join("files"),
        staging_dir: dir.path().join("tmp"),
        shutdown_grace: Duration::from_millis(100),
        ..ServerConfig::default()
    }
}

/// Start a server on a free block of ports (control port plus the side-channel pool).
pub async fn start_server(config: ServerConfig) -> ServerHandle {
    let accounts = Arc::new(InMemoryAccountStore::new());
    for _ in 0..50 {
        let mut config = config.clone();
        config.port = free_port().await;
        match Server::new(config, accounts.clone()).start().await {
            Ok(handle) => return handle,
            Err(ServerError::Bind { .. }) => continue,
            Err(e) => panic!("failed to start server: {}", e),
        }
    }
    panic!("no free port block found");
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Leave room for the side-channel pool above the control port.
    if port > 65_000 { port - 1_000 } else { port }
}

/// Poll until the registry holds `expected` connections.
pub async fn wait_for_count(handle: &ServerHandle, expected: usize) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while handle.registry().current_count().await != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "registry never reached {} connections",
            expected
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A line-level protocol client over any stream
pub struct TestClient<S> {
    pub reader: BufReader<ReadHalf<S>>,
    pub writer: WriteHalf<S>,
}

impl TestClient<TcpStream> {
    /// Connect to the control channel and complete the join handshake.
    pub async fn join(addr: SocketAddr, username: &str) -> (Self, String) {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self::handshake(stream, username).await
    }

    /// Open a side-channel connection without sending anything.
    pub async fn connect(addr: SocketAddr) -> Self {
        Self::new(TcpStream::connect(addr).await.unwrap())
    }
}

impl<S> TestClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    pub async fn handshake(stream: S, username: &str) -> (Self, String) {
        let mut client = Self::new(stream);
        client.send(username).await;
        let room = client.recv().await;
        (client, room)
    }

    pub async fn send(&mut self, line: &str) {
        write_line(&mut self.writer, line).await.unwrap();
    }

    pub async fn send_frame(&mut self, name: &str, payload: &[u8]) {
        let mut wire = FrameHeader::new(name, payload.len() as u64)
            .encode()
            .unwrap();
        wire.extend_from_slice(payload);
        self.writer.write_all(&wire).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Next line, failing the test on timeout or end of stream.
    pub async fn recv(&mut self) -> String {
        self.try_recv()
            .await
            .expect("connection closed while waiting for a line")
    }

    /// Next line, `None` at end of stream.
    pub async fn try_recv(&mut self) -> Option<String> {
        tokio::time::timeout(RECV_TIMEOUT, read_line(&mut self.reader))
            .await
            .expect("timed out waiting for a line")
            .unwrap_or(None)
    }

    /// Skip lines until one matches, returning it.
    pub async fn recv_until(&mut self, mut matches: impl FnMut(&str) -> bool) -> String {
        loop {
            let line = self.recv().await;
            if matches(&line) {
                return line;
            }
        }
    }

    pub async fn recv_frame(&mut self) -> (FrameHeader, Vec<u8>) {
        let header = read_header(&mut self.reader).await.unwrap();
        let mut payload = Vec::new();
        copy_payload(&mut self.reader, &mut payload, header.length)
            .await
            .unwrap();
        (header, payload)
    }

    /// Wait for the server to close the stream.
    pub async fn expect_closed(&mut self) {
        while self.try_recv().await.is_some() {}
    }
}
