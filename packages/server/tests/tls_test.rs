//! The control channel and side-channels over TLS with a generated certificate.

mod common;

use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use common::{TestClient, start_server, test_config, wait_for_count};
use parlor_server::{
    config::TlsPaths, heartbeat::HeartbeatConfig,
    infrastructure::transport::generate_self_signed_cert,
};
use rustls::pki_types::ServerName;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, client::TlsStream};

fn connector(cert: &Path) -> TlsConnector {
    let mut pem = std::io::BufReader::new(std::fs::File::open(cert).unwrap());
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem) {
        roots.add(cert.unwrap()).unwrap();
    }
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn connect_tls(connector: &TlsConnector, port: u16) -> TlsStream<TcpStream> {
    let tcp = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    connector.connect(name, tcp).await.unwrap()
}

#[tokio::test]
async fn test_chat_over_tls() {
    // テスト項目: TLS 上でも参加・チャット・退出通知が平文と同じように動作する
    // given (前提条件):
    let dir = TempDir::new().unwrap();
    let (cert, key) = generate_self_signed_cert(&dir.path().join("certs")).unwrap();
    let mut config = test_config(&dir);
    config.tls = Some(TlsPaths {
        cert: cert.clone(),
        key,
    });
    let server = start_server(config).await;
    let connector = connector(&cert);
    let port = server.local_addr().port();

    // when (操作):
    let (mut alice, room) =
        TestClient::handshake(connect_tls(&connector, port).await, "alice").await;
    wait_for_count(&server, 1).await;
    let (mut bob, _) = TestClient::handshake(connect_tls(&connector, port).await, "bob").await;
    wait_for_count(&server, 2).await;
    bob.send("hello over tls").await;
    bob.send("exit").await;

    // then (期待する結果):
    assert_eq!(room, "Lobby");
    assert_eq!(alice.recv().await, "System: Welcome bob");
    assert_eq!(alice.recv().await, "bob: hello over tls");
    assert_eq!(
        alice.recv().await,
        "System: User bob has left the chatroom."
    );
    bob.expect_closed().await;
}

#[tokio::test]
async fn test_side_channel_upload_over_tls() {
    // テスト項目: サイドチャネルも TLS で保護され、アップロードが完了する
    // given (前提条件):
    let dir = TempDir::new().unwrap();
    let (cert, key) = generate_self_signed_cert(&dir.path().join("certs")).unwrap();
    let mut config = test_config(&dir);
    config.tls = Some(TlsPaths {
        cert: cert.clone(),
        key,
    });
    let server = start_server(config).await;
    let connector = connector(&cert);
    let (mut alice, _) =
        TestClient::handshake(connect_tls(&connector, server.local_addr().port()).await, "alice")
            .await;
    wait_for_count(&server, 1).await;

    // when (操作):
    let stream = connect_tls(&connector, server.side_channel_ports()[0]).await;
    let mut side = TestClient::new(stream);
    side.send("alice").await;
    side.send("upload File").await;
    side.send_frame("notes.txt", b"secret notes").await;
    side.expect_closed().await;

    // then (期待する結果):
    assert_eq!(alice.recv().await, "System: Received a file from user: alice");
    assert_eq!(alice.recv().await, "System: [File Name: notes.txt] [Size: 12B]");
}

#[tokio::test]
async fn test_plain_client_cannot_chat_with_tls_server() {
    // テスト項目: TLS サーバーに平文で接続してもルーム名は得られない
    // given (前提条件):
    let dir = TempDir::new().unwrap();
    let (cert, key) = generate_self_signed_cert(&dir.path().join("certs")).unwrap();
    let mut config = test_config(&dir);
    config.tls = Some(TlsPaths { cert, key });
    let server = start_server(config).await;

    // when (操作):
    let mut plain = TestClient::connect(server.local_addr()).await;
    plain.send("mallory").await;

    // then (期待する結果):
    plain.expect_closed().await;
    assert_eq!(server.registry().current_count().await, 0);
}

#[tokio::test]
async fn test_silent_peer_is_dropped_during_tls_handshake() {
    // テスト項目: TCP 接続後に何も送らないピアは、制御・サイドチャネルとも TLS ハンドシェイク待ちで切断される
    // given (前提条件):
    let dir = TempDir::new().unwrap();
    let (cert, key) = generate_self_signed_cert(&dir.path().join("certs")).unwrap();
    let mut config = test_config(&dir);
    config.tls = Some(TlsPaths { cert, key });
    config.heartbeat = HeartbeatConfig {
        interval: Duration::from_millis(200),
        max_misses: 2,
    };
    let server = start_server(config).await;
    let control = server.local_addr();
    let side = SocketAddr::new(control.ip(), server.side_channel_ports()[0]);

    // when (操作):
    let mut silent_control = TestClient::connect(control).await;
    let mut silent_side = TestClient::connect(side).await;

    // then (期待する結果): 400ms の猶予で閉じられる
    let closed = tokio::time::timeout(Duration::from_secs(3), async {
        silent_control.expect_closed().await;
        silent_side.expect_closed().await;
    })
    .await;
    assert!(closed.is_ok());
    assert_eq!(server.registry().current_count().await, 0);
}
