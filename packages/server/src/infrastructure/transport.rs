//! Plain and TLS stream transport for the control channel and side-channels.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use socket2::SockRef;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::TlsAcceptor;

use crate::error::ServerError;

/// A byte stream the server can speak the protocol over
pub trait ChatStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ChatStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn ChatStream>;

/// Turns accepted TCP connections into protocol streams
#[derive(Clone)]
pub struct Acceptor {
    tls: Option<TlsAcceptor>,
}

impl Acceptor {
    pub fn plain() -> Self {
        Self { tls: None }
    }

    pub fn tls(config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            tls: Some(TlsAcceptor::from(config)),
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Apply socket options and, for TLS, run the handshake.
    pub async fn accept(&self, stream: TcpStream) -> io::Result<BoxedStream> {
        configure_socket(&stream)?;
        match &self.tls {
            Some(acceptor) => Ok(Box::new(acceptor.accept(stream).await?)),
            None => Ok(Box::new(stream)),
        }
    }
}

/// TCP no-delay and keep-alive on.
pub fn configure_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_keepalive(true)?;
    Ok(())
}

/// Load a PEM certificate chain and private key into a rustls server config.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<rustls::ServerConfig, ServerError> {
    let cert_pem = std::fs::read(cert_path).map_err(|e| {
        ServerError::Tls(format!("cannot read cert {}: {}", cert_path.display(), e))
    })?;
    let key_pem = std::fs::read(key_path).map_err(|e| {
        ServerError::Tls(format!("cannot read key {}: {}", key_path.display(), e))
    })?;

    let certs: Vec<rustls::pki_types::CertificateDer<'static>> =
        rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServerError::Tls(format!("invalid certificate PEM: {}", e)))?;
    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "no certificate found in {}",
            cert_path.display()
        )));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Tls(format!("invalid key PEM: {}", e)))?
        .ok_or_else(|| ServerError::Tls("no private key found in PEM".to_string()))?;

    rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ServerError::Tls(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| ServerError::Tls(e.to_string()))
}

/// Generate a self-signed certificate for development use.
///
/// Writes `cert.pem` and `key.pem` into `dir` and returns their paths.
pub fn generate_self_signed_cert(dir: &Path) -> Result<(PathBuf, PathBuf), ServerError> {
    std::fs::create_dir_all(dir)?;
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");

    let mut params = rcgen::CertificateParams::new(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ])
    .map_err(|e| ServerError::Tls(e.to_string()))?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "parlor-server dev cert");

    let key_pair = rcgen::KeyPair::generate().map_err(|e| ServerError::Tls(e.to_string()))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| ServerError::Tls(e.to_string()))?;

    std::fs::write(&cert_path, cert.pem())?;
    std::fs::write(&key_path, key_pair.serialize_pem())?;

    Ok((cert_path, key_path))
}
