//! Plain and TLS connections to the server.
//!
//! Both variants turn on TCP no-delay and keep-alive. The plain variant also
//! keeps a duplicate handle of the socket so the heartbeat sender can push an
//! urgent byte after the stream has been split into halves.

use std::{io, path::Path, sync::Arc};

use rustls::pki_types::ServerName;
use socket2::SockRef;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;

use crate::error::ClientError;

/// Value of the urgent liveness byte
pub const URGENT_BYTE: u8 = 0xFF;

/// A byte stream the client can speak the protocol over
pub trait ChatStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ChatStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn ChatStream>;

/// An open connection and, for plain TCP, its urgent-data probe
pub struct Link {
    pub stream: BoxedStream,
    pub urgent: Option<UrgentProbe>,
}

/// Sends one byte of out-of-band data on a plain TCP socket
#[derive(Debug)]
pub struct UrgentProbe(socket2::Socket);

impl UrgentProbe {
    fn new(stream: &TcpStream) -> io::Result<Self> {
        SockRef::from(stream).try_clone().map(Self)
    }

    pub fn send(&self) -> io::Result<()> {
        match self.0.send_out_of_band(&[URGENT_BYTE]) {
            Ok(_) => Ok(()),
            // A full send buffer is not a lost connection.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Opens control and side-channel connections
#[derive(Clone)]
pub struct Transport {
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl Transport {
    pub fn plain() -> Self {
        Self { tls: None }
    }

    /// TLS trusting the certificates in `ca_file`, verifying the server as `server_name`.
    pub fn tls(ca_file: &Path, server_name: &str) -> Result<Self, ClientError> {
        let config = load_client_config(ca_file)?;
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| ClientError::Tls(format!("invalid server name '{}': {}", server_name, e)))?;
        Ok(Self {
            tls: Some((TlsConnector::from(Arc::new(config)), name)),
        })
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub async fn connect(&self, host: &str, port: u16) -> Result<Link, ClientError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| ClientError::Connection(format!("{}:{}: {}", host, port, e)))?;
        stream.set_nodelay(true)?;
        SockRef::from(&stream).set_keepalive(true)?;

        match &self.tls {
            Some((connector, name)) => {
                let stream = connector
                    .connect(name.clone(), stream)
                    .await
                    .map_err(|e| ClientError::Tls(e.to_string()))?;
                Ok(Link {
                    stream: Box::new(stream),
                    urgent: None,
                })
            }
            None => {
                let urgent = UrgentProbe::new(&stream)?;
                Ok(Link {
                    stream: Box::new(stream),
                    urgent: Some(urgent),
                })
            }
        }
    }
}

fn load_client_config(ca_file: &Path) -> Result<rustls::ClientConfig, ClientError> {
    let pem = std::fs::read(ca_file)
        .map_err(|e| ClientError::Tls(format!("cannot read {}: {}", ca_file.display(), e)))?;
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        let cert = cert.map_err(|e| ClientError::Tls(format!("invalid certificate: {}", e)))?;
        roots
            .add(cert)
            .map_err(|e| ClientError::Tls(format!("untrusted certificate: {}", e)))?;
    }
    if roots.is_empty() {
        return Err(ClientError::Tls(format!(
            "no certificates found in {}",
            ca_file.display()
        )));
    }

    rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::Tls(e.to_string()))
        .map(|builder| {
            builder
                .with_root_certificates(roots)
                .with_no_client_auth()
        })
}
