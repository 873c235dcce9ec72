//! Side-channel transfers and the slot counter that picks their ports.
//!
//! A side-channel connection is opened on `P + counter`, where the counter
//! is incremented before connecting and decremented when the transfer ends.
//! The counter is the only admission control: with a pool of N listeners,
//! transfer N+1 targets a port nobody listens on and fails to connect.

use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use parlor_shared::{
    ProtocolError,
    frame::{FrameHeader, copy_payload, drain_payload, read_header, write_header},
    protocol::{AttachmentKind, DOWNLOAD_MARKER, SideCommand, read_line, write_line},
};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncWriteExt, BufReader},
};

use crate::{error::ClientError, transport::Transport};

const FALLBACK_NAME: &str = "download.bin";

/// Counter of in-flight side-channel transfers
#[derive(Debug)]
pub struct TransferSlots {
    base_port: u16,
    in_flight: Mutex<u16>,
}

impl TransferSlots {
    pub fn new(base_port: u16) -> Self {
        Self {
            base_port,
            in_flight: Mutex::new(0),
        }
    }

    /// Take the next slot. The port is `base_port + in_flight` after the increment.
    pub fn acquire(self: &Arc<Self>) -> SlotGuard {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        *in_flight += 1;
        SlotGuard {
            port: self.base_port.saturating_add(*in_flight),
            slots: self.clone(),
        }
    }

    pub fn in_flight(&self) -> u16 {
        *self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A held slot; releasing it decrements the counter
#[derive(Debug)]
pub struct SlotGuard {
    port: u16,
    slots: Arc<TransferSlots>,
}

impl SlotGuard {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut in_flight = self.slots.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        *in_flight = in_flight.saturating_sub(1);
    }
}

/// One-shot side-channel transfers on behalf of a user
#[derive(Clone)]
pub struct SideChannel {
    transport: Transport,
    host: String,
    identity: String,
    slots: Arc<TransferSlots>,
}

impl SideChannel {
    pub fn new(
        transport: Transport,
        host: impl Into<String>,
        identity: impl Into<String>,
        slots: Arc<TransferSlots>,
    ) -> Self {
        Self {
            transport,
            host: host.into(),
            identity: identity.into(),
            slots,
        }
    }

    /// Send `path` as an attachment. Returns the number of payload bytes sent.
    pub async fn upload(&self, path: &Path, kind: AttachmentKind) -> Result<u64, ClientError> {
        let slot = self.slots.acquire();
        let (header, mut file) = open_upload(path).await?;
        tracing::debug!("Uploading '{}' via side-channel port {}", header.file_name, slot.port());

        let link = self.transport.connect(&self.host, slot.port()).await?;
        let (read_half, mut writer) = tokio::io::split(link.stream);
        write_line(&mut writer, &self.identity).await?;
        write_line(&mut writer, &SideCommand::Upload(kind).to_line()).await?;
        write_header(&mut writer, &header).await?;
        let sent = copy_payload(&mut file, &mut writer, header.length).await?;

        // The server closes the side-channel once the file is stored.
        let mut reader = BufReader::new(read_half);
        loop {
            match read_line(&mut reader).await {
                Ok(Some(line)) => tracing::debug!("Side-channel said: {}", line),
                Ok(None) => break,
                Err(e) if e.is_disconnect() => break,
                Err(e) => return Err(e.into()),
            }
        }
        let _ = writer.shutdown().await;
        Ok(sent)
    }

    /// Fetch attachment `id` into `dir`.
    pub async fn download(&self, id: u64, dir: &Path) -> Result<(PathBuf, u64), ClientError> {
        let slot = self.slots.acquire();
        tracing::debug!("Downloading attachment {} via side-channel port {}", id, slot.port());

        let link = self.transport.connect(&self.host, slot.port()).await?;
        let (read_half, mut writer) = tokio::io::split(link.stream);
        write_line(&mut writer, &self.identity).await?;
        write_line(&mut writer, &SideCommand::Download(id).to_line()).await?;

        let mut reader = BufReader::new(read_half);
        let received = match read_line(&mut reader).await? {
            Some(line) if line == DOWNLOAD_MARKER => receive_file(&mut reader, dir).await,
            Some(line) => Err(ClientError::Refused(line)),
            None => Err(ClientError::Closed),
        };
        let _ = writer.shutdown().await;
        received
    }
}

/// Open a local file for upload along with the frame header describing it.
pub async fn open_upload(path: &Path) -> Result<(FrameHeader, File), ClientError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a file", path.display()),
            )
        })?;
    let file = File::open(path).await?;
    let length = file.metadata().await?.len();
    Ok((FrameHeader::new(file_name, length), file))
}

/// Receive one frame into `dir`.
///
/// A local write failure still consumes the rest of the frame, so the stream
/// stays usable, and is reported as [`ClientError::Io`]. A stream failure is
/// reported as [`ClientError::Protocol`].
pub async fn receive_file<R>(reader: &mut R, dir: &Path) -> Result<(PathBuf, u64), ClientError>
where
    R: AsyncRead + Unpin,
{
    let header = read_header(reader).await?;
    let path = dir.join(local_file_name(&header.file_name));

    let created = match tokio::fs::create_dir_all(dir).await {
        Ok(()) => File::create(&path).await,
        Err(e) => Err(e),
    };
    let mut file = match created {
        Ok(file) => file,
        Err(e) => {
            drain_payload(reader, header.length).await?;
            return Err(e.into());
        }
    };

    match copy_payload(reader, &mut file, header.length).await {
        Ok(received) => Ok((path, received)),
        Err(ProtocolError::Sink { consumed, source }) => {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            drain_payload(reader, header.length - consumed).await?;
            Err(source.into())
        }
        Err(e) => {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            Err(e.into())
        }
    }
}

/// Last path component of a name chosen by the server.
fn local_file_name(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .filter(|last| !last.is_empty() && *last != "." && *last != "..")
        .unwrap_or(FALLBACK_NAME)
        .to_string()
}
