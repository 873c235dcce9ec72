//! UseCase: ファイル・音声の転送処理
//!
//! アップロードは一時領域に受信し、2 件の管理者通知を出したあと
//! 2 件目のメッセージ ID に添付ファイルを紐付けて、日付ディレクトリへ移します。
//! ダウンロードは添付 ID か保存済みの相対パスで対象を解決し、フレームとして送ります。

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use parlor_shared::{
    ProtocolError,
    frame::{FrameHeader, copy_payload, drain_payload, read_header, write_header},
    protocol::{ADMIN, AttachmentKind},
    size::human_size,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{
    domain::{AccountStore, Attachment, AttachmentId, DownloadSource, MessageId},
    infrastructure::{ConnectionRegistry, FileStorage, storage::sanitize_file_name},
};

use super::error::TransferError;

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub file_name: String,
    pub length: u64,
    /// Id of the `[File Name: ...]` notice
    pub message_id: MessageId,
    /// `None` when the attachment could not be recorded
    pub attachment: Option<Attachment>,
}

/// A resolved download whose file is already open
#[derive(Debug)]
pub struct PreparedDownload {
    pub source: DownloadSource,
    pub file: tokio::fs::File,
}

/// ファイル転送のユースケース
pub struct TransferFileUseCase {
    registry: Arc<ConnectionRegistry>,
    accounts: Arc<dyn AccountStore>,
    storage: Arc<FileStorage>,
}

impl TransferFileUseCase {
    /// 新しい TransferFileUseCase を作成
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        accounts: Arc<dyn AccountStore>,
        storage: Arc<FileStorage>,
    ) -> Self {
        Self {
            registry,
            accounts,
            storage,
        }
    }

    /// Receive one frame from `reader` and store it as an attachment of `username`.
    ///
    /// On a local storage failure the rest of the frame is still consumed so
    /// the stream stays aligned on the next control line.
    pub async fn receive_upload<R>(
        &self,
        reader: &mut R,
        username: &str,
        kind: AttachmentKind,
    ) -> Result<UploadReceipt, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let header = read_header(reader).await?;
        let file_name = sanitize_file_name(&header.file_name);
        let staged = self.storage.staging_path(username, &file_name);
        tracing::info!(
            "Receiving {} '{}' ({} bytes) from '{}'",
            kind,
            file_name,
            header.length,
            username
        );

        self.stage(reader, &staged, header.length).await?;

        self.registry
            .broadcast(ADMIN, &format!("Received a file from user: {}", username))
            .await;
        let message_id = self
            .registry
            .broadcast(
                ADMIN,
                &format!(
                    "[File Name: {}] [Size: {}]",
                    file_name,
                    human_size(header.length)
                ),
            )
            .await;

        let attachment = self
            .record_attachment(&staged, message_id, &file_name, kind)
            .await;

        Ok(UploadReceipt {
            file_name,
            length: header.length,
            message_id,
            attachment,
        })
    }

    async fn stage<R>(&self, reader: &mut R, staged: &Path, length: u64) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = match tokio::fs::File::create(staged).await {
            Ok(file) => file,
            Err(e) => {
                drain_payload(reader, length).await?;
                return Err(TransferError::Storage(e));
            }
        };
        // Removes the partial file on every early return, including when the
        // session is torn down mid-copy and this future is dropped.
        let guard = StagingGuard::new(staged);

        match copy_payload(reader, &mut file, length).await {
            Ok(_) => {}
            Err(ProtocolError::Sink { consumed, source }) => {
                drop(file);
                drop(guard);
                drain_payload(reader, length - consumed).await?;
                return Err(TransferError::Storage(source));
            }
            Err(e) => return Err(TransferError::Stream(e)),
        }

        file.sync_all().await.map_err(TransferError::Storage)?;
        guard.keep();
        Ok(())
    }

    async fn record_attachment(
        &self,
        staged: &Path,
        message_id: MessageId,
        file_name: &str,
        kind: AttachmentKind,
    ) -> Option<Attachment> {
        if !message_id.is_valid() {
            tracing::warn!("Upload notice was not persisted, discarding '{}'", file_name);
            remove_quietly(staged).await;
            return None;
        }

        let id = match self
            .accounts
            .save_attachment(message_id, file_name, kind)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Failed to record attachment '{}': {}", file_name, e);
                remove_quietly(staged).await;
                return None;
            }
        };

        match self.storage.promote(staged, id, file_name).await {
            Ok(relative) => {
                if let Err(e) = self.accounts.set_attachment_path(id, &relative).await {
                    tracing::warn!("Failed to update path of attachment {}: {}", id, e);
                }
            }
            Err(e) => {
                tracing::warn!("Failed to move attachment {} into storage: {}", id, e);
            }
        }

        self.accounts.find_attachment(id).await
    }

    /// Resolve a control-channel download target: an attachment id or a stored relative path.
    ///
    /// The file is opened here, so a marker is only ever written for a frame
    /// that can follow it.
    pub async fn prepare_download(&self, target: &str) -> Result<PreparedDownload, TransferError> {
        if let Ok(id) = target.parse::<u64>() {
            return self.prepare_attachment(AttachmentId::new(id)).await;
        }

        let path = self
            .storage
            .resolve(target)
            .ok_or_else(|| TransferError::NotFound(target.to_string()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::NotFound(target.to_string()))?;
        source_for(path, file_name, target).await
    }

    /// Resolve an attachment id to its stored file.
    pub async fn prepare_attachment(
        &self,
        id: AttachmentId,
    ) -> Result<PreparedDownload, TransferError> {
        let attachment = self
            .accounts
            .find_attachment(id)
            .await
            .ok_or_else(|| TransferError::NotFound(id.to_string()))?;
        let path = attachment
            .path
            .as_ref()
            .and_then(|relative| self.storage.resolve(relative))
            .ok_or_else(|| TransferError::NotFound(id.to_string()))?;
        source_for(path, attachment.file_name, &id.to_string()).await
    }

    /// Broadcast the two notices that follow a completed download.
    pub async fn announce_download(&self, username: &str, source: &DownloadSource) {
        self.registry
            .broadcast(
                ADMIN,
                &format!("User {} has downloaded a file successfully", username),
            )
            .await;
        self.registry
            .broadcast(
                ADMIN,
                &format!(
                    "[File Name: {}] [Size: {}]",
                    source.header.file_name,
                    human_size(source.header.length)
                ),
            )
            .await;
    }
}

/// Stream an opened file to `writer` as one frame.
pub async fn send_download<W>(
    writer: &mut W,
    header: &FrameHeader,
    mut file: tokio::fs::File,
) -> Result<u64, ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    write_header(writer, header).await?;
    let sent = copy_payload(&mut file, writer, header.length).await?;
    writer.flush().await?;
    Ok(sent)
}

async fn source_for(
    path: PathBuf,
    file_name: String,
    target: &str,
) -> Result<PreparedDownload, TransferError> {
    let not_found = || TransferError::NotFound(target.to_string());
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(TransferError::Storage(e)),
    };
    let meta = file.metadata().await.map_err(TransferError::Storage)?;
    if !meta.is_file() {
        return Err(not_found());
    }
    Ok(PreparedDownload {
        source: DownloadSource {
            header: FrameHeader::new(file_name, meta.len()),
            path,
        },
        file,
    })
}

/// Deletes a staged file unless the upload completed
struct StagingGuard {
    path: Option<PathBuf>,
}

impl StagingGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
        }
    }

    fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take()
            && let Err(e) = std::fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!("Failed to remove {}: {}", path.display(), e);
    }
}
