//! File storage for uploads: a staging area and per-day permanent storage.
//!
//! Layout:
//!
//! ```text
//! <staging_root>/<user>_<millis>_<file name>
//! <files_root>/<YYYY-MM-DD>/attachment_<id><.ext>
//! ```
//!
//! Paths recorded on attachments are relative to `files_root`.

use std::{
    io,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use parlor_shared::time::Clock;

use crate::domain::AttachmentId;

const FALLBACK_FILE_NAME: &str = "upload.bin";

pub struct FileStorage {
    files_root: PathBuf,
    staging_root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileStorage {
    pub fn new(
        files_root: impl Into<PathBuf>,
        staging_root: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            files_root: files_root.into(),
            staging_root: staging_root.into(),
            clock,
        }
    }

    pub fn files_root(&self) -> &Path {
        &self.files_root
    }

    /// Create the storage and staging directories if they are missing.
    pub async fn prepare(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.files_root).await?;
        tokio::fs::create_dir_all(&self.staging_root).await?;
        Ok(())
    }

    /// Staging location for an upload that is about to be received.
    pub fn staging_path(&self, username: &str, file_name: &str) -> PathBuf {
        self.staging_root.join(format!(
            "{}_{}_{}",
            sanitize_component(username),
            self.clock.now_millis(),
            sanitize_file_name(file_name)
        ))
    }

    /// Copy a staged upload into today's directory and remove the staged copy.
    ///
    /// Returns the new path relative to the files root.
    pub async fn promote(
        &self,
        staged: &Path,
        id: AttachmentId,
        file_name: &str,
    ) -> io::Result<PathBuf> {
        let day = self.clock.today().format("%Y-%m-%d").to_string();
        let day_dir = self.files_root.join(&day);
        tokio::fs::create_dir_all(&day_dir).await?;

        let stored_name = match Path::new(file_name).extension() {
            Some(ext) => format!("attachment_{}.{}", id, ext.to_string_lossy()),
            None => format!("attachment_{}", id),
        };
        tokio::fs::copy(staged, day_dir.join(&stored_name)).await?;
        if let Err(e) = tokio::fs::remove_file(staged).await {
            tracing::warn!("Failed to remove staged file {}: {}", staged.display(), e);
        }

        Ok(PathBuf::from(day).join(stored_name))
    }

    /// Resolve a stored relative path, refusing anything that escapes the files root.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> Option<PathBuf> {
        let relative = relative.as_ref();
        let mut parts = relative.components().peekable();
        parts.peek()?;
        if !parts.all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.files_root.join(relative))
    }
}

/// Reduce a peer-supplied file name to its final path component.
///
/// Both `/` and `\` count as separators. Names that reduce to nothing,
/// `.` or `..` fall back to a fixed name.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    match last {
        "" | "." | ".." => FALLBACK_FILE_NAME.to_string(),
        other => other.to_string(),
    }
}

fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
