//! Attachment file storage under the uploads root
//!
//! Files land in `<root>/messages/` or `<root>/voice/` as
//! `<unix-millis>-<random>.<ext>`. Messages only ever hold the public URL
//! (`/uploads/<subdir>/<name>`), never a filesystem path.

use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::crypto;
use crate::error::{AppError, Result};
use crate::models::now_millis;

pub const URL_PREFIX: &str = "/uploads";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadCategory {
    Messages,
    Voice,
}

impl UploadCategory {
    pub fn dir_name(&self) -> &'static str {
        match self {
            UploadCategory::Messages => "messages",
            UploadCategory::Voice => "voice",
        }
    }
}

/// A file written to disk but not yet referenced by any message
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub url: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
}

#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
    max_size: usize,
}

impl AttachmentStore {
    pub async fn new(root: impl Into<PathBuf>, max_size: usize) -> anyhow::Result<Self> {
        let root = root.into();
        for category in [UploadCategory::Messages, UploadCategory::Voice] {
            fs::create_dir_all(root.join(category.dir_name())).await?;
        }

        tracing::info!(path = %root.display(), "Attachment store initialized");
        Ok(Self { root, max_size })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub async fn store(
        &self,
        category: UploadCategory,
        original_name: &str,
        mime_type: &str,
        data: &[u8],
    ) -> Result<StoredFile> {
        if data.is_empty() {
            return Err(AppError::validation("Uploaded file is empty"));
        }
        if data.len() > self.max_size {
            return Err(AppError::FileTooLarge);
        }

        let name = format!(
            "{}-{}.{}",
            now_millis(),
            crypto::upload_suffix()?,
            extension(original_name, mime_type)
        );
        let path = self.root.join(category.dir_name()).join(&name);

        fs::write(&path, data).await?;

        tracing::debug!(file = %name, size = data.len(), "Stored upload");

        Ok(StoredFile {
            url: format!("{}/{}/{}", URL_PREFIX, category.dir_name(), name),
            filename: display_name(original_name),
            mime_type: mime_type.to_string(),
            size: data.len() as i64,
        })
    }

    /// Delete the file behind an upload URL. Missing files are not an error.
    pub async fn remove(&self, url: &str) -> Result<()> {
        let path = self.resolve(url)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(url = %url, "Removed upload");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal of files whose message could not be created
    pub async fn discard(&self, files: &[StoredFile]) {
        for file in files {
            if let Err(e) = self.remove(&file.url).await {
                tracing::warn!(url = %file.url, "Failed to remove orphaned upload: {}", e);
            }
        }
    }

    /// Whether `url` names a file under the uploads root
    pub fn is_upload_url(&self, url: &str) -> bool {
        self.resolve(url).is_ok()
    }

    /// Map an upload URL to its path, refusing anything outside the root
    fn resolve(&self, url: &str) -> Result<PathBuf> {
        let relative = url
            .strip_prefix(URL_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| AppError::validation("Not an upload URL"))?;

        let mut resolved = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(c) => resolved.push(c),
                _ => return Err(AppError::validation("Invalid upload path")),
            }
        }
        Ok(resolved)
    }
}

fn extension(original_name: &str, mime_type: &str) -> String {
    let from_name = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 10 && e.chars().all(|c| c.is_ascii_alphanumeric()));

    match from_name {
        Some(ext) => ext.to_ascii_lowercase(),
        None => match mime_type {
            "audio/webm" | "video/webm" => "webm".to_string(),
            "audio/ogg" => "ogg".to_string(),
            "audio/mpeg" => "mp3".to_string(),
            "image/png" => "png".to_string(),
            "image/jpeg" => "jpg".to_string(),
            _ => "bin".to_string(),
        },
    }
}

fn display_name(original_name: &str) -> String {
    let name = Path::new(original_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .trim();
    if name.is_empty() {
        "unnamed".to_string()
    } else {
        name.to_string()
    }
}
