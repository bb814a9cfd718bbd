//! Media store seam — path-addressed blob upload/download with progress.
//!
//! Used for avatars and image messages. The concrete backend is a
//! collaborator; this module only fixes the path layout and the callback
//! shape.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("download failed: {0}")]
    Download(String),
}

/// Invoked with (bytes transferred, total bytes) as the transfer progresses.
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Upload `bytes` to `path`; returns the public download URL.
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        progress: Option<ProgressCallback>,
    ) -> Result<String, MediaError>;

    async fn download(&self, path: &str) -> Result<Vec<u8>, MediaError>;
}

pub fn avatar_path(user_id: &str) -> String {
    format!("avatars/{user_id}.jpg")
}

pub fn chat_image_path(chat_id: &str, message_id: &str) -> String {
    format!("chat_images/{chat_id}/{message_id}.jpg")
}
