//! Profile editing: display name, status line and avatar.
//!
//! Each edit is one remote multi-path update followed by the matching local
//! row update, so the user sees their own change immediately even before the
//! friends feed echoes it back.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::error::SyncError;
use crate::media::{avatar_path, ProgressCallback};
use crate::store::SkiffCore;

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub status: Option<String>,
}

impl ProfileUpdate {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.name.is_none() && self.status.is_none()
    }
}

pub async fn update_profile(
    core: &Arc<SkiffCore>,
    uid: &str,
    update: ProfileUpdate,
) -> Result<(), SyncError> {
    if update.is_empty() {
        return Ok(());
    }

    let mut updates = HashMap::new();
    if let Some(name) = &update.name {
        updates.insert(format!("users/{uid}/name"), json!(name));
    }
    if let Some(status) = &update.status {
        updates.insert(format!("users/{uid}/status"), json!(status));
    }
    core.remote.update(updates).await?;

    if let Some(name) = &update.name {
        sqlx::query("UPDATE users SET name = ? WHERE user_id = ?")
            .bind(name)
            .bind(uid)
            .execute(&core.pool)
            .await?;
    }
    if let Some(status) = &update.status {
        sqlx::query("UPDATE users SET status = ? WHERE user_id = ?")
            .bind(status)
            .bind(uid)
            .execute(&core.pool)
            .await?;
    }
    Ok(())
}

/// Upload a new avatar, point the profile at its URL, and return the URL.
pub async fn set_avatar(
    core: &Arc<SkiffCore>,
    uid: &str,
    bytes: Vec<u8>,
    progress: Option<ProgressCallback>,
) -> Result<String, SyncError> {
    let url = core
        .media
        .upload(&avatar_path(uid), bytes, progress)
        .await
        .map_err(|e| SyncError::remote(e.to_string()))?;

    core.remote
        .update(HashMap::from([(format!("users/{uid}/avatar_url"), json!(url))]))
        .await?;

    sqlx::query("UPDATE users SET avatar_url = ? WHERE user_id = ?")
        .bind(&url)
        .bind(uid)
        .execute(&core.pool)
        .await?;
    Ok(url)
}
