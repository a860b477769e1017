//! File-backed store for shared playground snapshots.

use std::{
    io,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("share payload must be a JSON object")]
    InvalidPayload,
    #[error("share id `{0}` is malformed")]
    InvalidId(String),
    #[error("share `{0}` not found")]
    NotFound(String),
    #[error("failed to encode share: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("share storage i/o failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct ShareStore {
    root: PathBuf,
}

impl ShareStore {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `snapshot` under a fresh id and return the id.
    pub async fn save(&self, snapshot: &Value) -> Result<String, ShareError> {
        if !snapshot.is_object() {
            return Err(ShareError::InvalidPayload);
        }

        let id = Uuid::new_v4().simple().to_string();
        let encoded = serde_json::to_vec(snapshot)?;
        let staging = self.root.join(format!("{id}.json.tmp"));
        let target = self.path_for(&id);

        tokio::fs::write(&staging, &encoded).await?;
        if let Err(err) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(err.into());
        }

        info!(
            target = "application::share",
            op = "save",
            share_id = %id,
            bytes = encoded.len(),
            "Stored shared snapshot"
        );
        Ok(id)
    }

    /// Raw JSON bytes of a stored snapshot.
    pub async fn load(&self, id: &str) -> Result<Bytes, ShareError> {
        if !is_valid_id(id) {
            return Err(ShareError::InvalidId(id.to_owned()));
        }

        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(ShareError::NotFound(id.to_owned()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

/// Ids are simple-form v4 UUIDs: 32 lowercase hex digits.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == 32
        && id
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}
