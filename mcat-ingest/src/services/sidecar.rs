//! Local fallback metadata: `<stem>.json` next to the media file

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::MediaMetadata;

#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("Cannot read sidecar {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed sidecar {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// `/m/Heat.1995.mkv` → `/m/Heat.1995.json`
pub fn sidecar_path(media: &Path) -> PathBuf {
    media.with_extension("json")
}

/// Load the sidecar for `media`; `Ok(None)` when there is none
pub async fn load_sidecar(media: &Path) -> Result<Option<MediaMetadata>, SidecarError> {
    let path = sidecar_path(media);

    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(SidecarError::Read { path, source }),
    };

    let metadata: MediaMetadata =
        serde_json::from_str(&contents).map_err(|source| SidecarError::Malformed {
            path: path.clone(),
            source,
        })?;

    tracing::debug!(sidecar = %path.display(), "Loaded sidecar metadata");
    Ok(Some(metadata))
}
