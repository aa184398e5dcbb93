//! Drawing uploads, listings and likes.
//!
//! Metadata lives in the `drawings` collection; the PNG bytes sit next to it
//! as `drawings/<id>.png`. A like is recorded on both sides (the drawing's
//! `liked_by` and the account's `liked_drawings`), one lock at a time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::task;
use tracing::info;

use crate::domain::{DrawingId, InternalId};
use crate::identity::{IdentityError, IdentityResolver};
use crate::models::{DrawingInfo, Drawings};
use crate::services::update_active_account;
use crate::store::{RecordStore, StoreError, collection};

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
const DATA_URL_PREFIX: &str = "data:image/png;base64,";
pub const MAX_TITLE_LENGTH: usize = 100;

#[derive(Debug, Error)]
pub enum DrawingError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Drawing not found")]
    NotFound,

    #[error("Artist not found")]
    ArtistNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<IdentityError> for DrawingError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Store(e) => Self::Store(e),
            IdentityError::UnknownUsername(_) | IdentityError::UnknownId(_) => Self::ArtistNotFound,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DrawingView {
    pub id: DrawingId,
    pub title: String,
    pub artist: String,
    pub likes: usize,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeResult {
    pub liked: bool,
    pub likes: usize,
}

#[derive(Clone)]
pub struct DrawingService {
    store: RecordStore,
    identity: IdentityResolver,
}

impl DrawingService {
    #[must_use]
    pub const fn new(store: RecordStore, identity: IdentityResolver) -> Self {
        Self { store, identity }
    }

    fn image_path(&self, id: DrawingId) -> PathBuf {
        self.store.drawings_dir().join(format!("{id}.png"))
    }

    /// Stores a base64 PNG (a `data:image/png;base64,` prefix is accepted).
    /// The image file is written before the metadata that points at it.
    pub async fn upload(
        &self,
        artist: InternalId,
        artist_name: &str,
        title: &str,
        image_base64: &str,
    ) -> Result<DrawingView, DrawingError> {
        let title = normalize_title(title)?;
        let bytes = decode_png(image_base64)?;

        let id = DrawingId::generate();
        write_image(self.image_path(id), bytes).await?;

        let info = DrawingInfo {
            id,
            artist_id: artist,
            title,
            created_at: chrono::Utc::now().to_rfc3339(),
            liked_by: Vec::new(),
        };
        let view = DrawingView {
            id,
            title: info.title.clone(),
            artist: artist_name.to_string(),
            likes: 0,
            created_at: info.created_at.clone(),
        };

        self.store
            .with_exclusive_lock(&collection::drawings(), move |drawings: &mut Drawings| {
                drawings.insert(id, info);
                Ok::<_, StoreError>(())
            })
            .await?;

        update_active_account(&self.store, artist, |account| {
            account.drawing_count += 1;
        })
        .await?;

        info!(drawing_id = %id, artist = %artist, "Drawing uploaded");
        Ok(view)
    }

    /// Newest first. Drawings whose artist no longer resolves are skipped.
    pub async fn list(&self, artist: Option<&str>) -> Result<Vec<DrawingView>, DrawingError> {
        let artist_id = match artist {
            Some(name) => Some(self.identity.resolve_id(name).await?),
            None => None,
        };

        let drawings = self.store.snapshot(&collection::drawings()).await?;
        let directory = self.identity.resolve_many().await?;

        let mut views: Vec<DrawingView> = drawings
            .into_values()
            .filter(|d| artist_id.is_none_or(|id| d.artist_id == id))
            .filter_map(|d| {
                let artist = directory.username(&d.artist_id)?.to_string();
                Some(DrawingView {
                    id: d.id,
                    likes: d.likes(),
                    title: d.title,
                    artist,
                    created_at: d.created_at,
                })
            })
            .collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(views)
    }

    pub async fn image(&self, id: DrawingId) -> Result<Vec<u8>, DrawingError> {
        let drawings = self.store.snapshot(&collection::drawings()).await?;
        if !drawings.contains_key(&id) {
            return Err(DrawingError::NotFound);
        }

        match tokio::fs::read(self.image_path(id)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DrawingError::NotFound),
            Err(source) => Err(StoreError::Io {
                collection: "drawings".to_string(),
                source,
            }
            .into()),
        }
    }

    /// Likes the drawing, or takes the like back if already given.
    pub async fn toggle_like(
        &self,
        user: InternalId,
        drawing: DrawingId,
    ) -> Result<LikeResult, DrawingError> {
        let result = self
            .store
            .with_exclusive_lock(&collection::drawings(), move |drawings: &mut Drawings| {
                let info = drawings.get_mut(&drawing).ok_or(DrawingError::NotFound)?;
                let liked = if let Some(pos) = info.liked_by.iter().position(|id| *id == user) {
                    info.liked_by.remove(pos);
                    false
                } else {
                    info.liked_by.push(user);
                    true
                };
                Ok::<_, DrawingError>(LikeResult {
                    liked,
                    likes: info.likes(),
                })
            })
            .await?;

        // Set, not flip, so this side always ends up matching the drawing.
        update_active_account(&self.store, user, move |account| {
            account.liked_drawings.retain(|d| *d != drawing);
            if result.liked {
                account.liked_drawings.push(drawing);
            }
        })
        .await?;

        Ok(result)
    }
}

fn normalize_title(title: &str) -> Result<String, DrawingError> {
    let title = title.trim();
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(DrawingError::Validation(format!(
            "Title must be at most {MAX_TITLE_LENGTH} characters"
        )));
    }
    if title.is_empty() {
        return Ok("Untitled".to_string());
    }
    Ok(title.to_string())
}

fn decode_png(encoded: &str) -> Result<Vec<u8>, DrawingError> {
    let encoded = encoded.trim();
    let encoded = encoded.strip_prefix(DATA_URL_PREFIX).unwrap_or(encoded);

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| DrawingError::Validation(format!("Image is not valid base64: {e}")))?;

    if !bytes.starts_with(PNG_SIGNATURE) {
        return Err(DrawingError::Validation("Image must be a PNG".to_string()));
    }
    Ok(bytes)
}

/// Same write-then-rename as the collections, so readers never see half a file.
async fn write_image(path: PathBuf, bytes: Vec<u8>) -> Result<(), StoreError> {
    task::spawn_blocking(move || write_image_sync(&path, &bytes))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

fn write_image_sync(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io = |source: std::io::Error| StoreError::Io {
        collection: "drawings".to_string(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::Builder::new()
        .prefix(".drawing.")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(io)?;
    tmp.write_all(bytes).map_err(io)?;
    tmp.as_file().sync_all().map_err(io)?;
    tmp.persist(path).map_err(|e| io(e.error))?;
    Ok(())
}
