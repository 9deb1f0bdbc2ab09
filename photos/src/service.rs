use crate::errors::PhotosError;
use crate::gateway::PhotosGateway;
use crate::mapper::photo_from_raw;
use crate::types::Photo;
use crate::validator::validate_photo;
use std::sync::Arc;

/// Orchestrates gateway, validation and mapping. Holds no per-request state, so
/// clones can be shared freely across connections.
#[derive(Clone)]
pub struct PhotoService {
    gateway: Arc<dyn PhotosGateway>,
}

impl PhotoService {
    pub fn new(gateway: Arc<dyn PhotosGateway>) -> Self {
        PhotoService { gateway }
    }

    /// Lists photos in upstream order. `limit` is applied before validation so records
    /// past the limit are never checked or mapped.
    pub async fn fetch_photos(&self, limit: Option<usize>) -> Result<Vec<Photo>, PhotosError> {
        let mut raw_photos = self.gateway.list_photos().await?;
        if let Some(limit) = limit {
            raw_photos.truncate(limit);
        }

        raw_photos
            .into_iter()
            .map(|raw| {
                validate_photo(raw)
                    .map(photo_from_raw)
                    .map_err(PhotosError::from)
            })
            .collect()
    }

    pub async fn fetch_photo_by_id(&self, photo_id: i64) -> Result<Photo, PhotosError> {
        let raw = self.gateway.get_photo(photo_id).await?;
        Ok(photo_from_raw(validate_photo(raw)?))
    }
}
