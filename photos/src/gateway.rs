//! Upstream I/O for photos. Returns raw records; no business rules or mapping here.

use crate::config::ExternalSettings;
use crate::errors::FetchError;
use crate::fetcher::{RetryPolicy, fetch_json};
use crate::types::RawPhoto;
use async_trait::async_trait;

/// Source of raw photo records.
///
/// Implementations do not interpret statuses: a missing photo surfaces as a
/// [`FetchError::Status`] with a 404.
#[async_trait]
pub trait PhotosGateway: Send + Sync {
    async fn list_photos(&self) -> Result<Vec<RawPhoto>, FetchError>;

    async fn get_photo(&self, photo_id: i64) -> Result<RawPhoto, FetchError>;
}

/// Gateway backed by the live upstream REST service.
pub struct HttpPhotosGateway {
    base_url: String,
    policy: RetryPolicy,
}

impl HttpPhotosGateway {
    pub fn new(settings: &ExternalSettings) -> Self {
        HttpPhotosGateway::with_policy(settings.base_url.as_str(), RetryPolicy::from(settings))
    }

    fn with_policy(base_url: &str, policy: RetryPolicy) -> Self {
        HttpPhotosGateway {
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
        }
    }

    fn photos_url(&self) -> String {
        format!("{}/photos", self.base_url)
    }

    fn photo_url(&self, photo_id: i64) -> String {
        format!("{}/photos/{photo_id}", self.base_url)
    }
}

#[async_trait]
impl PhotosGateway for HttpPhotosGateway {
    async fn list_photos(&self) -> Result<Vec<RawPhoto>, FetchError> {
        fetch_json(&self.photos_url(), &self.policy).await
    }

    async fn get_photo(&self, photo_id: i64) -> Result<RawPhoto, FetchError> {
        fetch_json(&self.photo_url(photo_id), &self.policy).await
    }
}
