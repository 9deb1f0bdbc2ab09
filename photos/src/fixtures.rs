//! In-memory gateway used for offline runs and tests.

use crate::errors::FetchError;
use crate::gateway::PhotosGateway;
use crate::types::RawPhoto;
use async_trait::async_trait;
use reqwest::StatusCode;

/// Serves a fixed set of records. Unknown ids behave like an upstream 404.
#[derive(Clone, Debug)]
pub struct FixturePhotosGateway {
    records: Vec<RawPhoto>,
}

impl FixturePhotosGateway {
    pub fn new(records: Vec<RawPhoto>) -> Self {
        FixturePhotosGateway { records }
    }
}

impl Default for FixturePhotosGateway {
    /// The first five records of the public demo service.
    fn default() -> Self {
        let sample = |id: i64, title: &str, color: &str| RawPhoto {
            album_id: 1,
            id,
            title: title.into(),
            url: format!("https://via.placeholder.com/600/{color}"),
            thumbnail_url: format!("https://via.placeholder.com/150/{color}"),
        };

        FixturePhotosGateway::new(vec![
            sample(1, "accusamus beatae ad facilis cum similique qui sunt", "92c952"),
            sample(2, "reprehenderit est deserunt velit ipsam", "771796"),
            sample(3, "officia porro iure quia iusto qui ipsa ut modi", "24f355"),
            sample(4, "culpa odio esse rerum omnis laboriosam voluptate repudiandae", "d32776"),
            sample(5, "natus nisi omnis corporis facere mollitia rerum in", "f66b97"),
        ])
    }
}

#[async_trait]
impl PhotosGateway for FixturePhotosGateway {
    async fn list_photos(&self) -> Result<Vec<RawPhoto>, FetchError> {
        Ok(self.records.clone())
    }

    async fn get_photo(&self, photo_id: i64) -> Result<RawPhoto, FetchError> {
        self.records
            .iter()
            .find(|record| record.id == photo_id)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: format!("fixture:///photos/{photo_id}"),
                status: StatusCode::NOT_FOUND,
            })
    }
}
