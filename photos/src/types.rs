use serde::{Deserialize, Serialize};

/// A photo record exactly as the upstream service returns it.
///
/// Only lives for the duration of a single request, between the gateway and the mapper.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RawPhoto {
    #[serde(rename = "albumId")]
    pub album_id: i64,
    pub id: i64,
    pub title: String,
    pub url: String,
    #[serde(rename = "thumbnailUrl")]
    pub thumbnail_url: String,
}

/// A photo as served by this API.
///
/// Built only by [`crate::mapper::photo_from_raw`]. The serialized form keeps the
/// upstream's camelCase field names so clients see the same shape.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub album_id: i64,
    pub id: i64,
    pub title: String,
    pub url: String,
    pub thumbnail_url: String,
}
