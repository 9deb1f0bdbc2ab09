use crate::types::{Photo, RawPhoto};

/// Converts an upstream record into the API's photo.
pub fn photo_from_raw(raw: RawPhoto) -> Photo {
    Photo {
        album_id: raw.album_id,
        id: raw.id,
        title: raw.title,
        url: raw.url,
        thumbnail_url: raw.thumbnail_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_photo_from_raw() {
        let raw: RawPhoto = serde_json::from_str(
            r#"{
                "albumId": 4,
                "id": 151,
                "title": "possimus dolor minima provident ipsam",
                "url": "https://via.placeholder.com/600/1d2ad4",
                "thumbnailUrl": "https://via.placeholder.com/150/1d2ad4"
            }"#,
        )
        .unwrap();

        let photo = photo_from_raw(raw.clone());

        assert_eq!(photo.album_id, raw.album_id);
        assert_eq!(photo.id, raw.id);
        assert_eq!(photo.title, raw.title);
        assert_eq!(photo.url, raw.url);
        assert_eq!(photo.thumbnail_url, raw.thumbnail_url);
    }
}
