use reqwest::StatusCode;

/// Errors raised while talking to the upstream photo service.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Connect failures, timeouts and protocol errors.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    /// Whether the upstream answered that the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// Whether the failure came from the upstream (as opposed to a local problem
    /// such as a malformed URL or an undecodable body).
    pub fn is_upstream(&self) -> bool {
        matches!(self, FetchError::Transport { .. } | FetchError::Status { .. })
    }
}

/// A raw record failed a domain check before mapping.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("photo {id} is invalid: {reason}")]
    InvalidPhoto { id: i64, reason: String },
}

/// Errors surfaced by the photo service to the API layer.
#[derive(thiserror::Error, Debug)]
pub enum PhotosError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl PhotosError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PhotosError::Fetch(e) if e.is_not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(status: StatusCode) -> FetchError {
        FetchError::Status {
            url: "http://upstream/photos/1".into(),
            status,
        }
    }

    #[test]
    fn test_not_found_classification() {
        assert!(status_error(StatusCode::NOT_FOUND).is_not_found());
        assert!(!status_error(StatusCode::BAD_GATEWAY).is_not_found());
        assert!(PhotosError::from(status_error(StatusCode::NOT_FOUND)).is_not_found());

        let validation = PhotosError::from(ValidationError::InvalidPhoto {
            id: 1,
            reason: "empty title".into(),
        });
        assert!(!validation.is_not_found());
    }

    #[test]
    fn test_upstream_classification() {
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE).is_upstream());

        let decode = FetchError::Decode {
            url: "http://upstream/photos".into(),
            source: serde_json::from_str::<serde_json::Value>("not json").unwrap_err(),
        };
        assert!(!decode.is_upstream());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            status_error(StatusCode::NOT_FOUND).to_string(),
            "http://upstream/photos/1 returned 404 Not Found"
        );
    }
}
