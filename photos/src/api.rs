use crate::ServerError;
use crate::config::{CorsSettings, LIMIT_RANGE, Settings};
use crate::errors::PhotosError;
use crate::metrics_defs::{HTTP_REQUEST_DURATION, HTTP_REQUESTS};
use crate::service::PhotoService;
use http::request::Parts;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, HeaderMap, HeaderName, HeaderValue, ORIGIN, VARY,
};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::json;
use shared::http::{make_empty_response, make_json_response};
use shared::{counter, histogram};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

pub type ApiBody = BoxBody<Bytes, ServerError>;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const SERVICE_NAME: &str = "photos-api";

#[derive(Debug, PartialEq)]
enum Route<'a> {
    Root,
    Health,
    ListPhotos,
    GetPhoto(&'a str),
}

impl Route<'_> {
    /// Matches `/`, `/health`, `/v1/photos[/]` and `/v1/photos/{id}`.
    fn from_path(path: &str) -> Option<Route<'_>> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            [""] => Some(Route::Root),
            ["health"] => Some(Route::Health),
            ["v1", "photos"] => Some(Route::ListPhotos),
            ["v1", "photos", photo_id] => Some(Route::GetPhoto(photo_id)),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Route::Root => "root",
            Route::Health => "health",
            Route::ListPhotos => "list_photos",
            Route::GetPhoto(_) => "get_photo",
        }
    }
}

/// The public HTTP surface: translates requests into service calls and service errors
/// into status codes.
#[derive(Clone)]
pub struct PhotosApi {
    inner: Arc<PhotosApiInner>,
}

struct PhotosApiInner {
    service: PhotoService,
    settings: Arc<Settings>,
    cors: Cors,
}

impl PhotosApi {
    pub fn new(service: PhotoService, settings: Arc<Settings>) -> Self {
        let cors = Cors::new(&settings.cors);
        PhotosApi {
            inner: Arc::new(PhotosApiInner {
                service,
                settings,
                cors,
            }),
        }
    }

    /// Serves a request. Never fails: every error becomes a JSON `{"detail": ...}` response.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ApiBody> {
        let (parts, _) = req.into_parts();

        let request_id = parts
            .headers
            .get(&REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %parts.method,
            path = %parts.uri.path(),
        );

        async move {
            tracing::info!("request");
            let started = Instant::now();

            let route = Route::from_path(parts.uri.path());
            let route_name = route.as_ref().map_or("unmatched", Route::name);
            let mut response = self.dispatch(route, &parts).await;

            let headers = response.headers_mut();
            self.inner.cors.apply(parts.headers.get(ORIGIN), headers);
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                headers.insert(REQUEST_ID_HEADER, value);
            }

            let status = response.status();
            counter!(HTTP_REQUESTS, "route" => route_name, "status" => status.as_str().to_string())
                .increment(1);
            histogram!(HTTP_REQUEST_DURATION, "route" => route_name)
                .record(started.elapsed().as_secs_f64());
            tracing::info!(status = status.as_u16(), "response");

            response
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, route: Option<Route<'_>>, parts: &Parts) -> Response<ApiBody> {
        let Some(route) = route else {
            return error_response(StatusCode::NOT_FOUND, "Not Found");
        };

        match parts.method {
            Method::GET => {}
            Method::OPTIONS => return make_empty_response(StatusCode::NO_CONTENT),
            _ => return error_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
        }

        match route {
            Route::Root => self.root(),
            Route::Health => make_json_response(
                StatusCode::OK,
                &json!({"status": "healthy", "service": SERVICE_NAME}),
            ),
            Route::ListPhotos => self.list_photos(parts.uri.query()).await,
            Route::GetPhoto(photo_id) => self.get_photo(photo_id).await,
        }
    }

    fn root(&self) -> Response<ApiBody> {
        let settings = &self.inner.settings;
        make_json_response(
            StatusCode::OK,
            &json!({
                "message": settings.app_name,
                "version": settings.app_version,
                "health": "/health",
            }),
        )
    }

    async fn list_photos(&self, query: Option<&str>) -> Response<ApiBody> {
        let limit = match parse_limit(query) {
            Ok(limit) => limit,
            Err(detail) => return error_response(StatusCode::BAD_REQUEST, &detail),
        };

        match self.inner.service.fetch_photos(limit).await {
            Ok(photos) => make_json_response(StatusCode::OK, &photos),
            Err(e) => photos_error_response(&e, None),
        }
    }

    async fn get_photo(&self, photo_id: &str) -> Response<ApiBody> {
        let Ok(photo_id) = photo_id.parse::<i64>() else {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("photo id must be an integer, got {photo_id:?}"),
            );
        };

        match self.inner.service.fetch_photo_by_id(photo_id).await {
            Ok(photo) => make_json_response(StatusCode::OK, &photo),
            Err(e) => photos_error_response(&e, Some(photo_id)),
        }
    }
}

impl Service<Request<Incoming>> for PhotosApi {
    type Response = Response<ApiBody>;
    type Error = ServerError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let api = self.clone();
        Box::pin(async move { Ok(api.handle(req).await) })
    }
}

/// Reads the optional `limit` query parameter; the last one wins when repeated. Values
/// outside [`LIMIT_RANGE`] are rejected.
fn parse_limit(query: Option<&str>) -> Result<Option<usize>, String> {
    let Some(value) = query.and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .filter(|(key, _)| key == "limit")
            .last()
            .map(|(_, value)| value.into_owned())
    }) else {
        return Ok(None);
    };

    let out_of_range = || {
        format!(
            "limit must be between {} and {}",
            LIMIT_RANGE.start(),
            LIMIT_RANGE.end()
        )
    };

    let limit: i64 = value
        .trim()
        .parse()
        .map_err(|_| format!("limit must be an integer, got {value:?}"))?;

    usize::try_from(limit)
        .ok()
        .filter(|limit| LIMIT_RANGE.contains(limit))
        .map(Some)
        .ok_or_else(out_of_range)
}

/// Upstream 404s on a single photo become 404s; other upstream failures, including
/// records that fail validation, are the upstream's fault and become 502s.
fn photos_error_response(error: &PhotosError, photo_id: Option<i64>) -> Response<ApiBody> {
    let (status, detail) = match (error, photo_id) {
        (e, Some(photo_id)) if e.is_not_found() => (
            StatusCode::NOT_FOUND,
            format!("Photo with ID {photo_id} not found"),
        ),
        (PhotosError::Fetch(e), _) if e.is_upstream() => {
            (StatusCode::BAD_GATEWAY, format!("External API error: {e}"))
        }
        (PhotosError::Validation(e), _) => {
            (StatusCode::BAD_GATEWAY, format!("External API error: {e}"))
        }
        (PhotosError::Fetch(_), _) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        ),
    };

    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %error, "request failed");
    } else {
        tracing::info!(status = status.as_u16(), error = %error, "request failed");
    }

    error_response(status, &detail)
}

fn error_response(status: StatusCode, detail: &str) -> Response<ApiBody> {
    make_json_response(status, &json!({ "detail": detail }))
}

/// Precomputed CORS response headers.
struct Cors {
    any_origin: bool,
    origins: Vec<String>,
    methods: Option<HeaderValue>,
    headers: Option<HeaderValue>,
}

impl Cors {
    fn new(settings: &CorsSettings) -> Self {
        let origins = settings.origins();
        Cors {
            any_origin: origins.iter().any(|origin| origin == "*"),
            origins,
            methods: HeaderValue::from_str(&settings.methods().join(", ")).ok(),
            headers: HeaderValue::from_str(&settings.headers().join(", ")).ok(),
        }
    }

    /// Credentials are always allowed, and browsers reject `*` alongside them, so a
    /// wildcard answers with the request's own origin.
    fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        let allowed_origin = match origin {
            None if self.any_origin => Some(HeaderValue::from_static("*")),
            None => None,
            Some(origin) => {
                headers.insert(VARY, HeaderValue::from_static("Origin"));
                let listed = origin
                    .to_str()
                    .is_ok_and(|origin| self.origins.iter().any(|allowed| allowed == origin));
                (self.any_origin || listed).then(|| origin.clone())
            }
        };

        let Some(allowed_origin) = allowed_origin else {
            return;
        };

        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allowed_origin);
        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        if let Some(methods) = &self.methods {
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, methods.clone());
        }
        if let Some(allow_headers) = &self.headers {
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers.clone());
        }
    }
}
