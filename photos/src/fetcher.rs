use crate::config::ExternalSettings;
use crate::errors::FetchError;
use crate::metrics_defs::{UPSTREAM_ATTEMPTS, UPSTREAM_FAILURES, UPSTREAM_RETRIES};
use rand::Rng;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use shared::counter;
use std::time::Duration;
use tokio::time::sleep;

/// Statuses that are always worth another attempt.
pub const DEFAULT_RETRY_STATUSES: &[StatusCode] = &[
    StatusCode::BAD_GATEWAY,         // 502
    StatusCode::SERVICE_UNAVAILABLE, // 503
    StatusCode::GATEWAY_TIMEOUT,     // 504
];

/// How a single upstream GET is attempted and retried.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    /// Base of the exponential backoff, in seconds.
    pub backoff_factor: f64,
    pub retry_statuses: Vec<StatusCode>,
}

impl From<&ExternalSettings> for RetryPolicy {
    fn from(settings: &ExternalSettings) -> Self {
        RetryPolicy {
            timeout: settings.timeout(),
            max_retries: settings.max_retries,
            backoff_factor: settings.backoff_factor,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `attempts_made` failed attempts:
    /// `backoff_factor * 2^attempts_made` plus up to `backoff_factor` of jitter.
    pub fn backoff_delay<R: Rng + ?Sized>(&self, attempts_made: u32, rng: &mut R) -> Duration {
        let base = self.backoff_factor * 2f64.powi(attempts_made.min(i32::MAX as u32) as i32);
        // gen_range panics on an empty range
        let jitter = if self.backoff_factor > 0.0 {
            rng.gen_range(0.0..self.backoff_factor)
        } else {
            0.0
        };

        Duration::try_from_secs_f64(base + jitter).unwrap_or(Duration::MAX)
    }

    /// Connect failures, timeouts, protocol errors and server-side statuses are retried.
    /// Client errors such as 404 are final.
    pub fn is_retryable(&self, error: &FetchError) -> bool {
        match error {
            FetchError::Transport { source, .. } => !source.is_builder(),
            FetchError::Status { status, .. } => {
                self.retry_statuses.contains(status) || status.is_server_error()
            }
            FetchError::InvalidUrl { .. } | FetchError::Decode { .. } => false,
        }
    }
}

/// GETs `url` and decodes the JSON body, retrying transient failures with exponential
/// backoff and jitter. Makes at most `max_retries + 1` attempts.
///
/// Every attempt uses its own client, so no connection outlives the attempt that opened it.
/// Dropping the returned future aborts the in-flight request or the pending backoff sleep.
pub async fn fetch_json<T: DeserializeOwned>(
    url: &str,
    policy: &RetryPolicy,
) -> Result<T, FetchError> {
    let parsed = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;

    let mut attempts_made = 0;

    loop {
        counter!(UPSTREAM_ATTEMPTS).increment(1);

        let error = match attempt(&parsed, policy.timeout).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !policy.is_retryable(&error) || attempts_made >= policy.max_retries {
            counter!(UPSTREAM_FAILURES).increment(1);
            tracing::warn!(url, attempts = attempts_made + 1, error = %error, "upstream request failed");
            return Err(error);
        }

        let delay = policy.backoff_delay(attempts_made, &mut rand::thread_rng());
        tracing::info!(
            url,
            attempt = attempts_made + 1,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying upstream request"
        );
        counter!(UPSTREAM_RETRIES).increment(1);
        sleep(delay).await;
        attempts_made += 1;
    }
}

async fn attempt<T: DeserializeOwned>(url: &Url, timeout: Duration) -> Result<T, FetchError> {
    let transport = |source| FetchError::Transport {
        url: url.to_string(),
        source,
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(transport)?;

    let response = client.get(url.clone()).send().await.map_err(transport)?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status,
        });
    }

    let body = response.bytes().await.map_err(transport)?;
    serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(5),
            max_retries,
            backoff_factor: 0.0,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.unwrap().len()
    }

    #[test]
    fn test_backoff_bounds() {
        let policy = RetryPolicy {
            backoff_factor: 0.2,
            ..test_policy(5)
        };
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 0..6u32 {
            let lower = 0.2 * 2f64.powi(attempt as i32);
            for _ in 0..50 {
                let delay = policy.backoff_delay(attempt, &mut rng).as_secs_f64();
                assert!(delay >= lower - 1e-9, "{delay} < {lower}");
                assert!(delay < lower + 0.2, "{delay} >= {}", lower + 0.2);
            }
        }
    }

    #[test]
    fn test_zero_backoff() {
        let policy = test_policy(3);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(policy.backoff_delay(2, &mut rng), Duration::ZERO);
    }

    #[test]
    fn test_status_retryability() {
        let policy = test_policy(1);
        let status = |status| FetchError::Status {
            url: "http://upstream/photos".into(),
            status,
        };

        assert!(policy.is_retryable(&status(StatusCode::BAD_GATEWAY)));
        assert!(policy.is_retryable(&status(StatusCode::SERVICE_UNAVAILABLE)));
        assert!(policy.is_retryable(&status(StatusCode::GATEWAY_TIMEOUT)));
        assert!(policy.is_retryable(&status(StatusCode::INTERNAL_SERVER_ERROR)));
        assert!(!policy.is_retryable(&status(StatusCode::NOT_FOUND)));
        assert!(!policy.is_retryable(&status(StatusCode::BAD_REQUEST)));
    }

    #[test]
    fn test_policy_from_settings() {
        let policy = RetryPolicy::from(&ExternalSettings::default());
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.backoff_factor, 0.2);
        assert_eq!(policy.retry_statuses, DEFAULT_RETRY_STATUSES);
    }

    #[tokio::test]
    async fn test_fetch_json_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .mount(&server)
            .await;

        let value: Value = fetch_json(&format!("{}/photos", server.uri()), &test_policy(2))
            .await
            .unwrap();

        assert_eq!(value, json!([{"id": 1}]));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        for max_retries in [0, 1, 3] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server)
                .await;

            let result: Result<Value, _> =
                fetch_json(&format!("{}/photos", server.uri()), &test_policy(max_retries)).await;

            assert!(matches!(
                result.unwrap_err(),
                FetchError::Status { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE
            ));
            assert_eq!(request_count(&server).await, max_retries as usize + 1);
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let server = MockServer::start().await;
        // Two failures, then the fallback mock answers
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
            .mount(&server)
            .await;

        let value: Value = fetch_json(&format!("{}/photos/42", server.uri()), &test_policy(3))
            .await
            .unwrap();

        assert_eq!(value["id"], 42);
        assert_eq!(request_count(&server).await, 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photos/9999"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result: Result<Value, _> =
            fetch_json(&format!("{}/photos/9999", server.uri()), &test_policy(2)).await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_malformed_json_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let result: Result<Value, _> =
            fetch_json(&format!("{}/photos", server.uri()), &test_policy(2)).await;

        assert!(matches!(result.unwrap_err(), FetchError::Decode { .. }));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let policy = RetryPolicy {
            timeout: Duration::from_millis(50),
            ..test_policy(1)
        };
        let result: Result<Value, _> = fetch_json(&format!("{}/photos", server.uri()), &policy).await;

        match result.unwrap_err() {
            FetchError::Transport { source, .. } => assert!(source.is_timeout()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port with nothing listening on it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result: Result<Value, _> =
            fetch_json(&format!("http://127.0.0.1:{port}/photos"), &test_policy(1)).await;

        let error = result.unwrap_err();
        assert!(matches!(error, FetchError::Transport { .. }));
        assert!(error.is_upstream());
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let result: Result<Value, _> = fetch_json("not a url", &test_policy(2)).await;
        assert!(matches!(result.unwrap_err(), FetchError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_stops_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let policy = RetryPolicy {
            backoff_factor: 10.0,
            ..test_policy(5)
        };
        let url = format!("{}/photos", server.uri());
        let result = tokio::time::timeout(
            Duration::from_millis(300),
            fetch_json::<Value>(&url, &policy),
        )
        .await;

        // The caller gave up during the first backoff sleep
        assert!(result.is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(request_count(&server).await, 1);
    }
}
