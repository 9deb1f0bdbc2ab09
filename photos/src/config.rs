use serde::Deserialize;
use std::ffi::OsString;
use std::fs::File;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Prefix of environment variables that override file configuration.
pub const ENV_PREFIX: &str = "PHOTOS_API_";

/// Separates nested groups in environment variable names, e.g. `PHOTOS_API_EXTERNAL__BASE_URL`.
pub const ENV_NESTED_DELIMITER: &str = "__";

/// Accepted values for the `limit` query parameter.
pub const LIMIT_RANGE: RangeInclusive<usize> = 1..=5000;

const DEFAULT_BASE_URL: &str = "https://jsonplaceholder.typicode.com";

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("Port cannot be 0")]
    InvalidPort,
    #[error("http_timeout must be positive, got {0}")]
    InvalidTimeout(f64),
    #[error("backoff_factor must be zero or positive, got {0}")]
    InvalidBackoff(f64),
    #[error("base_url must be http or https, got {0}")]
    UnsupportedScheme(String),
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The equivalent `tracing` filter directive.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Critical | LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub log_level: LogLevel,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "0.0.0.0".into(),
            port: 8000,
            log_level: LogLevel::default(),
        }
    }
}

/// CORS lists are stored as comma-separated strings so they can be set from a single
/// environment variable.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorsSettings {
    pub allow_origins: String,
    pub allow_methods: String,
    pub allow_headers: String,
}

impl Default for CorsSettings {
    fn default() -> Self {
        CorsSettings {
            allow_origins: "*".into(),
            allow_methods: "GET".into(),
            allow_headers: "*".into(),
        }
    }
}

impl CorsSettings {
    pub fn origins(&self) -> Vec<String> {
        split_or_wildcard(&self.allow_origins)
    }

    pub fn methods(&self) -> Vec<String> {
        split_list(&self.allow_methods)
            .map(|m| m.to_uppercase())
            .collect()
    }

    pub fn headers(&self) -> Vec<String> {
        split_or_wildcard(&self.allow_headers)
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|part| !part.is_empty())
}

fn split_or_wildcard(value: &str) -> Vec<String> {
    let value = value.trim();
    if value.is_empty() || value == "*" {
        return vec!["*".into()];
    }
    split_list(value).map(String::from).collect()
}

/// Connection parameters of the upstream photo service.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExternalSettings {
    pub base_url: Url,
    /// Per-attempt timeout, in seconds.
    pub http_timeout: f64,
    pub max_retries: u32,
    /// Base of the exponential backoff, in seconds.
    pub backoff_factor: f64,
}

impl Default for ExternalSettings {
    fn default() -> Self {
        ExternalSettings {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            http_timeout: 30.0,
            max_retries: 2,
            backoff_factor: 0.2,
        }
    }
}

impl ExternalSettings {
    /// Saturates at `Duration::MAX`; `Settings::validate` rejects timeouts that do not fit.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.http_timeout).unwrap_or(Duration::MAX)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub as_json: bool,
    pub sentry_dsn: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsSettings {
    pub statsd_host: String,
    pub statsd_port: u16,
    pub prefix: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        MetricsSettings {
            statsd_host: "127.0.0.1".into(),
            statsd_port: 8125,
            prefix: "photos_api".into(),
        }
    }
}

/// Process-wide settings. Built once at startup and shared read-only.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub app_name: String,
    pub app_version: String,
    pub server: ServerSettings,
    pub cors: CorsSettings,
    pub external: ExternalSettings,
    pub logging: LoggingSettings,
    /// Metrics are only exported when this group is present.
    pub metrics: Option<MetricsSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            app_name: "Photos API".into(),
            app_version: env!("CARGO_PKG_VERSION").into(),
            server: ServerSettings::default(),
            cors: CorsSettings::default(),
            external: ExternalSettings::default(),
            logging: LoggingSettings::default(),
            metrics: None,
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Loads the optional config file, then applies overrides from the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Settings::from_file(path)?,
            None => Settings::default(),
        };
        settings.apply_env(utf8_vars(std::env::vars_os()))?;
        settings.validate()?;

        Ok(settings)
    }

    /// Applies `PHOTOS_API_*` overrides. Names are case-insensitive and unknown keys are
    /// ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), SettingsError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let upper = name.to_uppercase();
            let Some(key) = upper.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = key.to_lowercase();
            let path: Vec<&str> = key.split(ENV_NESTED_DELIMITER).collect();
            self.apply_env_value(&path, &name, value)?;
        }

        Ok(())
    }

    fn apply_env_value(
        &mut self,
        path: &[&str],
        name: &str,
        value: String,
    ) -> Result<(), SettingsError> {
        let invalid = || SettingsError::InvalidEnv {
            key: name.to_string(),
            value: value.clone(),
        };

        match path {
            ["app_name"] => self.app_name = value.clone(),
            ["app_version"] => self.app_version = value.clone(),
            ["server", "host"] => self.server.host = value.clone(),
            ["server", "port"] => self.server.port = value.trim().parse().map_err(|_| invalid())?,
            ["server", "log_level"] => {
                self.server.log_level =
                    serde_yaml::from_str(&value.trim().to_lowercase()).map_err(|_| invalid())?
            }
            ["cors", "allow_origins"] => self.cors.allow_origins = value.clone(),
            ["cors", "allow_methods"] => self.cors.allow_methods = value.clone(),
            ["cors", "allow_headers"] => self.cors.allow_headers = value.clone(),
            ["external", "base_url"] => {
                self.external.base_url = Url::parse(value.trim()).map_err(|_| invalid())?
            }
            ["external", "http_timeout"] => {
                self.external.http_timeout = value.trim().parse().map_err(|_| invalid())?
            }
            ["external", "max_retries"] => {
                self.external.max_retries = value.trim().parse().map_err(|_| invalid())?
            }
            ["external", "backoff_factor"] => {
                self.external.backoff_factor = value.trim().parse().map_err(|_| invalid())?
            }
            ["logging", "as_json"] => self.logging.as_json = parse_bool(&value).ok_or_else(invalid)?,
            ["logging", "sentry_dsn"] => {
                self.logging.sentry_dsn = Some(value.clone()).filter(|dsn| !dsn.trim().is_empty())
            }
            ["metrics", "statsd_host"] => {
                self.metrics.get_or_insert_with(Default::default).statsd_host = value.clone()
            }
            ["metrics", "statsd_port"] => {
                self.metrics.get_or_insert_with(Default::default).statsd_port =
                    value.trim().parse().map_err(|_| invalid())?
            }
            ["metrics", "prefix"] => {
                self.metrics.get_or_insert_with(Default::default).prefix = value.clone()
            }
            _ => tracing::debug!(name, "ignoring unknown environment setting"),
        }

        Ok(())
    }

    /// Validates the settings
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.server.port == 0 {
            return Err(SettingsError::InvalidPort);
        }

        let external = &self.external;
        let timeout_fits = Duration::try_from_secs_f64(external.http_timeout).is_ok();
        if !(external.http_timeout > 0.0 && timeout_fits) {
            return Err(SettingsError::InvalidTimeout(external.http_timeout));
        }
        if !(external.backoff_factor.is_finite() && external.backoff_factor >= 0.0) {
            return Err(SettingsError::InvalidBackoff(external.backoff_factor));
        }
        if !matches!(external.base_url.scheme(), "http" | "https") {
            return Err(SettingsError::UnsupportedScheme(
                external.base_url.scheme().to_string(),
            ));
        }

        Ok(())
    }
}

/// Drops variables whose name or value is not valid UTF-8; none of them can be ours.
fn utf8_vars<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
