//! Migration driver: the handle a metadata command runs against.
//!
//! A driver is produced by a [`DriverFactory`] from the migrations directory,
//! the engine endpoint and credential. The HTTP factory scans local
//! migrations, checks that the engine answers and is recent enough, and hands
//! back a [`MigrationDriver`] speaking the engine's `/v1/query` API.

use std::env;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use semver::Version;
use serde_json::{Value, json};
use tracing::{Span, debug, warn};

use crate::errors::DriverError;
use crate::metadata::MetadataApi;
use crate::migrations::{LocalMigration, scan_migrations};

/// Oldest engine release whose metadata API this tool speaks.
pub const MINIMUM_ENGINE_VERSION: &str = "1.0.0-alpha.1";

pub const ADMIN_SECRET_HEADER: &str = "X-Hasura-Admin-Secret";

const VERSION_PATH: &str = "v1/version";
const QUERY_PATH: &str = "v1/query";

/// Everything a factory needs to build a driver.
#[derive(Debug, Clone, Copy)]
pub struct DriverRequest<'a> {
    pub migrations_dir: &'a Path,
    pub endpoint: &'a Url,
    pub admin_secret: Option<&'a str>,
    pub logger: &'a Span,
    pub version: &'a str,
}

pub trait DriverFactory {
    type Driver: MetadataApi;

    fn connect(&self, request: &DriverRequest<'_>) -> Result<Self::Driver, DriverError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 2,
            max_write_retries: 0,
            retry_delay_ms: 500,
        }
    }
}

impl HttpClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str| {
            lookup_env(key).and_then(|value| value.trim().parse::<u64>().ok())
        };
        Self {
            timeout_ms: number("GQLMETA_HTTP_TIMEOUT_MS").unwrap_or(defaults.timeout_ms),
            max_retries: number("GQLMETA_HTTP_RETRIES")
                .and_then(|value| usize::try_from(value).ok())
                .unwrap_or(defaults.max_retries),
            max_write_retries: number("GQLMETA_HTTP_WRITE_RETRIES")
                .and_then(|value| usize::try_from(value).ok())
                .unwrap_or(defaults.max_write_retries),
            retry_delay_ms: number("GQLMETA_HTTP_RETRY_DELAY_MS")
                .unwrap_or(defaults.retry_delay_ms),
        }
    }
}

/// Builds [`MigrationDriver`]s against a live engine.
#[derive(Debug, Clone, Default)]
pub struct HttpDriverFactory {
    config: HttpClientConfig,
}

impl HttpDriverFactory {
    pub fn new(config: HttpClientConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(HttpClientConfig::from_env())
    }
}

impl DriverFactory for HttpDriverFactory {
    type Driver = MigrationDriver;

    fn connect(&self, request: &DriverRequest<'_>) -> Result<MigrationDriver, DriverError> {
        let _entered = request.logger.enter();

        let local_migrations = scan_migrations(request.migrations_dir)?;
        debug!(
            dir = %request.migrations_dir.display(),
            count = local_migrations.len(),
            "scanned local migrations"
        );

        let version_url = join_endpoint(request.endpoint, VERSION_PATH)?;
        let query_url = join_endpoint(request.endpoint, QUERY_PATH)?;

        let client = Client::builder()
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .user_agent(format!("gqlmeta/{}", request.version))
            .build()
            .map_err(DriverError::Client)?;

        let server_version = fetch_server_version(&client, request.endpoint, &version_url)?;
        debug!(
            server_version = %server_version,
            cli_version = request.version,
            "engine version"
        );
        check_engine_compatible(request.endpoint, &server_version)?;

        Ok(MigrationDriver {
            client,
            query_url,
            admin_secret: request.admin_secret.map(ToString::to_string),
            span: request.logger.clone(),
            config: self.config.clone(),
            server_version,
            local_migrations,
            request_count: 0,
        })
    }
}

/// Connected handle to one engine plus the local migrations it was built with.
pub struct MigrationDriver {
    client: Client,
    query_url: Url,
    admin_secret: Option<String>,
    span: Span,
    config: HttpClientConfig,
    server_version: String,
    local_migrations: Vec<LocalMigration>,
    request_count: usize,
}

impl MigrationDriver {
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn local_migrations(&self) -> &[LocalMigration] {
        &self.local_migrations
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    fn run_query(&mut self, query_type: &str, args: &Value, is_write: bool) -> Result<Value> {
        let span = self.span.clone();
        let _entered = span.enter();

        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let body = json!({ "type": query_type, "args": args });

        for attempt in 0..=max_retries {
            self.request_count += 1;
            debug!(query = query_type, attempt, "engine query");
            let mut request = self.client.post(self.query_url.clone()).json(&body);
            if let Some(secret) = &self.admin_secret {
                request = request.header(ADMIN_SECRET_HEADER, secret);
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        let text = response.text().unwrap_or_default();
                        bail!(describe_api_error(status, &text));
                    }
                    return response
                        .json::<Value>()
                        .context("failed to decode engine API JSON response");
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context(format!("failed to call {query_type}"));
                }
            }
        }

        bail!("engine API request exhausted retry budget")
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        warn!(attempt, delay_ms = base, "retrying engine query");
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl MetadataApi for MigrationDriver {
    fn export_metadata(&mut self) -> Result<Value> {
        self.run_query("export_metadata", &json!({}), false)
    }

    fn replace_metadata(&mut self, metadata: &Value) -> Result<()> {
        self.run_query("replace_metadata", metadata, true)?;
        Ok(())
    }

    fn clear_metadata(&mut self) -> Result<()> {
        self.run_query("clear_metadata", &json!({}), true)?;
        Ok(())
    }

    fn reload_metadata(&mut self) -> Result<()> {
        self.run_query("reload_metadata", &json!({}), true)?;
        Ok(())
    }
}

fn join_endpoint(endpoint: &Url, path: &str) -> Result<Url, DriverError> {
    let mut base = endpoint.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path).map_err(|error| DriverError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: error.to_string(),
    })
}

fn fetch_server_version(
    client: &Client,
    endpoint: &Url,
    version_url: &Url,
) -> Result<String, DriverError> {
    let incompatible = |reason: String| DriverError::Incompatible {
        endpoint: endpoint.to_string(),
        reason,
    };

    let response = client
        .get(version_url.clone())
        .send()
        .map_err(|source| DriverError::Unreachable {
            endpoint: endpoint.to_string(),
            source,
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(incompatible(format!("HTTP {status} from {version_url}")));
    }
    let payload: Value = response
        .json()
        .map_err(|error| incompatible(format!("invalid version response: {error}")))?;
    payload
        .get("version")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| incompatible("server did not report a version".to_string()))
}

/// The engine is compatible when its version is at least
/// [`MINIMUM_ENGINE_VERSION`]. Non-semver versions (development builds) pass.
fn check_engine_compatible(endpoint: &Url, server_version: &str) -> Result<(), DriverError> {
    check_against_minimum(endpoint, server_version, MINIMUM_ENGINE_VERSION)
}

fn check_against_minimum(
    endpoint: &Url,
    server_version: &str,
    minimum_version: &str,
) -> Result<(), DriverError> {
    let minimum = Version::parse(minimum_version).map_err(|error| DriverError::Incompatible {
        endpoint: endpoint.to_string(),
        reason: format!("invalid minimum engine version {minimum_version}: {error}"),
    })?;

    let Ok(server) = Version::parse(server_version.trim_start_matches('v')) else {
        warn!(
            server_version,
            "engine reported a non-semver version; skipping compatibility check"
        );
        return Ok(());
    };

    if server < minimum {
        return Err(DriverError::Incompatible {
            endpoint: endpoint.to_string(),
            reason: format!(
                "server version {server_version} is older than the minimum supported {minimum_version}"
            ),
        });
    }
    Ok(())
}

fn describe_api_error(status: StatusCode, body: &str) -> String {
    let payload = serde_json::from_str::<Value>(body).ok();
    let field = |name: &str| {
        payload
            .as_ref()
            .and_then(|value| value.get(name))
            .and_then(Value::as_str)
            .map(ToString::to_string)
    };
    match (field("code"), field("error")) {
        (Some(code), Some(error)) => format!("engine API error [{code}]: {error}"),
        (None, Some(error)) => format!("engine API error: {error}"),
        _ => format!("engine API request failed with HTTP {status}"),
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}
