use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use tracing::{Span, info_span, warn};

use crate::config::{
    DEFAULT_ENDPOINT, DEFAULT_METADATA_FILENAME, DEFAULT_MIGRATIONS_DIR, ProjectConfig,
};
use crate::runtime::{ResolvedPaths, ValueSource, non_blank_env, normalize_for_display};

pub const ENDPOINT_ENV: &str = "HASURA_GRAPHQL_ENDPOINT";
pub const ADMIN_SECRET_ENV: &str = "HASURA_GRAPHQL_ADMIN_SECRET";
pub const ACCESS_KEY_ENV: &str = "HASURA_GRAPHQL_ACCESS_KEY";

/// Engine endpoint and credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub endpoint: String,
    pub parsed_endpoint: Url,
    pub admin_secret: Option<String>,
}

impl ServerConfig {
    /// Parse and validate an endpoint. Only absolute `http`/`https` URLs are accepted.
    pub fn parse(endpoint: &str, admin_secret: Option<String>) -> Result<Self> {
        let endpoint = endpoint.trim();
        let parsed_endpoint =
            Url::parse(endpoint).with_context(|| format!("invalid endpoint: {endpoint}"))?;
        if !matches!(parsed_endpoint.scheme(), "http" | "https") {
            bail!(
                "invalid endpoint: {endpoint} (scheme must be http or https, got {})",
                parsed_endpoint.scheme()
            );
        }
        if parsed_endpoint.host_str().is_none() {
            bail!("invalid endpoint: {endpoint} (missing host)");
        }
        Ok(Self {
            endpoint: endpoint.to_string(),
            parsed_endpoint,
            admin_secret: admin_secret
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        })
    }
}

/// Where the server values of a context came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSources {
    pub endpoint: ValueSource,
    pub admin_secret: Option<ValueSource>,
}

/// Read-only configuration for one CLI invocation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub server: ServerConfig,
    pub metadata_file: PathBuf,
    pub migrations_dir: PathBuf,
    pub logger: Span,
    pub version: String,
    pub sources: ContextSources,
}

impl ExecutionContext {
    /// Build a context from already validated parts. Sources are reported as
    /// defaults until [`ExecutionContext::with_sources`] says otherwise.
    pub fn new(
        server: ServerConfig,
        metadata_file: PathBuf,
        migrations_dir: PathBuf,
        version: &str,
    ) -> Self {
        let logger = info_span!("gqlmeta", endpoint = %server.parsed_endpoint);
        Self {
            server,
            metadata_file,
            migrations_dir,
            logger,
            version: version.to_string(),
            sources: ContextSources {
                endpoint: ValueSource::Default,
                admin_secret: None,
            },
        }
    }

    pub fn with_sources(mut self, sources: ContextSources) -> Self {
        self.sources = sources;
        self
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "endpoint={} ({})\nadmin_secret={}\nmigrations_dir={}\nmetadata_file={}\nversion={}",
            self.server.parsed_endpoint,
            self.sources.endpoint.as_str(),
            match (&self.server.admin_secret, self.sources.admin_secret) {
                (Some(_), Some(source)) => format!("<set> ({})", source.as_str()),
                (Some(_), None) => "<set>".to_string(),
                (None, _) => "<none>".to_string(),
            },
            normalize_for_display(&self.migrations_dir),
            normalize_for_display(&self.metadata_file),
            self.version,
        )
    }
}

/// Command-line values for the server connection.
#[derive(Debug, Clone, Default)]
pub struct ServerOverrides {
    pub endpoint: Option<String>,
    pub admin_secret: Option<String>,
    /// Deprecated alias of `admin_secret`.
    pub access_key: Option<String>,
}

pub fn resolve_execution_context(
    paths: &ResolvedPaths,
    config: &ProjectConfig,
    overrides: &ServerOverrides,
    version: &str,
) -> Result<ExecutionContext> {
    resolve_execution_context_with_lookup(paths, config, overrides, version, |key| {
        env::var(key).ok()
    })
}

pub(crate) fn resolve_execution_context_with_lookup<F>(
    paths: &ResolvedPaths,
    config: &ProjectConfig,
    overrides: &ServerOverrides,
    version: &str,
    lookup_env: F,
) -> Result<ExecutionContext>
where
    F: Fn(&str) -> Option<String>,
{
    let (endpoint, endpoint_source) = if let Some(value) = non_blank(&overrides.endpoint) {
        (value, ValueSource::Flag)
    } else if let Some(value) = non_blank_env(&lookup_env, ENDPOINT_ENV) {
        (value, ValueSource::Env)
    } else if let Some(value) = config.endpoint() {
        (value.to_string(), ValueSource::Config)
    } else {
        (DEFAULT_ENDPOINT.to_string(), ValueSource::Default)
    };

    let deprecated_key = non_blank(&overrides.access_key);
    if deprecated_key.is_some() {
        warn!("--access-key is deprecated, use --admin-secret instead");
    }
    let admin_secret = if let Some(value) = non_blank(&overrides.admin_secret) {
        Some((value, ValueSource::Flag))
    } else if let Some(value) = deprecated_key {
        Some((value, ValueSource::Flag))
    } else if let Some(value) = non_blank_env(&lookup_env, ADMIN_SECRET_ENV) {
        Some((value, ValueSource::Env))
    } else if let Some(value) = non_blank_env(&lookup_env, ACCESS_KEY_ENV) {
        warn!("{ACCESS_KEY_ENV} is deprecated, use {ADMIN_SECRET_ENV} instead");
        Some((value, ValueSource::Env))
    } else {
        config
            .admin_secret()
            .map(|value| (value.to_string(), ValueSource::Config))
    };
    let (admin_secret, secret_source) = match admin_secret {
        Some((value, source)) => (Some(value), Some(source)),
        None => (None, None),
    };

    let server = ServerConfig::parse(&endpoint, admin_secret)?;

    let migrations_dir = paths.project_path(config.migrations_dir().unwrap_or(DEFAULT_MIGRATIONS_DIR));
    let metadata_file = match config.metadata_file() {
        Some(value) => paths.project_path(value),
        None => migrations_dir.join(DEFAULT_METADATA_FILENAME),
    };

    Ok(
        ExecutionContext::new(server, metadata_file, migrations_dir, version).with_sources(
            ContextSources {
                endpoint: endpoint_source,
                admin_secret: secret_source,
            },
        ),
    )
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;

    use super::*;
    use crate::config::{PathsSection, ServerSection};
    use crate::logging::tests::capture_logs;

    fn paths(root: &Path) -> ResolvedPaths {
        ResolvedPaths {
            project_root: root.to_path_buf(),
            config_path: root.join("gqlmeta.toml"),
            root_source: ValueSource::Flag,
            config_source: ValueSource::Default,
        }
    }

    #[test]
    fn server_config_accepts_http_urls() {
        let server = ServerConfig::parse(" http://localhost:8080 ", Some(" ".to_string()))
            .expect("parse");
        assert_eq!(server.endpoint, "http://localhost:8080");
        assert_eq!(server.parsed_endpoint.as_str(), "http://localhost:8080/");
        assert!(server.admin_secret.is_none());
    }

    #[test]
    fn server_config_rejects_invalid_endpoints() {
        let error = ServerConfig::parse("localhost:8080", None).expect_err("must fail");
        assert!(error.to_string().contains("invalid endpoint"));
        let error = ServerConfig::parse("ftp://example.com", None).expect_err("must fail");
        assert!(error.to_string().contains("scheme must be http or https"));
        assert!(ServerConfig::parse("not a url", None).is_err());
    }

    #[test]
    fn defaults_apply_without_flags_env_or_config() {
        let root = Path::new("/srv/project");
        let context = resolve_execution_context_with_lookup(
            &paths(root),
            &ProjectConfig::default(),
            &ServerOverrides::default(),
            "0.1.0",
            |_| None,
        )
        .expect("resolve");

        assert_eq!(context.server.parsed_endpoint.as_str(), "http://localhost:8080/");
        assert_eq!(context.sources.endpoint, ValueSource::Default);
        assert!(context.server.admin_secret.is_none());
        assert_eq!(context.migrations_dir, root.join("migrations"));
        assert_eq!(context.metadata_file, root.join("migrations/metadata.yaml"));
        assert_eq!(context.version, "0.1.0");
    }

    #[test]
    fn flag_beats_env_beats_config() {
        let root = Path::new("/srv/project");
        let config = ProjectConfig {
            server: ServerSection {
                endpoint: Some("http://config:8080".to_string()),
                admin_secret: Some("from-config".to_string()),
            },
            paths: PathsSection {
                migrations_dir: Some("db/migrations".to_string()),
                metadata_file: Some("/abs/metadata.json".to_string()),
            },
        };
        let env = HashMap::from([
            (ENDPOINT_ENV.to_string(), "http://env:8080".to_string()),
            (ADMIN_SECRET_ENV.to_string(), "from-env".to_string()),
        ]);
        let lookup = |key: &str| env.get(key).cloned();

        let from_env = resolve_execution_context_with_lookup(
            &paths(root),
            &config,
            &ServerOverrides::default(),
            "0.1.0",
            lookup,
        )
        .expect("resolve");
        assert_eq!(from_env.server.endpoint, "http://env:8080");
        assert_eq!(from_env.server.admin_secret.as_deref(), Some("from-env"));
        assert_eq!(from_env.sources.admin_secret, Some(ValueSource::Env));
        assert_eq!(from_env.migrations_dir, root.join("db/migrations"));
        assert_eq!(from_env.metadata_file, Path::new("/abs/metadata.json"));

        let from_flag = resolve_execution_context_with_lookup(
            &paths(root),
            &config,
            &ServerOverrides {
                endpoint: Some("https://flag.example.com".to_string()),
                admin_secret: Some("from-flag".to_string()),
                access_key: None,
            },
            "0.1.0",
            lookup,
        )
        .expect("resolve");
        assert_eq!(from_flag.server.endpoint, "https://flag.example.com");
        assert_eq!(from_flag.server.admin_secret.as_deref(), Some("from-flag"));
        assert_eq!(from_flag.sources.endpoint, ValueSource::Flag);

        let from_config = resolve_execution_context_with_lookup(
            &paths(root),
            &config,
            &ServerOverrides::default(),
            "0.1.0",
            |_| None,
        )
        .expect("resolve");
        assert_eq!(from_config.server.endpoint, "http://config:8080");
        assert_eq!(from_config.sources.admin_secret, Some(ValueSource::Config));
    }

    #[test]
    fn deprecated_access_key_is_used_when_admin_secret_is_absent() {
        let root = Path::new("/srv/project");
        let with_key = resolve_execution_context_with_lookup(
            &paths(root),
            &ProjectConfig::default(),
            &ServerOverrides {
                access_key: Some("legacy".to_string()),
                ..ServerOverrides::default()
            },
            "0.1.0",
            |_| None,
        )
        .expect("resolve");
        assert_eq!(with_key.server.admin_secret.as_deref(), Some("legacy"));

        let both = resolve_execution_context_with_lookup(
            &paths(root),
            &ProjectConfig::default(),
            &ServerOverrides {
                admin_secret: Some("current".to_string()),
                access_key: Some("legacy".to_string()),
                ..ServerOverrides::default()
            },
            "0.1.0",
            |_| None,
        )
        .expect("resolve");
        assert_eq!(both.server.admin_secret.as_deref(), Some("current"));

        let env = HashMap::from([(ACCESS_KEY_ENV.to_string(), "env-legacy".to_string())]);
        let from_env = resolve_execution_context_with_lookup(
            &paths(root),
            &ProjectConfig::default(),
            &ServerOverrides::default(),
            "0.1.0",
            |key| env.get(key).cloned(),
        )
        .expect("resolve");
        assert_eq!(from_env.server.admin_secret.as_deref(), Some("env-legacy"));
    }

    #[test]
    fn invalid_endpoint_fails_resolution() {
        let error = resolve_execution_context_with_lookup(
            &paths(Path::new("/srv/project")),
            &ProjectConfig::default(),
            &ServerOverrides {
                endpoint: Some("::not-a-url".to_string()),
                ..ServerOverrides::default()
            },
            "0.1.0",
            |_| None,
        )
        .expect_err("must fail");
        assert!(error.to_string().contains("invalid endpoint"));
    }

    #[test]
    fn diagnostics_hide_the_secret() {
        let server = ServerConfig::parse("http://localhost:8080", Some("hunter2".to_string()))
            .expect("parse");
        let context = ExecutionContext::new(
            server,
            PathBuf::from("/tmp/metadata.json"),
            PathBuf::from("/tmp/migrations"),
            "0.1.0",
        );
        let report = context.diagnostics();
        assert!(report.contains("admin_secret=<set>"));
        assert!(!report.contains("hunter2"));
    }

    #[test]
    fn diagnostics_report_where_values_came_from() {
        let server = ServerConfig::parse("http://localhost:8080", None).expect("parse");
        let direct = ExecutionContext::new(
            server,
            PathBuf::from("/tmp/metadata.json"),
            PathBuf::from("/tmp/migrations"),
            "0.1.0",
        );
        assert_eq!(direct.sources.endpoint, ValueSource::Default);
        assert!(direct.diagnostics().contains("endpoint=http://localhost:8080/ (default)"));

        let env = HashMap::from([(ADMIN_SECRET_ENV.to_string(), "from-env".to_string())]);
        let resolved = resolve_execution_context_with_lookup(
            &paths(Path::new("/srv/project")),
            &ProjectConfig::default(),
            &ServerOverrides {
                endpoint: Some("https://flag.example.com".to_string()),
                ..ServerOverrides::default()
            },
            "0.1.0",
            |key| env.get(key).cloned(),
        )
        .expect("resolve");
        let report = resolved.diagnostics();
        assert!(report.contains("endpoint=https://flag.example.com/ (flag)"));
        assert!(report.contains("admin_secret=<set> (env)"));
    }

    #[test]
    fn deprecated_access_key_flag_logs_warning() {
        let (context, logs) = capture_logs(|| {
            resolve_execution_context_with_lookup(
                &paths(Path::new("/srv/project")),
                &ProjectConfig::default(),
                &ServerOverrides {
                    access_key: Some("legacy".to_string()),
                    ..ServerOverrides::default()
                },
                "0.1.0",
                |_| None,
            )
        });
        assert_eq!(
            context.expect("resolve").server.admin_secret.as_deref(),
            Some("legacy")
        );
        assert!(logs.contains("WARN"));
        assert!(logs.contains("--access-key is deprecated, use --admin-secret instead"));
    }

    #[test]
    fn deprecated_access_key_env_logs_warning() {
        let env = HashMap::from([(ACCESS_KEY_ENV.to_string(), "env-legacy".to_string())]);
        let (context, logs) = capture_logs(|| {
            resolve_execution_context_with_lookup(
                &paths(Path::new("/srv/project")),
                &ProjectConfig::default(),
                &ServerOverrides::default(),
                "0.1.0",
                |key| env.get(key).cloned(),
            )
        });
        assert_eq!(
            context.expect("resolve").server.admin_secret.as_deref(),
            Some("env-legacy")
        );
        assert!(logs.contains(
            "HASURA_GRAPHQL_ACCESS_KEY is deprecated, use HASURA_GRAPHQL_ADMIN_SECRET instead"
        ));
    }

    #[test]
    fn current_credentials_log_no_deprecation_warning() {
        let env = HashMap::from([(ADMIN_SECRET_ENV.to_string(), "current".to_string())]);
        let (context, logs) = capture_logs(|| {
            resolve_execution_context_with_lookup(
                &paths(Path::new("/srv/project")),
                &ProjectConfig::default(),
                &ServerOverrides::default(),
                "0.1.0",
                |key| env.get(key).cloned(),
            )
        });
        context.expect("resolve");
        assert!(!logs.contains("deprecated"));
    }
}
