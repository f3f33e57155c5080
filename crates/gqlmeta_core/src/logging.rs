//! Logging initialization.
//!
//! Events go to stderr so command output on stdout stays clean. `RUST_LOG`
//! overrides the level chosen on the command line.

use std::sync::Once;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";

/// Output profile for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Human-readable lines.
    Human,
    /// One JSON object per event.
    Json,
    /// No output; used by tests.
    Quiet,
}

impl Profile {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        if value.eq_ignore_ascii_case("text") || value.eq_ignore_ascii_case("human") {
            return Ok(Self::Human);
        }
        if value.eq_ignore_ascii_case("json") {
            return Ok(Self::Json);
        }
        anyhow::bail!("unsupported log format: {value} (expected text|json)")
    }
}

static INIT_ONCE: Once = Once::new();

/// Install the global subscriber. Later calls are no-ops.
pub fn init(profile: Profile, level: &str) {
    INIT_ONCE.call_once(|| {
        let filter = || {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
        };
        match profile {
            Profile::Human => {
                tracing_subscriber::fmt()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_env_filter(filter())
                    .init();
            }
            Profile::Json => {
                tracing_subscriber::fmt()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_env_filter(filter())
                    .init();
            }
            Profile::Quiet => {
                tracing_subscriber::registry().init();
            }
        }
    });
}

fn default_directives(level: &str) -> String {
    let level = level.trim();
    let level = if level.is_empty() { "info" } else { level };
    format!("gqlmeta={level},gqlmeta_core={level}")
}
