//! Telemetry initialization.
//!
//! Controlled by `SCAFFOLD_LOG`:
//! - unset or empty → no subscriber (tracing disabled, zero overhead)
//! - `"json"` → JSON events to stderr, filtered by `RUST_LOG` (default `info`)
//! - anything else → used as the filter directive, human-readable to stderr
//!
//! User-facing status lines never go through here; they go through the
//! conflict adapter.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Env var that selects the telemetry mode.
pub const LOG_ENV: &str = "SCAFFOLD_LOG";

/// What [`init`] installs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogMode {
    /// Nothing.
    Off,
    /// JSON lines on stderr.
    Json,
    /// Compact text on stderr with this filter directive.
    Text(String),
}

impl LogMode {
    /// Interpret a `SCAFFOLD_LOG` value.
    #[must_use]
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Off,
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            Some(v) => Self::Text(v.to_owned()),
        }
    }
}

/// Guard returned by [`init`]. Hold it until the program exits.
#[derive(Debug)]
pub struct TelemetryGuard {
    mode: LogMode,
}

impl TelemetryGuard {
    /// The mode that was installed.
    #[must_use]
    pub const fn mode(&self) -> &LogMode {
        &self.mode
    }
}

/// Initialize telemetry from `SCAFFOLD_LOG`.
///
/// A second call (or a subscriber installed elsewhere) leaves the existing
/// subscriber in place.
#[must_use]
pub fn init() -> TelemetryGuard {
    let value = std::env::var(LOG_ENV).ok();
    init_with(LogMode::from_env_value(value.as_deref()))
}

/// Install the subscriber for `mode`.
#[must_use]
pub fn init_with(mode: LogMode) -> TelemetryGuard {
    let installed = match &mode {
        LogMode::Off => Ok(()),
        LogMode::Json => {
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .try_init()
        }
        LogMode::Text(directive) => {
            let filter = EnvFilter::try_new(directive).unwrap_or_else(|e| {
                eprintln!("warning: invalid {LOG_ENV} directive '{directive}': {e}");
                EnvFilter::new("info")
            });
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_writer(std::io::stderr),
                )
                .try_init()
        }
    };
    if let Err(e) = installed {
        eprintln!("warning: telemetry not installed: {e}");
    }
    TelemetryGuard { mode }
}
