//! Ambient configuration for the core service, layered over a TOML file
//! plus environment overrides, following the `MitigationConfig::from_file`
//! pattern elsewhere in this codebase. None of this configures the
//! per-node probe model of the data model — every node field there is
//! user-supplied and validated independently; this is process-wide
//! operational configuration only.

use std::collections::BTreeSet;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::model::Node;

/// Process-wide configuration for the core service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub metrics_addr: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Dashboard cache TTL in seconds (spec.md §4.4 fixes this at 30).
    pub dashboard_cache_ttl_seconds: u64,
    /// Bucket width used by `DashboardOverview` (spec.md §6 fixes this at 30).
    pub dashboard_bucket_seconds: u64,
    /// Lookback window used by `DashboardOverview` (spec.md §6 fixes this at 5 minutes).
    pub dashboard_window_seconds: u64,
    /// Default `expected_status_codes` applied when a `CreateNode` request
    /// omits the field.
    pub default_expected_status_codes: BTreeSet<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub env_filter_default: String,
    pub json: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            server: ServerConfig {
                listen_addr: "127.0.0.1:8080".parse().unwrap(),
                metrics_addr: "127.0.0.1:9091".parse().unwrap(),
            },
            telemetry: TelemetryConfig {
                dashboard_cache_ttl_seconds: 30,
                dashboard_bucket_seconds: 30,
                dashboard_window_seconds: 300,
                default_expected_status_codes: Node::default_expected_status_codes(),
            },
            logging: LoggingConfig {
                env_filter_default: "uptime_api=info,uptime_core=info".to_string(),
                json: false,
            },
        }
    }
}

impl CoreConfig {
    /// Loads configuration from `path`, layering environment overrides
    /// under the `UPTIME__` prefix over the file. Missing fields fall
    /// back to `Default::default()`'s values.
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("UPTIME").separator("__"))
            .build()?;

        match settings.try_deserialize::<PartialCoreConfig>() {
            Ok(partial) => Ok(partial.into_full()),
            Err(e) => Err(e),
        }
    }
}

/// Mirrors `CoreConfig` with every field optional, so a file/environment
/// that sets only a few keys still deserializes; anything unset takes
/// the corresponding `CoreConfig::default()` value.
#[derive(Debug, Clone, Deserialize)]
struct PartialCoreConfig {
    server: Option<PartialServerConfig>,
    telemetry: Option<PartialTelemetryConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct PartialServerConfig {
    listen_addr: Option<SocketAddr>,
    metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone, Deserialize)]
struct PartialTelemetryConfig {
    dashboard_cache_ttl_seconds: Option<u64>,
    dashboard_bucket_seconds: Option<u64>,
    dashboard_window_seconds: Option<u64>,
    default_expected_status_codes: Option<BTreeSet<u16>>,
}

#[derive(Debug, Clone, Deserialize)]
struct PartialLoggingConfig {
    env_filter_default: Option<String>,
    json: Option<bool>,
}

impl PartialCoreConfig {
    fn into_full(self) -> CoreConfig {
        let defaults = CoreConfig::default();
        CoreConfig {
            server: ServerConfig {
                listen_addr: self
                    .server
                    .as_ref()
                    .and_then(|s| s.listen_addr)
                    .unwrap_or(defaults.server.listen_addr),
                metrics_addr: self
                    .server
                    .as_ref()
                    .and_then(|s| s.metrics_addr)
                    .unwrap_or(defaults.server.metrics_addr),
            },
            telemetry: TelemetryConfig {
                dashboard_cache_ttl_seconds: self
                    .telemetry
                    .as_ref()
                    .and_then(|t| t.dashboard_cache_ttl_seconds)
                    .unwrap_or(defaults.telemetry.dashboard_cache_ttl_seconds),
                dashboard_bucket_seconds: self
                    .telemetry
                    .as_ref()
                    .and_then(|t| t.dashboard_bucket_seconds)
                    .unwrap_or(defaults.telemetry.dashboard_bucket_seconds),
                dashboard_window_seconds: self
                    .telemetry
                    .as_ref()
                    .and_then(|t| t.dashboard_window_seconds)
                    .unwrap_or(defaults.telemetry.dashboard_window_seconds),
                default_expected_status_codes: self
                    .telemetry
                    .and_then(|t| t.default_expected_status_codes)
                    .unwrap_or(defaults.telemetry.default_expected_status_codes),
            },
            logging: LoggingConfig {
                env_filter_default: self
                    .logging
                    .as_ref()
                    .and_then(|l| l.env_filter_default.clone())
                    .unwrap_or(defaults.logging.env_filter_default),
                json: self
                    .logging
                    .as_ref()
                    .and_then(|l| l.json)
                    .unwrap_or(defaults.logging.json),
            },
        }
    }
}
