use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::limits::DEFAULT_MAX_ADVANCE_DAYS;
use crate::telemetry::AlertPolicy;

const PREFIX: &str = "RENTRACK_";

/// Process configuration, read once from `RENTRACK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub admin_secret: Option<String>,
    pub scheduler_interval: Duration,
    pub liveness_sweep: Duration,
    pub liveness_timeout: Duration,
    pub alert_policy: AlertPolicy,
    pub max_advance_days: i64,
    pub compact_threshold: u64,
    pub telemetry_topic: String,
    pub persist_positions: bool,
    pub vehicles_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            admin_secret: None,
            scheduler_interval: Duration::from_secs(30),
            liveness_sweep: Duration::from_secs(60),
            liveness_timeout: Duration::from_secs(180),
            alert_policy: AlertPolicy::EverySweep,
            max_advance_days: DEFAULT_MAX_ADVANCE_DAYS,
            compact_threshold: 1000,
            telemetry_topic: "locationUpdate".into(),
            persist_positions: true,
            vehicles_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Keys are given without the prefix.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(&format!("{PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let d = Self::default();
        Self {
            port: parsed(&get, "PORT", d.port),
            bind: get("BIND").unwrap_or(d.bind),
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            metrics_port: get("METRICS_PORT").and_then(|raw| parse_or_warn("METRICS_PORT", &raw)),
            admin_secret: get("ADMIN_SECRET"),
            scheduler_interval: secs(&get, "SCHEDULER_INTERVAL_SECS", d.scheduler_interval),
            liveness_sweep: secs(&get, "LIVENESS_SWEEP_SECS", d.liveness_sweep),
            liveness_timeout: secs(&get, "LIVENESS_TIMEOUT_SECS", d.liveness_timeout),
            alert_policy: parsed(&get, "LIVENESS_ALERT_MODE", d.alert_policy),
            max_advance_days: parsed(&get, "MAX_ADVANCE_DAYS", d.max_advance_days).max(1),
            compact_threshold: parsed(&get, "COMPACT_THRESHOLD", d.compact_threshold).max(1),
            telemetry_topic: get("TELEMETRY_TOPIC").unwrap_or(d.telemetry_topic),
            persist_positions: get("PERSIST_POSITIONS")
                .and_then(|raw| parse_bool("PERSIST_POSITIONS", &raw))
                .unwrap_or(d.persist_positions),
            vehicles_file: get("VEHICLES_FILE").map(PathBuf::from),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_or_warn<T: FromStr>(name: &str, raw: &str) -> Option<T> {
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring unparseable {PREFIX}{name}={raw:?}, using default");
            None
        }
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    get(name)
        .and_then(|raw| parse_or_warn(name, &raw))
        .unwrap_or(default)
}

/// Whole seconds, at least one.
fn secs(get: &impl Fn(&str) -> Option<String>, name: &str, default: Duration) -> Duration {
    let fallback = default.as_secs();
    Duration::from_secs(parsed(get, name, fallback).max(1))
}

fn parse_bool(name: &str, raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("ignoring unparseable {PREFIX}{name}={raw:?}, using default");
            None
        }
    }
}
