//! Exporter configuration

use anyhow::{Context, Result};
use exporter_lib::{LabelFilter, MetricSetOptions, SchedulerConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix, e.g. `CNTM_INTERVAL_SECS`
pub const ENV_PREFIX: &str = "CNTM";

/// Exporter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// HTTP port for `/metrics` and the health probes
    #[serde(default = "default_port")]
    pub port: u16,

    /// Collection interval in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Timeout for every runtime call in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Prefix of every exported metric
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Host identifier for the `engine_host` label
    #[serde(default = "default_host")]
    pub host: String,

    /// Runtime label prefixes to export; empty exports all labels
    #[serde(default)]
    pub label_filters: Vec<String>,

    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// Event stream restarts before falling back to timer-only collection
    #[serde(default = "default_event_restarts")]
    pub event_restarts: u32,

    /// Drop cached samples older than this many seconds; 0 keeps them forever
    #[serde(default)]
    pub cache_ttl_secs: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_interval() -> u64 {
    5
}

fn default_timeout() -> u64 {
    30
}

fn default_namespace() -> String {
    "cntm".to_string()
}

fn default_host() -> String {
    std::env::var("NODE_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_event_restarts() -> u32 {
    1
}

impl ExporterConfig {
    /// Load configuration from `CNTM_*` environment variables
    pub fn load() -> Result<Self> {
        Self::load_from(environment())
    }

    /// Load configuration from an explicit environment source
    pub fn load_from(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(env)
            .build()
            .context("Failed to read configuration")?;

        let loaded: Self = config
            .try_deserialize()
            .context("Invalid exporter configuration")?;

        if loaded.interval_secs == 0 {
            anyhow::bail!("interval_secs must be positive");
        }
        if loaded.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be positive");
        }

        Ok(loaded)
    }

    /// Options for every metric set built by the exporter
    pub fn metric_set_options(&self) -> Result<MetricSetOptions> {
        let label_filter =
            LabelFilter::new(&self.label_filters).context("Invalid label filter")?;

        Ok(MetricSetOptions {
            namespace: self.namespace.clone(),
            host: self.host.clone(),
            label_filter,
        })
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.interval_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            event_restarts: self.event_restarts,
            cache_ttl: (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs)),
            ..SchedulerConfig::default()
        }
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("label_filters")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ExporterConfig> {
        let source = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<config::Map<String, String>>();
        ExporterConfig::load_from(environment().source(Some(source)))
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.interval_secs, 5);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.namespace, "cntm");
        assert!(config.label_filters.is_empty());
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
        assert_eq!(config.event_restarts, 1);
        assert!(config.scheduler_config().cache_ttl.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let config = load(&[
            ("CNTM_PORT", "9100"),
            ("CNTM_INTERVAL_SECS", "15"),
            ("CNTM_NAMESPACE", "docker"),
            ("CNTM_HOST", "node-7"),
            ("CNTM_LABEL_FILTERS", "com.example,owner"),
            ("CNTM_CACHE_TTL_SECS", "600"),
        ])
        .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.interval_secs, 15);
        assert_eq!(config.namespace, "docker");
        assert_eq!(config.host, "node-7");
        assert_eq!(config.label_filters, vec!["com.example", "owner"]);

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.interval, Duration::from_secs(15));
        assert_eq!(scheduler.cache_ttl, Some(Duration::from_secs(600)));

        let options = config.metric_set_options().unwrap();
        assert!(options.label_filter.accepts("owner"));
        assert!(!options.label_filter.accepts("maintainer"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(load(&[("CNTM_INTERVAL_SECS", "0")]).is_err());
    }

    #[test]
    fn test_invalid_label_filter_rejected() {
        let config = load(&[("CNTM_LABEL_FILTERS", "(")]).unwrap();
        assert!(config.metric_set_options().is_err());
    }
}
