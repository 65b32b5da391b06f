//! Controller configuration
//!
//! Server connection, reconcile tuning and the external binaries the
//! controller shells out to.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::reconciler::ReconcileSettings;

#[derive(Debug, Clone)]
pub struct Config {
    /// Canary server base URL (e.g., "http://localhost:8080")
    pub server_url: String,

    /// Worker image for test jobs that do not name one
    pub default_image: Option<String>,

    /// Timezone for cron schedules that do not name one
    pub default_timezone: Tz,

    /// How often objects are listed from the server
    pub poll_interval: Duration,

    /// Requeue delay while a stage waits on a worker
    pub blocked_requeue: Duration,

    /// Stage transitions a single reconcile may make
    pub step_budget: usize,

    /// Reconciles allowed to run at once
    pub max_parallel_reconciles: usize,

    /// Log lines kept from a finished test worker
    pub log_tail: usize,

    /// Kubeconfig for helm, kubectl and the workers themselves
    pub worker_kubeconfig: Option<PathBuf>,

    pub podman_bin: String,
    pub helm_bin: String,
    pub kubectl_bin: String,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(server_url: String) -> Self {
        Self {
            server_url,
            default_image: None,
            default_timezone: Tz::UTC,
            poll_interval: Duration::from_secs(2),
            blocked_requeue: Duration::from_secs(2),
            step_budget: 4,
            max_parallel_reconciles: 4,
            log_tail: 200,
            worker_kubeconfig: None,
            podman_bin: "podman".to_string(),
            helm_bin: "helm".to_string(),
            kubectl_bin: "kubectl".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - CANARY_SERVER_URL (default: http://localhost:8080)
    /// - CANARY_JOB_IMAGE
    /// - CANARY_DEFAULT_TIMEZONE (IANA name, default: UTC)
    /// - POLL_INTERVAL (seconds, default: 2)
    /// - BLOCKED_REQUEUE (seconds, default: 2)
    /// - STEP_BUDGET (default: 4)
    /// - MAX_PARALLEL_RECONCILES (default: 4)
    /// - LOG_TAIL (default: 200)
    /// - CANARY_WORKER_KUBECONFIG
    /// - PODMAN_BIN, HELM_BIN, KUBECTL_BIN
    ///
    /// An unknown CANARY_DEFAULT_TIMEZONE is an error rather than a silent
    /// fallback to UTC.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `lookup`
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let server_url = lookup("CANARY_SERVER_URL").unwrap_or(defaults.server_url);

        let default_image = lookup("CANARY_JOB_IMAGE").filter(|image| !image.trim().is_empty());

        let default_timezone = match lookup("CANARY_DEFAULT_TIMEZONE") {
            Some(name) if !name.trim().is_empty() => name.trim().parse::<Tz>().map_err(|_| {
                anyhow::anyhow!("CANARY_DEFAULT_TIMEZONE: unknown timezone {}", name)
            })?,
            _ => defaults.default_timezone,
        };

        let poll_interval = env_parse::<u64>(&lookup, "POLL_INTERVAL")
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let blocked_requeue = env_parse::<u64>(&lookup, "BLOCKED_REQUEUE")
            .map(Duration::from_secs)
            .unwrap_or(defaults.blocked_requeue);

        let step_budget = env_parse::<usize>(&lookup, "STEP_BUDGET").unwrap_or(defaults.step_budget);

        let max_parallel_reconciles = env_parse::<usize>(&lookup, "MAX_PARALLEL_RECONCILES")
            .unwrap_or(defaults.max_parallel_reconciles);

        let log_tail = env_parse::<usize>(&lookup, "LOG_TAIL").unwrap_or(defaults.log_tail);

        let worker_kubeconfig = lookup("CANARY_WORKER_KUBECONFIG")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            server_url,
            default_image,
            default_timezone,
            poll_interval,
            blocked_requeue,
            step_budget,
            max_parallel_reconciles,
            log_tail,
            worker_kubeconfig,
            podman_bin: lookup("PODMAN_BIN").unwrap_or(defaults.podman_bin),
            helm_bin: lookup("HELM_BIN").unwrap_or(defaults.helm_bin),
            kubectl_bin: lookup("KUBECTL_BIN").unwrap_or(defaults.kubectl_bin),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_url.is_empty() {
            anyhow::bail!("server_url cannot be empty");
        }

        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            anyhow::bail!("server_url must start with http:// or https://");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.blocked_requeue.is_zero() {
            anyhow::bail!("blocked_requeue must be greater than 0");
        }

        if self.step_budget == 0 {
            anyhow::bail!("step_budget must be greater than 0");
        }

        if self.max_parallel_reconciles == 0 {
            anyhow::bail!("max_parallel_reconciles must be greater than 0");
        }

        Ok(())
    }

    /// Settings handed to the test job reconciler
    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            default_image: self.default_image.clone(),
            default_timezone: self.default_timezone,
            step_budget: self.step_budget,
            blocked_requeue: self.blocked_requeue,
            log_tail: self.log_tail,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("http://localhost:8080".to_string())
    }
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    lookup(name).and_then(|s| s.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_from_lookup_reads_variables() {
        let config = Config::from_lookup(lookup_in(&[
            ("CANARY_SERVER_URL", "https://canary.example.com"),
            ("CANARY_JOB_IMAGE", "ghcr.io/acme/canary-tests:2"),
            ("CANARY_DEFAULT_TIMEZONE", "Europe/Berlin"),
            ("POLL_INTERVAL", "5"),
            ("STEP_BUDGET", "not-a-number"),
        ]))
        .unwrap();

        assert_eq!(config.server_url, "https://canary.example.com");
        assert_eq!(config.default_image.as_deref(), Some("ghcr.io/acme/canary-tests:2"));
        assert_eq!(config.default_timezone, Tz::Europe__Berlin);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.step_budget, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_timezone_is_an_error() {
        let result = Config::from_lookup(lookup_in(&[
            ("CANARY_SERVER_URL", "https://canary.example.com"),
            ("CANARY_DEFAULT_TIMEZONE", "Mars/Olympus"),
        ]));

        let err = result.unwrap_err();
        assert!(err.to_string().contains("Mars/Olympus"));
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = Config::from_lookup(lookup_in(&[])).unwrap();
        assert_eq!(config.server_url, "http://localhost:8080");
        assert_eq!(config.default_timezone, Tz::UTC);
        assert!(config.worker_kubeconfig.is_none());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.step_budget, 4);
        assert_eq!(config.max_parallel_reconciles, 4);
        assert_eq!(config.default_timezone, Tz::UTC);
        assert!(config.default_image.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.server_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.server_url = "https://canary.example.com".to_string();
        assert!(config.validate().is_ok());

        config.step_budget = 0;
        assert!(config.validate().is_err());

        config.step_budget = 1;
        config.max_parallel_reconciles = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconcile_settings_follow_config() {
        let mut config = Config::default();
        config.default_image = Some("ghcr.io/acme/canary-tests:1".to_string());
        config.default_timezone = Tz::Europe__Berlin;
        config.blocked_requeue = Duration::from_secs(7);

        let settings = config.reconcile_settings();
        assert_eq!(settings.default_image.as_deref(), Some("ghcr.io/acme/canary-tests:1"));
        assert_eq!(settings.default_timezone, Tz::Europe__Berlin);
        assert_eq!(settings.blocked_requeue, Duration::from_secs(7));
        assert_eq!(settings.step_budget, 4);
    }
}
