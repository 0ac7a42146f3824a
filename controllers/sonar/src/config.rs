//! Controller configuration from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `WATCH_NAMESPACE` | `default` |
//! | `RESYNC_INTERVAL_SECS` | `300` |
//! | `RECONCILE_TIMEOUT_SECS` | `120` |
//! | `ENDPOINT_RESOLVE_TIMEOUT_SECS` | `30` |
//! | `METRICS_PORT` | `8080` |
//! | `CATALOG_ICON` | built-in icon |

use crate::error::ControllerError;
use crate::reconciler::ReconcilerSettings;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub namespace: String,
    pub metrics_port: u16,
    pub settings: ReconcilerSettings,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = ReconcilerSettings::default();

        let secs = |key: &str, default: Duration| -> Result<Duration, ControllerError> {
            match parsed::<u64>(&lookup, key)? {
                Some(0) => Err(ControllerError::InvalidConfig(format!("{} must be positive", key))),
                Some(n) => Ok(Duration::from_secs(n)),
                None => Ok(default),
            }
        };

        let settings = ReconcilerSettings {
            resync_interval: secs("RESYNC_INTERVAL_SECS", defaults.resync_interval)?,
            reconcile_timeout: secs("RECONCILE_TIMEOUT_SECS", defaults.reconcile_timeout)?,
            endpoint_timeout: secs("ENDPOINT_RESOLVE_TIMEOUT_SECS", defaults.endpoint_timeout)?,
            catalog_icon: lookup("CATALOG_ICON")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.catalog_icon),
        };

        Ok(Self {
            namespace: lookup("WATCH_NAMESPACE")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "default".to_string()),
            metrics_port: parsed::<u16>(&lookup, "METRICS_PORT")?.unwrap_or(8080),
            settings,
        })
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ControllerError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ControllerError::InvalidConfig(format!("{}='{}' is not a valid number", key, raw))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ControllerConfig, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ControllerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.namespace, "default");
        assert_eq!(cfg.metrics_port, 8080);
        assert_eq!(cfg.settings.resync_interval, Duration::from_secs(300));
        assert_eq!(cfg.settings.reconcile_timeout, Duration::from_secs(120));
        assert_eq!(cfg.settings.endpoint_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("WATCH_NAMESPACE", "ci"),
            ("RESYNC_INTERVAL_SECS", "60"),
            ("METRICS_PORT", "9090"),
        ])
        .unwrap();
        assert_eq!(cfg.namespace, "ci");
        assert_eq!(cfg.metrics_port, 9090);
        assert_eq!(cfg.settings.resync_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_bad_numbers() {
        assert!(config(&[("RECONCILE_TIMEOUT_SECS", "soon")]).unwrap_err().is_validation());
        assert!(config(&[("RESYNC_INTERVAL_SECS", "0")]).is_err());
        assert!(config(&[("METRICS_PORT", "70000")]).is_err());
    }
}
