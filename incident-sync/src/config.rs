use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Polling and transport settings shared by the synchronizers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub base_url: String,
    pub list_limit: usize,
    pub list_interval: Duration,
    pub detail_fast_interval: Duration,
    pub detail_slow_interval: Duration,
    /// How long an incident stays marked as newly arrived.
    pub arrival_window: Duration,
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            list_limit: 20,
            list_interval: Duration::from_secs(5),
            detail_fast_interval: Duration::from_secs(2),
            detail_slow_interval: Duration::from_secs(15),
            arrival_window: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `INCIDENT_*` environment variables.
    /// Missing or malformed values keep the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        Self {
            base_url: lookup("INCIDENT_API_URL")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.base_url),
            list_limit: lookup("INCIDENT_LIST_LIMIT")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.list_limit),
            list_interval: millis("INCIDENT_LIST_INTERVAL_MS", defaults.list_interval),
            detail_fast_interval: millis("INCIDENT_DETAIL_FAST_MS", defaults.detail_fast_interval),
            detail_slow_interval: millis("INCIDENT_DETAIL_SLOW_MS", defaults.detail_slow_interval),
            arrival_window: defaults.arrival_window,
            request_timeout: millis("INCIDENT_TIMEOUT_MS", defaults.request_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("INCIDENT_API_URL", "https://iq.example.com"),
            ("INCIDENT_LIST_LIMIT", "50"),
            ("INCIDENT_DETAIL_SLOW_MS", "30000"),
        ]
        .into_iter()
        .collect();
        let config = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.base_url, "https://iq.example.com");
        assert_eq!(config.list_limit, 50);
        assert_eq!(config.detail_slow_interval, Duration::from_secs(30));
        assert_eq!(config.detail_fast_interval, Duration::from_secs(2));
    }

    #[test]
    fn malformed_values_fall_back() {
        let config = SyncConfig::from_lookup(|k| match k {
            "INCIDENT_LIST_LIMIT" => Some("lots".into()),
            "INCIDENT_LIST_INTERVAL_MS" => Some("0".into()),
            _ => None,
        });
        assert_eq!(config, SyncConfig::default());
    }
}
