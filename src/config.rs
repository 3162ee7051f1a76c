//! Runtime configuration loaded from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `TRAFFIC_SURVEY_PORT` | `3000` |
//! | `TRAFFIC_SURVEY_RESET_POLICY` | `clear` (`keep` preserves history) |
//! | `TRAFFIC_SURVEY_DEFAULT_DURATION` | `1` (minutes) |
//! | `INSIGHT_API_URL` | `https://api.openai.com/v1` |
//! | `INSIGHT_API_KEY` | unset |
//! | `INSIGHT_MODEL` | `gpt-4o-mini` |
//! | `INSIGHT_TIMEOUT_SECS` | unset (wait indefinitely) |
//!
//! Unparseable values fall back to the default with a warning.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::controller::ResetPolicy;
use crate::insight::{DEFAULT_INSIGHT_API_URL, DEFAULT_INSIGHT_MODEL, InsightConfig};

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default survey duration in minutes.
pub const DEFAULT_DURATION_MINUTES: i64 = 1;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub reset_policy: ResetPolicy,
    pub default_duration_minutes: i64,
    pub insight: InsightConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            reset_policy: ResetPolicy::default(),
            default_duration_minutes: DEFAULT_DURATION_MINUTES,
            insight: InsightConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let timeout = parsed::<u64>(&non_empty, "INSIGHT_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            port: parsed(&non_empty, "TRAFFIC_SURVEY_PORT").unwrap_or(DEFAULT_PORT),
            reset_policy: parsed(&non_empty, "TRAFFIC_SURVEY_RESET_POLICY").unwrap_or_default(),
            default_duration_minutes: parsed::<i64>(&non_empty, "TRAFFIC_SURVEY_DEFAULT_DURATION")
                .filter(|m| *m > 0)
                .unwrap_or(DEFAULT_DURATION_MINUTES),
            insight: InsightConfig {
                base_url: non_empty("INSIGHT_API_URL")
                    .unwrap_or_else(|| DEFAULT_INSIGHT_API_URL.to_string()),
                api_key: non_empty("INSIGHT_API_KEY"),
                model: non_empty("INSIGHT_MODEL")
                    .unwrap_or_else(|| DEFAULT_INSIGHT_MODEL.to_string()),
                timeout,
            },
        }
    }
}

fn parsed<T>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "Ignoring invalid configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.reset_policy, ResetPolicy::ClearHistory);
        assert_eq!(config.default_duration_minutes, 1);
        assert_eq!(config.insight.base_url, DEFAULT_INSIGHT_API_URL);
        assert_eq!(config.insight.api_key, None);
        assert_eq!(config.insight.timeout, None);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("TRAFFIC_SURVEY_PORT", "8080"),
            ("TRAFFIC_SURVEY_RESET_POLICY", "keep"),
            ("TRAFFIC_SURVEY_DEFAULT_DURATION", "15"),
            ("INSIGHT_API_URL", "http://localhost:11434/v1"),
            ("INSIGHT_API_KEY", "secret"),
            ("INSIGHT_MODEL", "llama3"),
            ("INSIGHT_TIMEOUT_SECS", "30"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.reset_policy, ResetPolicy::KeepHistory);
        assert_eq!(config.default_duration_minutes, 15);
        assert_eq!(config.insight.base_url, "http://localhost:11434/v1");
        assert_eq!(config.insight.api_key.as_deref(), Some("secret"));
        assert_eq!(config.insight.model, "llama3");
        assert_eq!(config.insight.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("TRAFFIC_SURVEY_PORT", "not-a-port"),
            ("TRAFFIC_SURVEY_RESET_POLICY", "sometimes"),
            ("TRAFFIC_SURVEY_DEFAULT_DURATION", "-2"),
            ("INSIGHT_API_KEY", "   "),
            ("INSIGHT_TIMEOUT_SECS", "0"),
        ]);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.reset_policy, ResetPolicy::ClearHistory);
        assert_eq!(config.default_duration_minutes, 1);
        assert_eq!(config.insight.api_key, None);
        assert_eq!(config.insight.timeout, None);
    }
}
