use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::ResponseCache;
use crate::compliance::ComplianceLimits;
use crate::error::ValidationError;
use crate::rate_limiter::RateLimitConfig;
use crate::retry::RetryPolicy;

/// Temporal and compliance policy of the upstream lead API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamPolicy {
    pub compliance: ComplianceLimits,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

impl Default for UpstreamPolicy {
    fn default() -> Self {
        Self {
            compliance: ComplianceLimits::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            cache_capacity: ResponseCache::<serde_json::Value>::DEFAULT_CAPACITY,
            cache_ttl: ResponseCache::<serde_json::Value>::DEFAULT_TTL,
        }
    }
}

impl UpstreamPolicy {
    /// Defaults overridden by `LEADGATE_*` environment variables.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut policy = Self::default();
        let rate = &mut policy.rate_limit;

        if let Some(secs) = setting::<u64, _>(&lookup, "LEADGATE_MIN_INTERVAL_SECS")? {
            rate.min_interval = Duration::from_secs(secs);
        }
        if let Some(limit) = setting::<u32, _>(&lookup, "LEADGATE_MAX_PER_MINUTE")? {
            rate.max_per_minute = limit;
        }
        if let Some(limit) = setting::<u32, _>(&lookup, "LEADGATE_MAX_PER_HOUR")? {
            rate.max_per_hour = limit;
        }
        if let Some(secs) = setting::<u64, _>(&lookup, "LEADGATE_BLOCK_SECS")? {
            rate.block_duration = Duration::from_secs(secs);
        }
        if let Some(retries) = setting::<u32, _>(&lookup, "LEADGATE_MAX_RETRIES")? {
            policy.retry.max_retries = retries;
        }
        if let Some(capacity) = setting::<usize, _>(&lookup, "LEADGATE_CACHE_CAPACITY")? {
            policy.cache_capacity = capacity;
        }
        if let Some(secs) = setting::<u64, _>(&lookup, "LEADGATE_CACHE_TTL_SECS")? {
            policy.cache_ttl = Duration::from_secs(secs);
        }

        Ok(policy)
    }
}

/// Where and how to reach the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub state_file: Option<PathBuf>,
}

impl ConnectionSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Self {
            base_url: non_empty("LEADGATE_BASE_URL"),
            api_key: non_empty("LEADGATE_API_KEY"),
            state_file: non_empty("LEADGATE_STATE_FILE").map(PathBuf::from),
        }
    }

    pub fn require_base_url(&self) -> Result<&str, ValidationError> {
        self.base_url
            .as_deref()
            .ok_or(ValidationError::MissingSetting {
                name: "LEADGATE_BASE_URL",
            })
    }
}

fn setting<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ValidationError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ValidationError::InvalidSetting { name, value: raw })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn default_policy_matches_upstream_limits() {
        let policy = UpstreamPolicy::default();

        assert_eq!(policy.rate_limit.min_interval, Duration::from_secs(300));
        assert_eq!(policy.rate_limit.max_per_minute, 1);
        assert_eq!(policy.rate_limit.max_per_hour, 12);
        assert_eq!(policy.rate_limit.block_duration, Duration::from_secs(900));
        assert_eq!(policy.compliance.max_span, Duration::from_secs(7 * 86_400));
        assert_eq!(policy.retry.max_retries, 3);
        assert_eq!(policy.cache_capacity, 100);
        assert_eq!(policy.cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn overrides_are_read_from_lookup() {
        let policy = UpstreamPolicy::from_lookup(lookup(&[
            ("LEADGATE_MIN_INTERVAL_SECS", "0"),
            ("LEADGATE_MAX_PER_MINUTE", "5"),
            ("LEADGATE_MAX_PER_HOUR", " 40 "),
            ("LEADGATE_MAX_RETRIES", "1"),
            ("LEADGATE_CACHE_TTL_SECS", "60"),
        ]))
        .expect("valid settings");

        assert_eq!(policy.rate_limit.min_interval, Duration::ZERO);
        assert_eq!(policy.rate_limit.max_per_minute, 5);
        assert_eq!(policy.rate_limit.max_per_hour, 40);
        assert_eq!(policy.retry.max_retries, 1);
        assert_eq!(policy.cache_ttl, Duration::from_secs(60));
        assert_eq!(policy.cache_capacity, 100);
    }

    #[test]
    fn malformed_setting_is_rejected() {
        let error = UpstreamPolicy::from_lookup(lookup(&[("LEADGATE_MAX_PER_HOUR", "lots")]))
            .expect_err("not a number");

        assert_eq!(
            error,
            ValidationError::InvalidSetting {
                name: "LEADGATE_MAX_PER_HOUR",
                value: String::from("lots"),
            }
        );
    }

    #[test]
    fn connection_settings_ignore_blank_values() {
        let settings = ConnectionSettings::from_lookup(lookup(&[
            ("LEADGATE_BASE_URL", "https://leads.example.test"),
            ("LEADGATE_API_KEY", "  "),
        ]));

        assert_eq!(settings.require_base_url(), Ok("https://leads.example.test"));
        assert_eq!(settings.api_key, None);
        assert!(ConnectionSettings::default().require_base_url().is_err());
    }
}
