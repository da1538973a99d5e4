//! Application configuration loaded from environment variables.

use std::collections::HashSet;
use std::time::Duration;

use quota_core::{ConfigError, ThrottlePolicy};
use quota_infra::env;

#[cfg(feature = "redis")]
use quota_infra::RedisConfig;

/// Policy used when `THROTTLE_POLICIES` is unset: 100 hits per minute.
const DEFAULT_POLICIES: &str = "default:60000:100:0";

/// Where counters live.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    #[cfg(feature = "redis")]
    Redis(RedisConfig),
    /// Per-process counters. Limits are not shared across instances.
    Memory,
}

/// Throttling settings applied by the middleware.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub policies: Vec<ThrottlePolicy>,
    pub key_prefix: String,
    /// Path prefixes that bypass throttling.
    pub skip_paths: Vec<String>,
    /// Take the client address from `Forwarded`/`X-Forwarded-For`.
    pub trust_proxy: bool,
    /// Bound on one counter round-trip before failing open.
    pub command_timeout: Duration,
}

impl ThrottleConfig {
    pub fn is_skipped(&self, path: &str) -> bool {
        self.skip_paths.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreBackend,
    pub throttle: ThrottleConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Any error here means the deployment is broken; the caller aborts startup.
    pub fn from_env() -> Result<Self, ConfigError> {
        let store = Self::parse_store()?;

        let command_timeout = match &store {
            #[cfg(feature = "redis")]
            StoreBackend::Redis(redis) => redis.command_timeout,
            StoreBackend::Memory => Duration::from_millis(env::parse_or(
                "THROTTLE_COMMAND_TIMEOUT_MS",
                500u64,
            )?),
        };

        let policies = parse_policies(
            &env::optional("THROTTLE_POLICIES").unwrap_or_else(|| DEFAULT_POLICIES.to_string()),
        )?;

        let skip_paths = env::optional("THROTTLE_SKIP_PATHS")
            .unwrap_or_else(|| "/api/health".to_string())
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            host: env::optional("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: env::parse_or("PORT", 8080)?,
            store,
            throttle: ThrottleConfig {
                policies,
                key_prefix: env::optional("THROTTLE_KEY_PREFIX")
                    .unwrap_or_else(|| "throttle".to_string()),
                skip_paths,
                trust_proxy: env::flag("THROTTLE_TRUST_PROXY", false)?,
                command_timeout,
            },
        })
    }

    fn parse_store() -> Result<StoreBackend, ConfigError> {
        let backend = env::optional("THROTTLE_STORE")
            .unwrap_or_else(|| "redis".to_string())
            .to_lowercase();

        match backend.as_str() {
            #[cfg(feature = "redis")]
            "redis" => Ok(StoreBackend::Redis(RedisConfig::from_env()?)),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::invalid(
                "THROTTLE_STORE",
                format!("unsupported store {:?}", other),
            )),
        }
    }
}

/// Parse policies from `THROTTLE_POLICIES`.
/// Format: `<name>:<window_ms>:<limit>[:<block_ms>]`, comma separated.
/// Example: `short:1000:3,long:60000:100:5000`
pub fn parse_policies(raw: &str) -> Result<Vec<ThrottlePolicy>, ConfigError> {
    let mut policies = Vec::new();
    let mut names = HashSet::new();

    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        if parts.len() < 3 || parts.len() > 4 {
            return Err(ConfigError::invalid(
                "THROTTLE_POLICIES",
                format!("{:?} is not name:window_ms:limit[:block_ms]", entry),
            ));
        }

        let number = |field: &str, value: &str| -> Result<u64, ConfigError> {
            value.parse().map_err(|_| {
                ConfigError::invalid(
                    "THROTTLE_POLICIES",
                    format!("{} of {:?} is not a number: {:?}", field, entry, value),
                )
            })
        };

        let window_ms = number("window_ms", parts[1])?;
        let limit = number("limit", parts[2])?;
        let block_ms = match parts.get(3) {
            Some(value) => number("block_ms", *value)?,
            None => 0,
        };

        let policy = ThrottlePolicy::from_millis(parts[0], window_ms, limit, block_ms)
            .map_err(|e| ConfigError::invalid("THROTTLE_POLICIES", e.to_string()))?;

        if !names.insert(policy.name.clone()) {
            return Err(ConfigError::invalid(
                "THROTTLE_POLICIES",
                format!("duplicate policy name {:?}", policy.name),
            ));
        }
        policies.push(policy);
    }

    if policies.is_empty() {
        return Err(ConfigError::invalid(
            "THROTTLE_POLICIES",
            "at least one policy is required",
        ));
    }

    Ok(policies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policies() {
        let policies = parse_policies("short:1000:3, long:60000:100:5000").unwrap();
        assert_eq!(policies.len(), 2);

        assert_eq!(policies[0].name, "short");
        assert_eq!(policies[0].window, Duration::from_secs(1));
        assert_eq!(policies[0].limit, 3);
        assert_eq!(policies[0].block_duration, Duration::ZERO);

        assert_eq!(policies[1].name, "long");
        assert_eq!(policies[1].block_duration, Duration::from_secs(5));
    }

    #[test]
    fn test_default_policy_parses() {
        let policies = parse_policies(DEFAULT_POLICIES).unwrap();
        assert_eq!(policies[0].limit, 100);
        assert_eq!(policies[0].window_ms(), 60_000);
    }

    #[test]
    fn test_parse_policies_rejects_bad_input() {
        for raw in [
            "",
            "short:1000",
            "short:1000:3:0:9",
            "short:soon:3",
            "short:1000:0",
            "short:0:3",
            "short:1000:3,short:2000:5",
        ] {
            assert!(parse_policies(raw).is_err(), "{:?} should be rejected", raw);
        }
    }

    #[test]
    fn test_skip_paths_match_prefixes() {
        let config = ThrottleConfig {
            policies: parse_policies(DEFAULT_POLICIES).unwrap(),
            key_prefix: "throttle".to_string(),
            skip_paths: vec!["/api/health".to_string()],
            trust_proxy: false,
            command_timeout: Duration::from_millis(500),
        };

        assert!(config.is_skipped("/api/health"));
        assert!(config.is_skipped("/api/health/live"));
        assert!(!config.is_skipped("/api/ping"));
    }
}
