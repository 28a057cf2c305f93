//! Configuration loading and representation.
//!
//! Everything comes from environment variables. Optional backends are
//! selected by presence: `DATABASE_URL` switches repositories to Postgres,
//! `REDIS_URL` or the `TASK_PUSH_*` settings pick the task transport.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::tasks::{DeliveryVerifier, HttpPushConfig};
use crate::workers::DEFAULT_PUBLISH_INTERVAL;
use crate::workflows::DEFAULT_RECHECK_DELAY;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is not valid: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("{key} requires {missing} to be set")]
    Incomplete { key: &'static str, missing: &'static str },
}

/// Which task transport to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTransportConfig {
    InMemory,
    Redis { url: String },
    HttpPush(HttpPushSettings),
}

/// Owned copy of the push-queue settings so `AppConfig` stays comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpPushSettings {
    pub service_url: String,
    pub token: String,
    pub callback_url: String,
    /// Key the push service signs deliveries with.
    pub signing_key: String,
    pub next_signing_key: Option<String>,
}

impl HttpPushSettings {
    pub fn delivery_verifier(&self) -> DeliveryVerifier {
        let verifier = DeliveryVerifier::new(self.signing_key.clone(), self.callback_url.clone());
        match &self.next_signing_key {
            Some(next) => verifier.with_next_key(next.clone()),
            None => verifier,
        }
    }
}

impl From<HttpPushSettings> for HttpPushConfig {
    fn from(s: HttpPushSettings) -> Self {
        HttpPushConfig {
            service_url: s.service_url,
            token: s.token,
            callback_url: s.callback_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub task_transport: TaskTransportConfig,
    pub payment_api_url: Option<String>,
    pub payment_api_key: Option<String>,
    pub payment_recheck_delay: Duration,
    pub publisher_interval: Duration,
    pub task_poll_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            task_transport: TaskTransportConfig::InMemory,
            payment_api_url: None,
            payment_api_key: None,
            payment_recheck_delay: DEFAULT_RECHECK_DELAY,
            publisher_interval: DEFAULT_PUBLISH_INTERVAL,
            task_poll_interval: Duration::from_millis(500),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let bind_addr = match get("BIND_ADDR") {
            Some(raw) => raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "BIND_ADDR",
                reason: e.to_string(),
            })?,
            None => defaults.bind_addr,
        };

        let task_transport = match (get("REDIS_URL"), get("TASK_PUSH_URL")) {
            (Some(url), _) => TaskTransportConfig::Redis { url },
            (None, Some(service_url)) => TaskTransportConfig::HttpPush(HttpPushSettings {
                service_url,
                token: get("TASK_PUSH_TOKEN").ok_or(ConfigError::Incomplete {
                    key: "TASK_PUSH_URL",
                    missing: "TASK_PUSH_TOKEN",
                })?,
                callback_url: get("TASK_CALLBACK_URL").ok_or(ConfigError::Incomplete {
                    key: "TASK_PUSH_URL",
                    missing: "TASK_CALLBACK_URL",
                })?,
                signing_key: get("TASK_PUSH_SIGNING_KEY").ok_or(ConfigError::Incomplete {
                    key: "TASK_PUSH_URL",
                    missing: "TASK_PUSH_SIGNING_KEY",
                })?,
                next_signing_key: get("TASK_PUSH_NEXT_SIGNING_KEY"),
            }),
            (None, None) => TaskTransportConfig::InMemory,
        };

        Ok(Self {
            bind_addr,
            database_url: get("DATABASE_URL"),
            task_transport,
            payment_api_url: get("PAYMENT_API_URL"),
            payment_api_key: get("PAYMENT_API_KEY"),
            payment_recheck_delay: duration_var(&get, "PAYMENT_RECHECK_DELAY_SECS", Duration::from_secs)?
                .unwrap_or(defaults.payment_recheck_delay),
            publisher_interval: duration_var(&get, "PUBLISHER_INTERVAL_SECS", Duration::from_secs)?
                .unwrap_or(defaults.publisher_interval),
            task_poll_interval: duration_var(&get, "TASK_POLL_INTERVAL_MS", Duration::from_millis)?
                .unwrap_or(defaults.task_poll_interval),
        })
    }
}

fn duration_var<G>(get: &G, key: &'static str, unit: fn(u64) -> Duration) -> Result<Option<Duration>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    let value: u64 = raw.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Some(unit(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.payment_recheck_delay, Duration::from_secs(1200));
        assert_eq!(config.publisher_interval, Duration::from_secs(300));
    }

    #[test]
    fn redis_takes_precedence_over_push_queue() {
        let config = load(&[("REDIS_URL", "redis://cache:6379"), ("TASK_PUSH_URL", "https://push")]).unwrap();
        assert_eq!(
            config.task_transport,
            TaskTransportConfig::Redis {
                url: "redis://cache:6379".to_string()
            }
        );
    }

    #[test]
    fn push_queue_needs_token_and_callback() {
        assert_eq!(
            load(&[("TASK_PUSH_URL", "https://push")]),
            Err(ConfigError::Incomplete {
                key: "TASK_PUSH_URL",
                missing: "TASK_PUSH_TOKEN"
            })
        );

        assert_eq!(
            load(&[
                ("TASK_PUSH_URL", "https://push"),
                ("TASK_PUSH_TOKEN", "t"),
                ("TASK_CALLBACK_URL", "https://api/tasks/deliver"),
            ]),
            Err(ConfigError::Incomplete {
                key: "TASK_PUSH_URL",
                missing: "TASK_PUSH_SIGNING_KEY"
            })
        );

        let config = load(&[
            ("TASK_PUSH_URL", "https://push"),
            ("TASK_PUSH_TOKEN", "t"),
            ("TASK_CALLBACK_URL", "https://api/tasks/deliver"),
            ("TASK_PUSH_SIGNING_KEY", "sig_current"),
            ("TASK_PUSH_NEXT_SIGNING_KEY", "sig_next"),
        ])
        .unwrap();
        let TaskTransportConfig::HttpPush(settings) = config.task_transport else {
            panic!("expected push transport");
        };
        assert_eq!(settings.next_signing_key.as_deref(), Some("sig_next"));
        assert_eq!(settings.delivery_verifier().callback_url(), "https://api/tasks/deliver");
    }

    #[test]
    fn numbers_are_validated() {
        assert!(matches!(
            load(&[("PAYMENT_RECHECK_DELAY_SECS", "soon")]),
            Err(ConfigError::Invalid { key: "PAYMENT_RECHECK_DELAY_SECS", .. })
        ));
        assert!(matches!(
            load(&[("TASK_POLL_INTERVAL_MS", "0")]),
            Err(ConfigError::Invalid { key: "TASK_POLL_INTERVAL_MS", .. })
        ));
        assert!(matches!(
            load(&[("BIND_ADDR", "nowhere")]),
            Err(ConfigError::Invalid { key: "BIND_ADDR", .. })
        ));

        let config = load(&[("PUBLISHER_INTERVAL_SECS", "60"), ("BIND_ADDR", "127.0.0.1:3000")]).unwrap();
        assert_eq!(config.publisher_interval, Duration::from_secs(60));
        assert_eq!(config.bind_addr.port(), 3000);
    }
}
