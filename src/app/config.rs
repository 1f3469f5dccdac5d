//! Process configuration, read once from the environment at startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;

use crate::domain::{ConfigError, RetryPolicy};
use crate::infra::notifier::{CONFIRM_TRANSFER_PATH, SYNC_ASSETS_PATH, endpoint};

use super::scanner::ScannerConfig;
use super::worker::WorkerConfig;

/// Chain id the backend associates with Solana
pub const DEFAULT_CHAIN_ID: u64 = 6869;

const DEFAULT_RPC_ENDPOINT: &str = "https://api.devnet.solana.com";

/// Slack added on top of the derived minimum visibility timeout
const VISIBILITY_MARGIN: Duration = Duration::from_secs(30);

/// Output format for tracing-subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Where and how an outcome is reported downstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyTarget {
    pub url: String,
    pub chain_id: u64,
    pub policy: RetryPolicy,
}

/// Application configuration
#[derive(Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub rpc_url: String,
    /// Vault ciphertext of the custodial signing key
    pub encrypted_signing_key: SecretString,
    pub secret_key: SecretString,
    pub secret_iv: SecretString,
    /// Wallet whose holdings are reconciled
    pub custodial_address: String,
    pub backend_url: String,
    pub chain_id: u64,
    pub api_key: String,
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub worker: WorkerConfig,
    pub scanner: ScannerConfig,
    pub notify_policy: RetryPolicy,
}

impl AppConfig {
    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).ok_or_else(|| ConfigError::Missing(key.to_string()));

        let api_timeout = Duration::from_millis(parse_or(&get, "API_TIMEOUT_MS", 30_000u64)?);
        let notify_policy = RetryPolicy {
            max_retries: parse_or(&get, "API_MAX_RETRY", 5u32)?,
            timeout: api_timeout,
            retry_delay: api_timeout,
        };

        let worker_defaults = WorkerConfig::default();
        let mut worker = WorkerConfig {
            enabled: flag(&get, "ENABLE_WORKER", true),
            concurrency: parse_or(&get, "WORKER_CONCURRENCY", worker_defaults.concurrency)?,
            poll_interval: Duration::from_millis(parse_or(
                &get,
                "WORKER_POLL_INTERVAL_MS",
                worker_defaults.poll_interval.as_millis() as u64,
            )?),
            backoff: Duration::from_millis(parse_or(
                &get,
                "QUEUE_BACKOFF_MS",
                worker_defaults.backoff.as_millis() as u64,
            )?),
            max_attempts: parse_or(&get, "QUEUE_MAX_ATTEMPTS", worker_defaults.max_attempts)?,
            rpc_timeout: Duration::from_millis(parse_or(
                &get,
                "RPC_TIMEOUT_MS",
                worker_defaults.rpc_timeout.as_millis() as u64,
            )?),
            visibility_timeout: worker_defaults.visibility_timeout,
        };
        if worker.max_attempts < 1 {
            return Err(ConfigError::Invalid {
                key: "QUEUE_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let min_visibility = worker.min_visibility_timeout(&notify_policy);
        worker.visibility_timeout = match get("QUEUE_VISIBILITY_TIMEOUT_MS") {
            None => worker_defaults
                .visibility_timeout
                .max(min_visibility + VISIBILITY_MARGIN),
            Some(_) => {
                let configured = Duration::from_millis(parse_or(
                    &get,
                    "QUEUE_VISIBILITY_TIMEOUT_MS",
                    0u64,
                )?);
                if configured < min_visibility {
                    return Err(ConfigError::Invalid {
                        key: "QUEUE_VISIBILITY_TIMEOUT_MS".to_string(),
                        message: format!(
                            "must be at least {}ms to cover one transfer and one notification",
                            min_visibility.as_millis()
                        ),
                    });
                }
                configured
            }
        };

        let scanner_defaults = ScannerConfig::default();
        let schedule = get("RECONCILE_SCHEDULE").unwrap_or(scanner_defaults.schedule.clone());
        cron_parser::parse(&schedule, &Utc::now()).map_err(|e| ConfigError::Invalid {
            key: "RECONCILE_SCHEDULE".to_string(),
            message: format!("{:?}", e),
        })?;
        let scanner = ScannerConfig {
            enabled: flag(&get, "ENABLE_TASK", false),
            schedule,
            addresses: ScannerConfig::parse_addresses(
                &get("TOKEN_MINT_ADDRESSES").unwrap_or_default(),
            ),
            lock_ttl: scanner_defaults
                .lock_ttl
                .max(notify_policy.worst_case_duration() * 2),
            ..scanner_defaults
        };

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("pretty") | Some("text") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT".to_string(),
                    message: format!("expected 'json' or 'pretty', got '{}'", other),
                });
            }
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 10u32)?,
            rpc_url: get("SOLANA_RPC_ENDPOINT").unwrap_or_else(|| DEFAULT_RPC_ENDPOINT.to_string()),
            encrypted_signing_key: SecretString::from(required("ADMIN_PRIVATE_KEY_SOLANA")?),
            secret_key: SecretString::from(required("SECRET_KEY")?),
            secret_iv: SecretString::from(required("SECRET_IV")?),
            custodial_address: required("ADMIN_PUBLIC_KEY_SOLANA")?,
            backend_url: required("BACKEND_URL")?,
            chain_id: parse_or(&get, "CHAIN_ID", DEFAULT_CHAIN_ID)?,
            api_key: required("X_API_KEY")?,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "PORT", 3000u16)?,
            log_format,
            worker,
            scanner,
            notify_policy,
        })
    }

    /// Transfer outcome webhook
    #[must_use]
    pub fn confirm_target(&self) -> NotifyTarget {
        self.target(CONFIRM_TRANSFER_PATH)
    }

    /// Reconciliation sync webhook
    #[must_use]
    pub fn sync_target(&self) -> NotifyTarget {
        self.target(SYNC_ASSETS_PATH)
    }

    fn target(&self, path: &str) -> NotifyTarget {
        NotifyTarget {
            url: endpoint(&self.backend_url, path),
            chain_id: self.chain_id,
            policy: self.notify_policy.clone(),
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

fn flag<G>(get: &G, key: &str, default: bool) -> bool
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}
