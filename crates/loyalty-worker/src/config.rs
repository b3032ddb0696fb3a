// Worker configuration from the environment
//
// ACCRUAL_SYSTEM_ADDRESS  accrual service base URL (required)
// DATABASE_URI            Postgres URL; in-memory ledger when unset
// WORKER_COUNT            accrual queue workers (default 2)
// SHUTDOWN_TIMEOUT_SECS   grace period for in-flight polls (default 30)
// ACCRUAL_TIMEOUT_SECS    accrual request timeout (default 5)
// SWEEP_INTERVAL_SECS     unprocessed-order sweep period, 0 = startup only (default 300)
// LOG_LEVEL               log level when RUST_LOG is unset (default info)

use std::time::Duration;

use loyalty_accrual::AccrualClientConfig;
use loyalty_jobs::JobQueueConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable required")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct LoyaltyConfig {
    pub accrual_system_address: String,
    pub database_uri: Option<String>,
    pub worker_count: usize,
    pub shutdown_timeout: Duration,
    pub accrual_timeout: Duration,
    pub sweep_interval: Duration,
    pub log_level: String,
}

impl LoyaltyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let accrual_system_address =
            var("ACCRUAL_SYSTEM_ADDRESS").ok_or(ConfigError::Missing("ACCRUAL_SYSTEM_ADDRESS"))?;

        let worker_count = parse_or(&var, "WORKER_COUNT", 2usize)?;
        if worker_count == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_COUNT",
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }

        Ok(Self {
            accrual_system_address: accrual_system_address.trim().to_string(),
            database_uri: var("DATABASE_URI"),
            worker_count,
            shutdown_timeout: Duration::from_secs(parse_or(&var, "SHUTDOWN_TIMEOUT_SECS", 30)?),
            accrual_timeout: Duration::from_secs(parse_or(&var, "ACCRUAL_TIMEOUT_SECS", 5)?),
            sweep_interval: Duration::from_secs(parse_or(&var, "SWEEP_INTERVAL_SECS", 300)?),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Filter directive used when RUST_LOG is unset
    pub fn log_filter(&self) -> String {
        [
            "loyalty_worker",
            "loyalty_accrual",
            "loyalty_jobs",
            "loyalty_storage",
            "loyalty_core",
        ]
        .iter()
        .map(|target| format!("{}={}", target, self.log_level))
        .collect::<Vec<_>>()
        .join(",")
    }

    pub fn job_queue_config(&self) -> JobQueueConfig {
        JobQueueConfig::new("accrual")
            .with_worker_count(self.worker_count)
            .with_shutdown_timeout(self.shutdown_timeout)
    }

    pub fn accrual_client_config(&self) -> AccrualClientConfig {
        AccrualClientConfig::new(&self.accrual_system_address).with_timeout(self.accrual_timeout)
    }
}

fn parse_or<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}
