use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    pub node: NodeConfig,
    pub queue: QueueConfig,
    pub sweeps: SweepConfig,
    /// Enables dangerous operations like purge. Must never be true in production.
    pub test_mode: bool,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
    /// Identifies this instance on the realtime bridge
    pub id: String,
}

/// Limits and windows for queue operations.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Self-service cancellations per trailing hour before an abuse signal
    pub cancel_abuse_threshold: u32,
    /// Tokens a user may issue per day, across all services
    pub daily_token_limit: u32,
    /// Seconds a CALLED token may go unconfirmed before the no-show sweep
    pub no_show_grace_seconds: u64,
    /// No-shows inside the window that suspend further issuance
    pub no_show_suspension_threshold: u32,
    /// Trailing window (days) for the suspension check
    pub suspension_window_days: i64,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub end_of_day_interval_seconds: u64,
    pub no_show_interval_seconds: u64,
    pub presence_nudge_interval_seconds: u64,
    pub wait_refresh_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for per-service listing snapshots (hot, single-digit seconds)
    pub listing_ttl_seconds: u64,
    /// TTL for individual token snapshots
    pub token_ttl_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            cancel_abuse_threshold: 5,
            daily_token_limit: 3,
            no_show_grace_seconds: 120,
            no_show_suspension_threshold: 3,
            suspension_window_days: 7,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            end_of_day_interval_seconds: 86_400,
            no_show_interval_seconds: 60,
            presence_nudge_interval_seconds: 30,
            wait_refresh_interval_seconds: 10,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            listing_ttl_seconds: 5,
            token_ttl_seconds: 86_400, // 24 hours
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let node_id = std::env::var("NODE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let test_mode = std::env::var("TEST_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let queue = QueueConfig {
            cancel_abuse_threshold: env_u32("CANCEL_ABUSE_THRESHOLD", 5),
            daily_token_limit: env_u32("DAILY_TOKEN_LIMIT", 3),
            no_show_grace_seconds: env_u64("NO_SHOW_GRACE_SECONDS", 120),
            no_show_suspension_threshold: env_u32("NO_SHOW_SUSPENSION_THRESHOLD", 3),
            suspension_window_days: env_u64("SUSPENSION_WINDOW_DAYS", 7) as i64,
        };

        let sweeps = SweepConfig {
            end_of_day_interval_seconds: env_u64("END_OF_DAY_INTERVAL_SECONDS", 86_400),
            no_show_interval_seconds: env_u64("NO_SHOW_INTERVAL_SECONDS", 60),
            presence_nudge_interval_seconds: env_u64("PRESENCE_NUDGE_INTERVAL_SECONDS", 30),
            wait_refresh_interval_seconds: env_u64("WAIT_REFRESH_INTERVAL_SECONDS", 10),
        };

        let cache = CacheConfig {
            listing_ttl_seconds: env_u64("CACHE_LISTING_TTL_SECONDS", 5),
            token_ttl_seconds: env_u64("CACHE_TOKEN_TTL_SECONDS", 86_400),
        };

        let config = Config {
            cache,
            node: NodeConfig {
                bind_address,
                data_dir,
                id: node_id,
            },
            queue,
            sweeps,
            test_mode,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node.id.is_empty() {
            return Err(ConfigError::ValidationError(
                "NODE_ID cannot be empty".to_string(),
            ));
        }
        if self.queue.daily_token_limit == 0 {
            return Err(ConfigError::ValidationError(
                "DAILY_TOKEN_LIMIT must be greater than 0".to_string(),
            ));
        }
        if self.queue.no_show_grace_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "NO_SHOW_GRACE_SECONDS must be greater than 0".to_string(),
            ));
        }
        let intervals = [
            self.sweeps.end_of_day_interval_seconds,
            self.sweeps.no_show_interval_seconds,
            self.sweeps.presence_nudge_interval_seconds,
            self.sweeps.wait_refresh_interval_seconds,
        ];
        if intervals.iter().any(|&i| i == 0) {
            return Err(ConfigError::ValidationError(
                "Sweep intervals must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
