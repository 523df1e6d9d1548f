use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::types::PARCEL_ARRIVED;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Address the API server binds to (default: 0.0.0.0:3000)
    pub api_bind_addr: String,

    /// Shared secret expected as `Authorization: Bearer <secret>` from cron callers
    pub worker_secret: Option<String>,

    /// Queue claim/lease/backoff tuning
    pub queue: QueueConfig,

    /// Channel adapter credentials
    pub channels: ChannelConfig,

    /// Cron trigger settings
    pub cron: CronConfig,

    /// Per task type settings, keyed by `task_type`
    pub task_types: HashMap<String, TaskTypeConfig>,
}

/// Worker and task store tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Number of tasks claimed per invocation (default: 10)
    pub batch_size: u32,

    /// How long a claim stays valid (default: 300s)
    pub lease_secs: u64,

    /// Upper bound on one task's dispatch, must be shorter than the lease (default: 60s)
    pub dispatch_timeout_secs: u64,

    /// Upper bound on the claim call itself (default: 10s)
    pub claim_timeout_secs: u64,

    /// Attempt ceiling for task types without their own setting (default: 5)
    pub default_max_attempts: i32,

    /// Backoff base delay (default: 30s)
    pub backoff_base_secs: u64,

    /// Backoff ceiling (default: 3600s)
    pub backoff_max_secs: u64,
}

impl QueueConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            lease_secs: 300,
            dispatch_timeout_secs: 60,
            claim_timeout_secs: 10,
            default_max_attempts: 5,
            backoff_base_secs: 30,
            backoff_max_secs: 3600,
        }
    }
}

/// Credentials for the outbound notification providers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelConfig {
    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Email sender address
    pub email_from: Option<String>,

    /// Twilio account SID
    pub twilio_account_sid: Option<String>,

    /// Twilio auth token
    pub twilio_auth_token: Option<String>,

    /// Twilio messaging service SID used as the SMS sender
    pub twilio_messaging_service_sid: Option<String>,

    /// Per-request timeout for provider calls in seconds (default: 10)
    pub timeout_secs: u64,
}

/// Settings for the `relay-cron` trigger binary.
#[derive(Debug, Clone, Deserialize)]
pub struct CronConfig {
    /// Seconds between triggers (default: 60)
    pub interval_secs: u64,

    /// Processing endpoint the cron calls first
    pub worker_url: String,

    /// Batch size used when the endpoint is down and the cron processes directly (default: 5)
    pub fallback_batch_size: u32,
}

/// Retry budget and settlement target for one task type.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskTypeConfig {
    pub max_attempts: i32,
    pub settlement: Option<SettlementTarget>,
}

/// Where the "notified" write-back lands after a successful delivery.
///
/// Applied as `UPDATE <table> SET <status_column> = <status_value>,
/// <timestamp_column> = now WHERE id = <source_id> AND <timestamp_column> IS NULL`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SettlementTarget {
    pub table: String,
    pub status_column: String,
    pub status_value: String,
    pub timestamp_column: String,
}

impl SettlementTarget {
    /// Default write-back for parcel arrival notifications.
    pub fn parcels() -> Self {
        Self {
            table: "parcels".to_string(),
            status_column: "status".to_string(),
            status_value: "arrived".to_string(),
            timestamp_column: "notified_at".to_string(),
        }
    }

    /// Reject identifiers that cannot be interpolated into SQL safely.
    pub fn validate(&self) -> anyhow::Result<()> {
        for ident in [&self.table, &self.status_column, &self.timestamp_column] {
            if !is_sql_identifier(ident) {
                anyhow::bail!("'{}' is not a valid SQL identifier", ident);
            }
        }
        Ok(())
    }
}

fn is_sql_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let queue = QueueConfig {
            batch_size: env_or("QUEUE_BATCH_SIZE", 10)?,
            lease_secs: env_or("QUEUE_LEASE_SECS", 300)?,
            dispatch_timeout_secs: env_or("QUEUE_DISPATCH_TIMEOUT_SECS", 60)?,
            claim_timeout_secs: env_or("QUEUE_CLAIM_TIMEOUT_SECS", 10)?,
            default_max_attempts: env_or("QUEUE_MAX_ATTEMPTS", 5)?,
            backoff_base_secs: env_or("QUEUE_BACKOFF_BASE_SECS", 30)?,
            backoff_max_secs: env_or("QUEUE_BACKOFF_MAX_SECS", 3600)?,
        };
        if queue.dispatch_timeout_secs >= queue.lease_secs {
            anyhow::bail!("QUEUE_DISPATCH_TIMEOUT_SECS must be shorter than QUEUE_LEASE_SECS");
        }
        if queue.batch_size == 0 || queue.default_max_attempts < 1 {
            anyhow::bail!("QUEUE_BATCH_SIZE and QUEUE_MAX_ATTEMPTS must be at least 1");
        }

        let parcel = TaskTypeConfig {
            max_attempts: env_or("PARCEL_ARRIVED_MAX_ATTEMPTS", queue.default_max_attempts)?,
            settlement: Some(SettlementTarget {
                table: env_string("PARCEL_ARRIVED_SETTLE_TABLE", "parcels"),
                status_column: env_string("PARCEL_ARRIVED_SETTLE_STATUS_COLUMN", "status"),
                status_value: env_string("PARCEL_ARRIVED_SETTLE_STATUS_VALUE", "arrived"),
                timestamp_column: env_string("PARCEL_ARRIVED_SETTLE_TIMESTAMP_COLUMN", "notified_at"),
            }),
        };
        if let Some(target) = &parcel.settlement {
            target.validate()?;
        }

        let mut task_types = HashMap::new();
        task_types.insert(PARCEL_ARRIVED.to_string(), parcel);

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 20)?,
            api_bind_addr: env_string("API_BIND_ADDR", "0.0.0.0:3000"),
            worker_secret: std::env::var("WORKER_SECRET").ok().filter(|s| !s.is_empty()),
            queue,
            channels: ChannelConfig {
                resend_api_key: std::env::var("RESEND_API_KEY").ok(),
                email_from: std::env::var("EMAIL_FROM").ok(),
                twilio_account_sid: std::env::var("TWILIO_ACCOUNT_SID").ok(),
                twilio_auth_token: std::env::var("TWILIO_AUTH_TOKEN").ok(),
                twilio_messaging_service_sid: std::env::var("TWILIO_MESSAGING_SERVICE_SID").ok(),
                timeout_secs: env_or("CHANNEL_TIMEOUT_SECS", 10)?,
            },
            cron: CronConfig {
                interval_secs: env_or("CRON_INTERVAL_SECS", 60)?,
                worker_url: env_string(
                    "CRON_WORKER_URL",
                    "http://127.0.0.1:3000/api/notification-worker",
                ),
                fallback_batch_size: env_or("CRON_FALLBACK_BATCH_SIZE", 5)?,
            },
            task_types,
        })
    }

    /// Attempt ceiling for a task type, falling back to the queue default.
    pub fn max_attempts_for(&self, task_type: &str) -> i32 {
        self.task_types
            .get(task_type)
            .map(|t| t.max_attempts)
            .unwrap_or(self.queue.default_max_attempts)
    }

    /// Settlement targets keyed by task type.
    pub fn settlement_targets(&self) -> HashMap<String, SettlementTarget> {
        self.task_types
            .iter()
            .filter_map(|(task_type, cfg)| {
                cfg.settlement
                    .clone()
                    .map(|target| (task_type.clone(), target))
            })
            .collect()
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| {
            anyhow::anyhow!("{} must be a valid {}", key, std::any::type_name::<T>())
        }),
        Err(_) => Ok(default),
    }
}
