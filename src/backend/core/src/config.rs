//! Configuration management.

use crate::error::{ErrorCode, Result, TaskbusError};
use crate::telemetry::{LoggingConfig, MetricsConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Environment variable prefix, e.g. `TASKBUS_WORKER__DSN`.
pub const ENV_PREFIX: &str = "TASKBUS";

/// Default Redis port when the DSN omits one.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scheduler and transport configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Transport DSN: `memory://` or `redis://[user:pass@]host[:port][/db]`
    #[serde(default = "default_dsn")]
    pub dsn: String,

    /// Number of worker-pool members
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Whether this process consumes events and runs workers
    #[serde(default = "default_start_worker")]
    pub start_worker: bool,

    /// Operation key prefix (`prefix:name:id`)
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Redis store namespace (`namespace:key`)
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Redis list used as the event work queue
    #[serde(default = "default_events_list")]
    pub events_list: String,

    /// Seconds added to a task's delay to form its store TTL
    #[serde(default = "default_ttl_margin_secs")]
    pub ttl_margin_secs: u64,

    /// Blocking-pop timeout of the Redis consumer loop
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Bound of the worker queue; defaults to `num_workers`
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dsn: default_dsn(),
            num_workers: default_num_workers(),
            start_worker: default_start_worker(),
            key_prefix: default_key_prefix(),
            namespace: default_namespace(),
            events_list: default_events_list(),
            ttl_margin_secs: default_ttl_margin_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            queue_capacity: None,
        }
    }
}

// Default value functions
fn default_dsn() -> String { "memory://".to_string() }
fn default_num_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_sub(1).max(1)
}
fn default_start_worker() -> bool { true }
fn default_key_prefix() -> String { "tasks".to_string() }
fn default_namespace() -> String { "taskbus".to_string() }
fn default_events_list() -> String { "events".to_string() }
fn default_ttl_margin_secs() -> u64 { 30 }
fn default_poll_timeout_secs() -> u64 { 1 }

impl WorkerConfig {
    /// Parse the DSN into a transport selection.
    pub fn transport(&self) -> Result<Transport> {
        Transport::parse(&self.dsn)
    }

    /// Effective bound of the worker queue.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.num_workers)
    }

    /// The DSN with any password replaced, safe to print or log.
    pub fn redacted_dsn(&self) -> String {
        match self.transport() {
            Ok(transport) => transport.to_string(),
            Err(_) => self.dsn.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Transport
// ═══════════════════════════════════════════════════════════════════════════════

/// Backend selection derived from the worker DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// In-process store and event bus.
    Memory,
    /// Redis store and event bus.
    Redis(RedisTarget),
}

/// A parsed Redis endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct RedisTarget {
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
    pub db: i64,
}

impl fmt::Debug for RedisTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTarget")
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .finish()
    }
}

impl RedisTarget {
    /// Connection URL understood by `redis::Client::open`.
    pub fn url(&self) -> String {
        self.render(self.password.as_deref())
    }

    fn render(&self, password: Option<&str>) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let auth = match (&self.username, password) {
            (Some(user), Some(pass)) => format!("{}:{}@", user, pass),
            (None, Some(pass)) => format!(":{}@", pass),
            (Some(user), None) => format!("{}@", user),
            (None, None) => String::new(),
        };
        format!("{}://{}{}:{}/{}", scheme, auth, self.host, self.port, self.db)
    }
}

impl Transport {
    /// Parse a worker DSN.
    ///
    /// `memory://` selects the in-process transport. `redis://` and
    /// `rediss://` select Redis; the port defaults to 6379 and the db is the
    /// first path segment.
    pub fn parse(dsn: &str) -> Result<Self> {
        if !dsn.contains("://") {
            return Err(TaskbusError::invalid_config(format!("invalid worker dsn: {}", dsn)));
        }
        let url = Url::parse(dsn).map_err(|e| {
            TaskbusError::invalid_config(format!("invalid worker dsn: {}", e))
        })?;

        match url.scheme() {
            "memory" => Ok(Self::Memory),
            "redis" | "rediss" => Ok(Self::Redis(parse_redis(&url)?)),
            other => Err(TaskbusError::new(
                ErrorCode::UnsupportedTransport,
                format!("unsupported worker transport: {}", other),
            )),
        }
    }

    /// Protocol name as reported by the bus.
    pub fn protocol(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis(_) => "redis",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory://"),
            Self::Redis(target) => {
                f.write_str(&target.render(target.password.as_ref().map(|_| "***")))
            }
        }
    }
}

fn parse_redis(url: &Url) -> Result<RedisTarget> {
    let invalid = |msg: &str| TaskbusError::invalid_config(format!("invalid redis dsn: {}", msg));

    let host = url.host_str().unwrap_or("");
    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    let db = match url.path_segments().and_then(|mut segments| segments.next()) {
        None | Some("") => 0,
        Some(segment) => segment
            .parse::<i64>()
            .map_err(|_| invalid(&format!("bad db {:?}", segment)))?,
    };

    Ok(RedisTarget {
        tls: url.scheme() == "rediss",
        username: Some(url.username().to_string()).filter(|u| !u.is_empty()),
        password: url.password().map(str::to_string),
        host: host.to_string(),
        port: url.port().unwrap_or(DEFAULT_REDIS_PORT),
        db,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════════════════════════

impl Config {
    /// Load configuration from `.env` and the environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        let worker = &self.worker;

        if worker.num_workers == 0 {
            return Err(TaskbusError::invalid_config("worker.num_workers must be at least 1"));
        }
        if worker.queue_capacity == Some(0) {
            return Err(TaskbusError::invalid_config("worker.queue_capacity must be at least 1"));
        }
        if worker.poll_timeout_secs == 0 {
            return Err(TaskbusError::invalid_config("worker.poll_timeout_secs must be at least 1"));
        }
        if worker.key_prefix.is_empty() {
            return Err(TaskbusError::invalid_config("worker.key_prefix must not be empty"));
        }
        if worker.namespace.is_empty() {
            return Err(TaskbusError::invalid_config("worker.namespace must not be empty"));
        }
        if worker.events_list.is_empty() {
            return Err(TaskbusError::invalid_config("worker.events_list must not be empty"));
        }

        worker.transport().map(|_| ())
    }
}
