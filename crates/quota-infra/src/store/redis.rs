//! Redis counter store - the shared store behind the distributed counter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError};
use tokio::sync::RwLock;
use tokio::time::Instant;

use quota_core::ports::CounterStore;
use quota_core::{ConfigError, CounterRecord, RateKey, StoreError};

use crate::env;

/// Address family used when resolving `host`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpFamily {
    /// Let the resolver pick.
    #[default]
    Any,
    V4,
    V6,
}

impl IpFamily {
    fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            IpFamily::Any => true,
            IpFamily::V4 => addr.is_ipv4(),
            IpFamily::V6 => addr.is_ipv6(),
        }
    }
}

impl std::str::FromStr for IpFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "0" | "any" => Ok(IpFamily::Any),
            "4" | "ipv4" => Ok(IpFamily::V4),
            "6" | "ipv6" => Ok(IpFamily::V6),
            other => Err(format!("unknown address family {:?} (expected 0, 4 or 6)", other)),
        }
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    pub family: IpFamily,
    /// Bound on establishing a connection.
    pub connect_timeout: Duration,
    /// Bound on a single command round-trip.
    pub command_timeout: Duration,
    /// Reconnect attempts before the manager gives up on a broken connection.
    pub retry_attempts: usize,
    /// First reconnect delay; later delays grow exponentially.
    pub retry_base: Duration,
    /// Ceiling for reconnect delays.
    pub retry_max_delay: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            db: 0,
            family: IpFamily::Any,
            connect_timeout: Duration::from_millis(2000),
            command_timeout: Duration::from_millis(500),
            retry_attempts: 3,
            retry_base: Duration::from_millis(50),
            retry_max_delay: Duration::from_millis(2000),
        }
    }
}

impl RedisConfig {
    /// Load configuration from environment variables.
    ///
    /// `REDIS_HOST` is required; a missing host is a deployment defect.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            host: env::required("REDIS_HOST")?,
            port: env::parse_or("REDIS_PORT", defaults.port)?,
            username: env::optional("REDIS_USERNAME"),
            password: env::optional("REDIS_PASSWORD"),
            db: env::parse_or("REDIS_DB", defaults.db)?,
            family: env::parse_or("REDIS_FAMILY", defaults.family)?,
            connect_timeout: Duration::from_millis(env::parse_or(
                "REDIS_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout.as_millis() as u64,
            )?),
            command_timeout: Duration::from_millis(env::parse_or(
                "REDIS_COMMAND_TIMEOUT_MS",
                defaults.command_timeout.as_millis() as u64,
            )?),
            retry_attempts: env::parse_or("REDIS_RETRY_ATTEMPTS", defaults.retry_attempts)?,
            retry_base: Duration::from_millis(env::parse_or(
                "REDIS_RETRY_BASE_MS",
                defaults.retry_base.as_millis() as u64,
            )?),
            retry_max_delay: Duration::from_millis(env::parse_or(
                "REDIS_RETRY_MAX_DELAY_MS",
                defaults.retry_max_delay.as_millis() as u64,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Missing("REDIS_HOST"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("REDIS_PORT", "port must be non-zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "REDIS_CONNECT_TIMEOUT_MS",
                "timeout must be non-zero",
            ));
        }
        if self.command_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "REDIS_COMMAND_TIMEOUT_MS",
                "timeout must be non-zero",
            ));
        }
        if self.retry_base > self.retry_max_delay {
            return Err(ConfigError::invalid(
                "REDIS_RETRY_BASE_MS",
                "base delay exceeds REDIS_RETRY_MAX_DELAY_MS",
            ));
        }
        Ok(())
    }

    /// Host and port for logs. Never includes credentials.
    pub fn display_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reconnect policy for the connection manager.
    ///
    /// Delays are `retry_base * 2^attempt`, capped at `retry_max_delay`. While a
    /// reconnect is in flight, commands fail immediately instead of queueing.
    fn manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_exponent_base(2)
            .set_factor(self.retry_base.as_millis().max(1) as u64)
            .set_max_delay(self.retry_max_delay.as_millis() as u64)
            .set_number_of_retries(self.retry_attempts)
            .set_connection_timeout(self.connect_timeout)
            .set_response_timeout(self.command_timeout)
    }

    async fn connection_info(&self) -> Result<ConnectionInfo, StoreError> {
        let host = match self.family {
            IpFamily::Any => self.host.clone(),
            family => self.resolve(family).await?,
        };

        Ok(ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                username: self.username.clone(),
                password: self.password.clone(),
                ..Default::default()
            },
        })
    }

    async fn resolve(&self, family: IpFamily) -> Result<String, StoreError> {
        let addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| StoreError::Unavailable(format!("resolving {}: {}", self.host, e)))?;

        addrs
            .into_iter()
            .find(|addr| family.matches(addr))
            .map(|addr| addr.ip().to_string())
            .ok_or_else(|| {
                StoreError::Unavailable(format!(
                    "{} has no {:?} address",
                    self.host, family
                ))
            })
    }
}

enum ConnectionState {
    /// Not connected. Holds the time of the last failed attempt.
    Idle { last_failure: Option<Instant> },
    /// A dial is in flight on a background task.
    Connecting,
    Ready(ConnectionManager),
    Closed,
}

/// Redis-backed counter store.
///
/// Owns one long-lived, multiplexed connection. The connection is opened by
/// `connect` at startup, or in the background after a failure. Callers never
/// wait on a dial: while the store is not `Ready` they get an error at once.
/// `shutdown` releases the connection for good.
pub struct RedisCounterStore {
    config: RedisConfig,
    state: Arc<RwLock<ConnectionState>>,
}

impl RedisCounterStore {
    /// Validate the configuration without touching the network.
    pub fn new(config: RedisConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Idle { last_failure: None })),
        })
    }

    /// Startup hook: open the connection now.
    ///
    /// An unreachable store is not fatal; the store stays idle and later calls
    /// retry the connection in the background.
    pub async fn connect(&self) -> Result<(), StoreError> {
        {
            let mut state = self.state.write().await;
            match &*state {
                ConnectionState::Ready(_) => return Ok(()),
                ConnectionState::Closed => return Err(StoreError::Closed),
                ConnectionState::Connecting => {
                    return Err(StoreError::Unavailable("connection in progress".to_string()));
                }
                ConnectionState::Idle { .. } => {}
            }
            *state = ConnectionState::Connecting;
        }

        // The dial runs on its own task so the state is settled even if this
        // future is dropped.
        tokio::spawn(dial(self.config.clone(), self.state.clone()))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .map(|_| ())
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        {
            let state = self.state.read().await;
            match &*state {
                ConnectionState::Ready(conn) => return Ok(conn.clone()),
                ConnectionState::Closed => return Err(StoreError::Closed),
                ConnectionState::Connecting => return Err(reconnecting()),
                ConnectionState::Idle { .. } => {}
            }
        }

        let mut state = self.state.write().await;
        match &*state {
            // Another caller connected while we waited for the lock.
            ConnectionState::Ready(conn) => return Ok(conn.clone()),
            ConnectionState::Closed => return Err(StoreError::Closed),
            ConnectionState::Connecting => return Err(reconnecting()),
            ConnectionState::Idle {
                last_failure: Some(at),
            } if at.elapsed() < self.config.retry_max_delay => {
                return Err(StoreError::Unavailable(
                    "waiting before next connection attempt".to_string(),
                ));
            }
            ConnectionState::Idle { .. } => {}
        }

        *state = ConnectionState::Connecting;
        tokio::spawn(dial(self.config.clone(), self.state.clone()));
        Err(reconnecting())
    }

    fn classify(&self, err: RedisError) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout(self.config.command_timeout)
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

fn reconnecting() -> StoreError {
    StoreError::Unavailable("reconnecting to Redis".to_string())
}

/// Open a connection and record the outcome in `state`.
async fn dial(
    config: RedisConfig,
    state: Arc<RwLock<ConnectionState>>,
) -> Result<ConnectionManager, StoreError> {
    let result = open(&config).await;

    let mut state = state.write().await;
    if let ConnectionState::Closed = &*state {
        return Err(StoreError::Closed);
    }

    match result {
        Ok(conn) => {
            tracing::info!(
                addr = %config.display_addr(),
                db = config.db,
                "Connected to Redis counter store"
            );
            *state = ConnectionState::Ready(conn.clone());
            Ok(conn)
        }
        Err(e) => {
            tracing::warn!(
                addr = %config.display_addr(),
                error = %e,
                "Redis counter store unreachable"
            );
            *state = ConnectionState::Idle {
                last_failure: Some(Instant::now()),
            };
            Err(e)
        }
    }
}

async fn open(config: &RedisConfig) -> Result<ConnectionManager, StoreError> {
    let info = config.connection_info().await?;
    let client = Client::open(info).map_err(|e| StoreError::Unavailable(e.to_string()))?;

    // The manager retries internally; bound the whole attempt.
    let manager = ConnectionManager::new_with_config(client, config.manager_config());
    tokio::time::timeout(config.connect_timeout, manager)
        .await
        .map_err(|_| StoreError::Timeout(config.connect_timeout))?
        .map_err(|e| StoreError::Unavailable(e.to_string()))
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(
        &self,
        key: &RateKey,
        window: Duration,
    ) -> Result<CounterRecord, StoreError> {
        let mut conn = self.connection().await?;
        let window_ms = window.as_millis().max(1) as i64;

        // INCR and PEXPIRE run inside one MULTI/EXEC, so no client ever sees a
        // counter without an expiry. PTTL rides along in the same transaction
        // and reports the TTL without a second round-trip.
        let (count, pttl): (u64, i64) = redis::pipe()
            .atomic()
            .incr(key.as_str(), 1)
            .pexpire(key.as_str(), window_ms)
            .ignore()
            .pttl(key.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| self.classify(e))?;

        // -2: key vanished, -1: no expiry. Neither should happen inside the
        // transaction; report no remaining time rather than failing.
        let ttl = u64::try_from(pttl).map(Duration::from_millis).unwrap_or(Duration::ZERO);

        Ok(CounterRecord { count, ttl })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(())
    }

    async fn shutdown(&self) {
        let mut state = self.state.write().await;
        if let ConnectionState::Ready(_) = &*state {
            tracing::info!(
                addr = %self.config.display_addr(),
                "Closing Redis counter store connection"
            );
        }
        // Dropping the last manager clone closes the socket.
        *state = ConnectionState::Closed;
    }
}
