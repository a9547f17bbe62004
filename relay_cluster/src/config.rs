// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Instance configuration, with its defaults and the `relay.*` property keys it can
//! be read from

use relay::concurrency::Duration;
use relay::RelayErr;

use crate::connection::PoolConfig;
use crate::registry::RegistryConfig;

/// The default minimum number of connections per peer
pub const DEFAULT_MIN_CONNECTIONS: usize = 1;
/// The default maximum number of connections per peer
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;
/// The default time a caller waits for an outcome
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// The default time between refresh cycles
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
/// The default bound on one peer's metadata reply
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(1);
/// The default bound on a whole refresh cycle
pub const DEFAULT_REFRESH_TOTAL_TIMEOUT: Duration = Duration::from_secs(3);
/// The default number of failed polls tolerated per peer
pub const DEFAULT_FAILURE_BUDGET: u32 = 3;
/// The default time between invocation table dumps
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(15);
/// The default time a graceful stop waits for in-flight calls
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(60);
/// The default number of runtime worker threads
pub const DEFAULT_IO_THREADS: usize = 4;
/// The default listen address
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:0";
/// The default largest accepted frame
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Configuration of one instance
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Connections kept open to each peer
    pub min_connections: usize,
    /// Upper bound on connections to each peer
    pub max_connections: usize,
    /// How long a caller waits for an outcome before [relay::ErrorKind::HandlerTimeout]
    pub call_timeout: Duration,
    /// Time between refresh cycles
    pub refresh_interval: Duration,
    /// Bound on one peer's metadata reply
    pub refresh_timeout: Duration,
    /// Bound on a whole refresh cycle
    pub refresh_total_timeout: Duration,
    /// Consecutive failed polls tolerated per peer
    pub failure_budget: u32,
    /// Time between invocation table dumps
    pub report_interval: Duration,
    /// How long a graceful stop waits for in-flight calls
    pub shutdown_grace: Duration,
    /// Runtime worker threads
    pub io_threads: usize,
    /// The address the instance listens on
    pub bind_address: String,
    /// Shared session secret. [None] disables the handshake.
    pub cookie: Option<String>,
    /// Largest accepted frame
    pub max_frame_bytes: usize,
    /// Peer addresses for static discovery
    pub static_hosts: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            refresh_total_timeout: DEFAULT_REFRESH_TOTAL_TIMEOUT,
            failure_budget: DEFAULT_FAILURE_BUDGET,
            report_interval: DEFAULT_REPORT_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            io_threads: DEFAULT_IO_THREADS,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            cookie: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            static_hosts: Vec::new(),
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, RelayErr>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| RelayErr::configuration(format!("{key}={value}: {err}")))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, RelayErr> {
    parse::<u64>(key, value).map(Duration::from_millis)
}

impl ClusterConfig {
    /// Set the pool bounds
    pub fn with_connections(mut self, min: usize, max: usize) -> Self {
        self.min_connections = min;
        self.max_connections = max;
        self
    }

    /// Set the call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the refresh interval
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the per-peer refresh timeout
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Set the total refresh timeout
    pub fn with_refresh_total_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_total_timeout = timeout;
        self
    }

    /// Set the per-peer failure budget
    pub fn with_failure_budget(mut self, budget: u32) -> Self {
        self.failure_budget = budget;
        self
    }

    /// Set the report interval
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the runtime worker threads
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads;
        self
    }

    /// Set the listen address
    pub fn with_bind_address<S: Into<String>>(mut self, address: S) -> Self {
        self.bind_address = address.into();
        self
    }

    /// Require the session handshake with this secret
    pub fn with_cookie<S: Into<String>>(mut self, cookie: S) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Set the largest accepted frame
    pub fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    /// Set the static discovery hosts
    pub fn with_static_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Read a configuration from `relay.*` properties. Keys which are absent keep
    /// their default, unknown `relay.*` keys are rejected and other keys are ignored.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self, RelayErr>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in properties {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "relay.connections.min" => config.min_connections = parse(key, value)?,
                "relay.connections.max" => config.max_connections = parse(key, value)?,
                "relay.call.timeout_ms" => config.call_timeout = parse_millis(key, value)?,
                "relay.refresh.interval_ms" => {
                    config.refresh_interval = parse_millis(key, value)?
                }
                "relay.refresh.timeout_ms" => config.refresh_timeout = parse_millis(key, value)?,
                "relay.refresh.total_timeout_ms" => {
                    config.refresh_total_timeout = parse_millis(key, value)?
                }
                "relay.refresh.failure_budget" => config.failure_budget = parse(key, value)?,
                "relay.report.interval_ms" => config.report_interval = parse_millis(key, value)?,
                "relay.shutdown.grace_ms" => config.shutdown_grace = parse_millis(key, value)?,
                "relay.io.threads" => config.io_threads = parse(key, value)?,
                "relay.bind.address" => config.bind_address = value.trim().to_string(),
                "relay.auth.cookie" => config.cookie = Some(value.to_string()),
                "relay.frame.max_bytes" => config.max_frame_bytes = parse(key, value)?,
                "relay.discovery.static_hosts" => {
                    config.static_hosts = value
                        .split(',')
                        .map(str::trim)
                        .filter(|host| !host.is_empty())
                        .map(String::from)
                        .collect()
                }
                other if other.starts_with("relay.") => {
                    return Err(RelayErr::configuration(format!(
                        "Unknown configuration key {other}"
                    )));
                }
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), RelayErr> {
        if self.max_connections == 0 {
            return Err(RelayErr::configuration(
                "relay.connections.max must be at least 1",
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(RelayErr::configuration(format!(
                "relay.connections.min ({}) exceeds relay.connections.max ({})",
                self.min_connections, self.max_connections
            )));
        }
        let durations = [
            ("relay.call.timeout_ms", self.call_timeout),
            ("relay.refresh.interval_ms", self.refresh_interval),
            ("relay.refresh.timeout_ms", self.refresh_timeout),
            ("relay.refresh.total_timeout_ms", self.refresh_total_timeout),
            ("relay.report.interval_ms", self.report_interval),
        ];
        for (key, duration) in durations.iter() {
            if duration.is_zero() {
                return Err(RelayErr::configuration(format!("{key} must not be zero")));
            }
        }
        if self.refresh_timeout > self.refresh_total_timeout {
            return Err(RelayErr::configuration(
                "relay.refresh.timeout_ms exceeds relay.refresh.total_timeout_ms",
            ));
        }
        if self.io_threads == 0 {
            return Err(RelayErr::configuration(
                "relay.io.threads must be at least 1",
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(RelayErr::configuration(
                "relay.frame.max_bytes must be at least 1",
            ));
        }
        if matches!(&self.cookie, Some(cookie) if cookie.is_empty()) {
            return Err(RelayErr::configuration("relay.auth.cookie must not be empty"));
        }
        Ok(())
    }

    /// Build the multi-threaded runtime instances are meant to run on, sized by
    /// `io_threads`
    pub fn build_runtime(&self) -> Result<tokio::runtime::Runtime, RelayErr> {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.io_threads)
            .thread_name("relay-io")
            .enable_all()
            .build()
            .map_err(|err| {
                RelayErr::configuration(format!("Unable to build the runtime: {err}"))
                    .with_cause(Box::new(err))
            })
    }

    pub(crate) fn pool_config(&self, local_name: &str) -> PoolConfig {
        PoolConfig {
            min_connections: self.min_connections,
            max_connections: self.max_connections,
            max_frame_bytes: self.max_frame_bytes,
            cookie: self.cookie.clone(),
            local_name: local_name.to_string(),
        }
    }

    pub(crate) fn registry_config(&self, local_name: &str) -> RegistryConfig {
        RegistryConfig {
            refresh_interval: self.refresh_interval,
            refresh_timeout: self.refresh_timeout,
            refresh_total_timeout: self.refresh_total_timeout,
            failure_budget: self.failure_budget,
            report_interval: self.report_interval,
            pool: self.pool_config(local_name),
        }
    }
}
