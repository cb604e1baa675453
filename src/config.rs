//! Node configuration.
//!
//! A [`SatinConfig`] is usually assembled with [`SatinConfig::builder`];
//! [`apply_env_overrides`] lets deployment scripts change the settings that
//! the Satin command line historically exposed without recompiling.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `algorithm` | `Random` |
//! | `closed_world` | `None` (open world) |
//! | `fault_tolerance` | `WithAborts` |
//! | `table_mode` | `Replicated` |
//! | `table_key` | `Stamp` |
//! | `queue_size_hint` | 64 |
//! | `steal_wait_timeout` | 1 s |
//! | `idle_backoff` | 1 ms |
//! | `delivery` | `Upcalls` |
//! | `violation_response` | `Panic` |
//! | `kill_after` / `delete_after` | `None` |
//! | `exit_timeout` | 5 s |
//! | `seed` | `0x5A71_4E00` |
//!
//! # Environment Variables
//!
//! | Variable | Maps to |
//! |----------|---------|
//! | `SATIN_ALGORITHM` | `algorithm` (`random`, `cluster-aware`, `master-worker`) |
//! | `SATIN_CLOSED_WORLD` | `closed_world` (pool size) |
//! | `SATIN_FAULT_TOLERANCE` | `fault_tolerance` (`off`, `naive`, `with-aborts`, `without-aborts`) |
//! | `SATIN_TABLE_MODE` | `table_mode` (`replicated`, `distributed`) |
//! | `SATIN_QUEUE_SIZE` | `queue_size_hint` |
//! | `SATIN_POLLING` | `delivery` (`true` selects polling) |
//! | `SATIN_KILL_TIME_MS` | `kill_after` |
//! | `SATIN_DELETE_TIME_MS` | `delete_after` |

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Load-balancing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// One synchronous steal request to a uniformly random peer.
    Random,
    /// Synchronous steals inside the cluster, one pipelined asynchronous
    /// steal across clusters.
    ClusterAware,
    /// Workers block on the master; the master never steals.
    MasterWorker,
}

/// Crash recovery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultTolerance {
    /// No recovery; a crashed peer's jobs are lost.
    Off,
    /// Jobs stolen by a crashed peer are redone from scratch.
    Naive,
    /// Crashed subtrees are aborted, their finished work stored in the
    /// global result table, and the stolen jobs re-queued.
    WithAborts,
    /// Orphaned work keeps running and publishes its result to the table;
    /// stolen jobs are handed back to their parent for a table check.
    WithoutAborts,
}

impl FaultTolerance {
    /// True for modes that keep a global result table.
    #[must_use]
    pub const fn uses_table(self) -> bool {
        matches!(self, Self::WithAborts | Self::WithoutAborts)
    }

    /// True when crash handling runs at all.
    #[must_use]
    pub const fn enabled(self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// How the global result table is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableMode {
    /// Every stored result is broadcast to all replicas.
    Replicated,
    /// Only a pointer to the owner is broadcast; results are fetched with
    /// RESULT_REQUEST.
    Distributed,
}

/// What the global result table is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKeyScheme {
    /// The job stamp.
    Stamp,
    /// The computation name plus its encoded parameters.
    Invocation,
}

/// How inbound messages reach the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    /// A dedicated handler thread processes messages as they arrive.
    Upcalls,
    /// The worker thread drains the inbox at every scheduling point.
    Polling,
}

/// What to do when a scheduler invariant is violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationResponse {
    /// Panic with the diagnostic message.
    Panic,
    /// Terminate the process with exit code 1.
    Exit,
}

/// Configuration of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatinConfig {
    /// Load-balancing strategy.
    pub algorithm: Algorithm,
    /// Wait for this many nodes (this one included) before computing.
    pub closed_world: Option<usize>,
    /// Crash recovery mode.
    pub fault_tolerance: FaultTolerance,
    /// How the global result table is shared.
    pub table_mode: TableMode,
    /// What the global result table is keyed on.
    pub table_key: TableKeyScheme,
    /// Initial capacity of the work queue and outstanding list.
    pub queue_size_hint: usize,
    /// How long a synchronous steal waits for its reply.
    pub steal_wait_timeout: Duration,
    /// Condvar wait after a fruitless client iteration.
    pub idle_backoff: Duration,
    /// Inbound message delivery.
    pub delivery: Delivery,
    /// Fail-fast policy.
    pub violation_response: ViolationResponse,
    /// Test timer: crash this node after the delay.
    pub kill_after: Option<Duration>,
    /// Test timer: leave gracefully after the delay.
    pub delete_after: Option<Duration>,
    /// How long the master waits for EXIT_REPLY messages.
    pub exit_timeout: Duration,
    /// Victim selection seed.
    pub seed: u64,
}

impl SatinConfig {
    /// Starts a builder from the defaults.
    #[must_use]
    pub fn builder() -> SatinConfigBuilder {
        SatinConfigBuilder {
            config: Self::default(),
        }
    }

    /// Replaces zero sizes and durations with usable minimums.
    pub fn normalize(&mut self) {
        if self.queue_size_hint == 0 {
            self.queue_size_hint = 1;
        }
        if self.steal_wait_timeout.is_zero() {
            self.steal_wait_timeout = Duration::from_millis(1);
        }
        if self.idle_backoff.is_zero() {
            self.idle_backoff = Duration::from_micros(100);
        }
        if self.exit_timeout.is_zero() {
            self.exit_timeout = Duration::from_millis(1);
        }
        if self.closed_world == Some(0) {
            self.closed_world = Some(1);
        }
    }

    /// True when a global result table is kept.
    #[must_use]
    pub const fn uses_table(&self) -> bool {
        self.fault_tolerance.uses_table()
    }
}

impl Default for SatinConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Random,
            closed_world: None,
            fault_tolerance: FaultTolerance::WithAborts,
            table_mode: TableMode::Replicated,
            table_key: TableKeyScheme::Stamp,
            queue_size_hint: 64,
            steal_wait_timeout: Duration::from_secs(1),
            idle_backoff: Duration::from_millis(1),
            delivery: Delivery::Upcalls,
            violation_response: ViolationResponse::Panic,
            kill_after: None,
            delete_after: None,
            exit_timeout: Duration::from_secs(5),
            seed: 0x5A71_4E00,
        }
    }
}

/// Builder for [`SatinConfig`].
#[derive(Debug, Clone)]
pub struct SatinConfigBuilder {
    config: SatinConfig,
}

impl SatinConfigBuilder {
    /// Sets the load-balancing strategy.
    #[must_use]
    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.config.algorithm = algorithm;
        self
    }

    /// Waits for `nodes` members before computing.
    #[must_use]
    pub fn closed_world(mut self, nodes: usize) -> Self {
        self.config.closed_world = Some(nodes);
        self
    }

    /// Sets the crash recovery mode.
    #[must_use]
    pub fn fault_tolerance(mut self, mode: FaultTolerance) -> Self {
        self.config.fault_tolerance = mode;
        self
    }

    /// Sets the table sharing mode.
    #[must_use]
    pub fn table_mode(mut self, mode: TableMode) -> Self {
        self.config.table_mode = mode;
        self
    }

    /// Sets the table key scheme.
    #[must_use]
    pub fn table_key(mut self, scheme: TableKeyScheme) -> Self {
        self.config.table_key = scheme;
        self
    }

    /// Sets the queue capacity hint.
    #[must_use]
    pub fn queue_size_hint(mut self, hint: usize) -> Self {
        self.config.queue_size_hint = hint;
        self
    }

    /// Sets the synchronous steal timeout.
    #[must_use]
    pub fn steal_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.steal_wait_timeout = timeout;
        self
    }

    /// Sets the idle backoff.
    #[must_use]
    pub fn idle_backoff(mut self, backoff: Duration) -> Self {
        self.config.idle_backoff = backoff;
        self
    }

    /// Sets the delivery mode.
    #[must_use]
    pub fn delivery(mut self, delivery: Delivery) -> Self {
        self.config.delivery = delivery;
        self
    }

    /// Sets the fail-fast policy.
    #[must_use]
    pub fn violation_response(mut self, response: ViolationResponse) -> Self {
        self.config.violation_response = response;
        self
    }

    /// Crashes the node after `delay`.
    #[must_use]
    pub fn kill_after(mut self, delay: Duration) -> Self {
        self.config.kill_after = Some(delay);
        self
    }

    /// Makes the node leave after `delay`.
    #[must_use]
    pub fn delete_after(mut self, delay: Duration) -> Self {
        self.config.delete_after = Some(delay);
        self
    }

    /// Sets the exit reply timeout.
    #[must_use]
    pub fn exit_timeout(mut self, timeout: Duration) -> Self {
        self.config.exit_timeout = timeout;
        self
    }

    /// Sets the victim selection seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Applies `SATIN_*` environment overrides on top of the builder state.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Normalizes and returns the configuration.
    #[must_use]
    pub fn build(mut self) -> SatinConfig {
        self.config.normalize();
        self.config
    }
}

/// Environment variable selecting the algorithm.
pub const ENV_ALGORITHM: &str = "SATIN_ALGORITHM";
/// Environment variable for the closed-world pool size.
pub const ENV_CLOSED_WORLD: &str = "SATIN_CLOSED_WORLD";
/// Environment variable selecting the fault tolerance mode.
pub const ENV_FAULT_TOLERANCE: &str = "SATIN_FAULT_TOLERANCE";
/// Environment variable selecting the table mode.
pub const ENV_TABLE_MODE: &str = "SATIN_TABLE_MODE";
/// Environment variable for the queue size hint.
pub const ENV_QUEUE_SIZE: &str = "SATIN_QUEUE_SIZE";
/// Environment variable selecting polling delivery.
pub const ENV_POLLING: &str = "SATIN_POLLING";
/// Environment variable for the kill timer in milliseconds.
pub const ENV_KILL_TIME_MS: &str = "SATIN_KILL_TIME_MS";
/// Environment variable for the delete timer in milliseconds.
pub const ENV_DELETE_TIME_MS: &str = "SATIN_DELETE_TIME_MS";

/// Applies the `SATIN_*` variables that are set.
///
/// Returns a `Config` error if a variable is set to an unparseable value.
pub fn apply_env_overrides(config: &mut SatinConfig) -> Result<()> {
    apply_overrides(config, |name| std::env::var(name).ok())
}

fn apply_overrides(
    config: &mut SatinConfig,
    read: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(val) = read(ENV_ALGORITHM) {
        config.algorithm = match normalized(&val).as_str() {
            "random" | "rs" => Algorithm::Random,
            "cluster-aware" | "crs" => Algorithm::ClusterAware,
            "master-worker" | "mw" => Algorithm::MasterWorker,
            _ => return Err(invalid(ENV_ALGORITHM, &val, "random|cluster-aware|master-worker")),
        };
    }
    if let Some(val) = read(ENV_CLOSED_WORLD) {
        config.closed_world = Some(parse_usize(ENV_CLOSED_WORLD, &val)?);
    }
    if let Some(val) = read(ENV_FAULT_TOLERANCE) {
        config.fault_tolerance = match normalized(&val).as_str() {
            "off" | "false" => FaultTolerance::Off,
            "naive" => FaultTolerance::Naive,
            "with-aborts" | "on" | "true" => FaultTolerance::WithAborts,
            "without-aborts" => FaultTolerance::WithoutAborts,
            _ => {
                return Err(invalid(
                    ENV_FAULT_TOLERANCE,
                    &val,
                    "off|naive|with-aborts|without-aborts",
                ))
            }
        };
    }
    if let Some(val) = read(ENV_TABLE_MODE) {
        config.table_mode = match normalized(&val).as_str() {
            "replicated" => TableMode::Replicated,
            "distributed" | "pointer" => TableMode::Distributed,
            _ => return Err(invalid(ENV_TABLE_MODE, &val, "replicated|distributed")),
        };
    }
    if let Some(val) = read(ENV_QUEUE_SIZE) {
        config.queue_size_hint = parse_usize(ENV_QUEUE_SIZE, &val)?;
    }
    if let Some(val) = read(ENV_POLLING) {
        config.delivery = if parse_bool(ENV_POLLING, &val)? {
            Delivery::Polling
        } else {
            Delivery::Upcalls
        };
    }
    if let Some(val) = read(ENV_KILL_TIME_MS) {
        config.kill_after = Some(Duration::from_millis(parse_u64(ENV_KILL_TIME_MS, &val)?));
    }
    if let Some(val) = read(ENV_DELETE_TIME_MS) {
        config.delete_after = Some(Duration::from_millis(parse_u64(ENV_DELETE_TIME_MS, &val)?));
    }
    Ok(())
}

fn normalized(val: &str) -> String {
    val.trim().to_lowercase().replace('_', "-")
}

fn invalid(var_name: &str, val: &str, expected: &str) -> Error {
    Error::config(format!(
        "invalid value for {var_name}: expected {expected}, got {val:?}"
    ))
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| invalid(var_name, val, "unsigned integer").with_source(e))
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64> {
    val.trim()
        .parse::<u64>()
        .map_err(|e| invalid(var_name, val, "milliseconds").with_source(e))
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool> {
    match normalized(val).as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(var_name, val, "bool")),
    }
}
