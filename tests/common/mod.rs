#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use satin::{
    ComputationRegistry, JobError, LocalNetwork, NodeStats, Payload, Satin, SatinConfig, Worker,
    WorkerExit,
};
use std::sync::Once;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "SATIN_PROPTEST_SEED";

/// How long a test waits for membership before giving up.
pub const MEMBERSHIP_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }
    None
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Logging plus a phase banner.
pub fn init_test(name: &str) {
    init_test_logging();
    crate::test_phase!(name);
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

// =========================================================================
// Computations
// =========================================================================

/// Parameters of the `sum` computation: half-open range and leaf delay.
pub type SumParams = (u64, u64, u64);

pub fn encode<T: serde::Serialize>(value: &T) -> Payload {
    Payload::encode(value).expect("encode payload")
}

pub fn decode_u64(payload: &Payload) -> u64 {
    payload.decode().expect("decode u64")
}

/// `fib`: the textbook doubly recursive Fibonacci.
fn fib(worker: &mut Worker<'_>, params: &Payload) -> Result<Payload, JobError> {
    let n: u64 = params.decode()?;
    if n < 2 {
        return Ok(Payload::encode(&n)?);
    }
    let counter = worker.counter();
    let a = worker.spawn(&counter, "fib", Payload::encode(&(n - 1))?);
    let b = worker.spawn(&counter, "fib", Payload::encode(&(n - 2))?);
    worker.sync(&counter)?;
    let a: u64 = worker.result(&a)?.decode()?;
    let b: u64 = worker.result(&b)?.decode()?;
    Ok(Payload::encode(&(a + b))?)
}

/// `sum`: adds the integers of `lo..hi` by halving; every leaf sleeps for
/// the given number of milliseconds, which gives thieves time to steal.
fn sum(worker: &mut Worker<'_>, params: &Payload) -> Result<Payload, JobError> {
    let (lo, hi, delay): SumParams = params.decode()?;
    if hi - lo <= 1 {
        std::thread::sleep(Duration::from_millis(delay));
        return Ok(Payload::encode(&lo)?);
    }
    let mid = lo + (hi - lo) / 2;
    let counter = worker.counter();
    let left = worker.spawn(&counter, "sum", Payload::encode(&(lo, mid, delay))?);
    let right = worker.spawn(&counter, "sum", Payload::encode(&(mid, hi, delay))?);
    worker.sync(&counter)?;
    let left: u64 = worker.result(&left)?.decode()?;
    let right: u64 = worker.result(&right)?.decode()?;
    Ok(Payload::encode(&(left + right))?)
}

/// Registry with `fib` and `sum`.
#[must_use]
pub fn computations() -> ComputationRegistry {
    let mut registry = ComputationRegistry::new();
    registry.register_fn("fib", fib).register_fn("sum", sum);
    registry
}

#[must_use]
pub fn fib_expected(n: u64) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        (a, b) = (b, a + b);
    }
    a
}

// =========================================================================
// Cluster builders
// =========================================================================

/// Starts a node on `net`. The first node started on a network becomes the
/// master.
pub fn start_node(
    net: &LocalNetwork,
    name: &str,
    cluster: &str,
    config: SatinConfig,
    registry: ComputationRegistry,
) -> Satin {
    let transport = net.join(name, cluster).expect("join network");
    Satin::new(config, transport, net.registry(), registry).expect("start node")
}

/// Starts a worker node on its own thread: it runs the worker loop, leaves,
/// and reports why the loop ended.
pub fn spawn_worker(
    net: &LocalNetwork,
    name: &str,
    cluster: &str,
    config: SatinConfig,
) -> JoinHandle<WorkerExit> {
    spawn_reporting(net, name, cluster, config, |exit, _| exit)
}

/// Like [`spawn_worker`], but also reports the node's bookkeeping as it was
/// when the worker loop ended.
pub fn spawn_worker_with_stats(
    net: &LocalNetwork,
    name: &str,
    cluster: &str,
    config: SatinConfig,
) -> JoinHandle<(WorkerExit, NodeStats)> {
    spawn_reporting(net, name, cluster, config, |exit, node| (exit, node.stats()))
}

fn spawn_reporting<T: Send + 'static>(
    net: &LocalNetwork,
    name: &str,
    cluster: &str,
    config: SatinConfig,
    report: fn(WorkerExit, &Satin) -> T,
) -> JoinHandle<T> {
    let net = net.clone();
    let name = name.to_string();
    let cluster = cluster.to_string();
    std::thread::Builder::new()
        .name(format!("test-worker-{name}"))
        .spawn(move || {
            let node = start_node(&net, &name, &cluster, config, computations());
            assert!(!node.is_master(), "{name} must not be the master");
            let exit = node.run_worker();
            let report = report(exit, &node);
            node.exit();
            report
        })
        .expect("spawn worker thread")
}

/// Waits until `node` sees `count` peers.
pub fn wait_for_peers(node: &Satin, count: usize) {
    let deadline = Instant::now() + MEMBERSHIP_TIMEOUT;
    while node.peers().len() < count {
        assert!(
            Instant::now() < deadline,
            "{} sees {:?}, wanted {count} peers",
            node.node(),
            node.peers()
        );
        node.poll();
        std::thread::sleep(Duration::from_millis(2));
    }
}
