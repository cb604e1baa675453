//! Test helpers: logging setup, phase macros and small fixtures.

use crate::record::RecordTable;
use crate::types::{NodeId, Payload, RecordId, Stamp};
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output. Only the first call
/// installs the subscriber.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .try_init();
    });
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

/// Inserts a record owned by `owner` with the given stamp, optionally under a
/// local parent and counting against a fresh counter.
pub(crate) fn insert_job(
    records: &mut RecordTable,
    owner: &NodeId,
    stamp: Stamp,
    parent: Option<RecordId>,
    counted: bool,
) -> RecordId {
    let counter = if counted {
        let counter = records.new_counter();
        records.increment(counter);
        Some(counter)
    } else {
        None
    };
    let parent_stamp = stamp.parent();
    records.insert_with(|id| {
        let mut record = crate::record::InvocationRecord::new(
            id,
            stamp,
            owner.clone(),
            "job".into(),
            Payload::default(),
        );
        record.parent = parent;
        record.parent_owner = parent_stamp.as_ref().map(|_| owner.clone());
        record.parent_stamp = parent_stamp;
        record.counter = counter;
        record
    })
}
