//! Observability hooks: tracing spans around dispatch, atomic counters for
//! delivered messages and calls, and channel-utilization warnings.
//!
//! `Runtime::call` opens `runtime.call` with `{agent}`, wrapping a
//! `runtime.call.dispatch` span carrying `{agent.name, agent.role,
//! runtime.kind}`; when metrics are also enabled it additionally carries
//! `execution.duration_ms`/`execution.success`. `Runtime::call_parallel`
//! opens `runtime.call_parallel` with `{count, max_workers}`, additionally
//! carrying `success_count`/`error_count` when metrics are enabled.
//!
//! This crate does not export telemetry anywhere (no OTLP, no Prometheus
//! endpoint) — only the hook points spec'd for the runtime are implemented.
//! A host application wires `tracing-subscriber` (or any other `tracing`
//! layer) to consume the spans and events emitted here.

use std::sync::atomic::{AtomicU64, Ordering};

/// Where a `Call` was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// The target agent is hosted in-process.
    Local,
    /// The target agent lives on a remote node, reached over gRPC.
    Remote,
}

impl RuntimeKind {
    /// The string used in the `runtime.type` span attribute.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeKind::Local => "local",
            RuntimeKind::Remote => "remote",
        }
    }
}

/// Atomic counters tracked when `RuntimeConfig::enable_metrics` is set.
#[derive(Debug, Default)]
pub struct Metrics {
    messages_sent: AtomicU64,
    calls_started: AtomicU64,
    calls_succeeded: AtomicU64,
    calls_failed: AtomicU64,
}

impl Metrics {
    /// Creates a zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful `Send`.
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the start of a `Call`.
    pub fn record_call_started(&self) {
        self.calls_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a `Call`'s outcome.
    pub fn record_call_finished(&self, success: bool) {
        if success {
            self.calls_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.calls_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Total messages delivered via `Send`/`Broadcast`.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Total `Call` invocations started.
    #[must_use]
    pub fn calls_started(&self) -> u64 {
        self.calls_started.load(Ordering::Relaxed)
    }

    /// Total `Call` invocations that returned successfully.
    #[must_use]
    pub fn calls_succeeded(&self) -> u64 {
        self.calls_succeeded.load(Ordering::Relaxed)
    }

    /// Total `Call` invocations that returned an error.
    #[must_use]
    pub fn calls_failed(&self) -> u64 {
        self.calls_failed.load(Ordering::Relaxed)
    }
}

/// Logs a warning, when metrics are on, if `current / capacity` exceeds
/// `threshold_pct`.
pub fn warn_on_channel_utilization(agent: &str, current: usize, capacity: usize, threshold_pct: u8) {
    if capacity == 0 {
        return;
    }
    let utilization_pct = (current * 100) / capacity;
    if utilization_pct >= usize::from(threshold_pct) {
        tracing::warn!(
            agent,
            current,
            capacity,
            utilization_pct,
            "agent mailbox approaching capacity"
        );
    }
}
