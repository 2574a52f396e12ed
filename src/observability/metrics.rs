//! Stream metrics.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::errors::ErrorKind;

/// Receives stream lifecycle events.
pub trait StreamMetrics: Send + Sync {
    /// A stream moved from `Idle` to `Streaming`.
    fn record_started(&self, provider: &str);

    /// The first chunk was delivered after `elapsed`.
    fn record_first_chunk(&self, provider: &str, elapsed: Duration);

    /// A chunk was delivered.
    fn record_chunk(&self, provider: &str, chars: usize);

    /// A stream settled successfully.
    fn record_completed(&self, provider: &str, chunks: usize, duration: Duration);

    /// A started stream settled with an error.
    fn record_failed(&self, provider: &str, kind: ErrorKind);

    /// A request failed before its response opened, so no stream started.
    fn record_open_failed(&self, provider: &str, kind: ErrorKind);

    /// Returns a snapshot of the counters.
    fn snapshot(&self) -> StreamMetricsSnapshot;
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamMetricsSnapshot {
    /// Streams that received their first fragment.
    pub started: u64,
    /// Streams that settled successfully.
    pub completed: u64,
    /// Started streams that settled with an error other than cancellation.
    /// Never exceeds `started`.
    pub failed: u64,
    /// Requests that failed before a response opened.
    pub open_failed: u64,
    /// Requests cancelled, whether or not their stream had started.
    pub cancelled: u64,
    /// Chunks delivered.
    pub chunks: u64,
    /// Characters delivered.
    pub characters: u64,
    /// Sum of time-to-first-chunk in milliseconds.
    pub total_first_chunk_ms: u64,
    /// Streams that delivered at least one chunk.
    pub first_chunks: u64,
    /// Failures by error kind, covering both stream and open failures.
    pub failures: HashMap<String, u64>,
}

impl StreamMetricsSnapshot {
    /// Average time to first chunk in milliseconds.
    pub fn average_first_chunk_ms(&self) -> f64 {
        if self.first_chunks == 0 {
            0.0
        } else {
            self.total_first_chunk_ms as f64 / self.first_chunks as f64
        }
    }
}

/// Counter-based collector kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryStreamMetrics {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    open_failed: AtomicU64,
    cancelled: AtomicU64,
    chunks: AtomicU64,
    characters: AtomicU64,
    total_first_chunk_ms: AtomicU64,
    first_chunks: AtomicU64,
    failures: RwLock<HashMap<String, u64>>,
}

impl InMemoryStreamMetrics {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all counters.
    pub fn reset(&self) {
        for counter in [
            &self.started,
            &self.completed,
            &self.failed,
            &self.open_failed,
            &self.cancelled,
            &self.chunks,
            &self.characters,
            &self.total_first_chunk_ms,
            &self.first_chunks,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.failures.write().clear();
    }

    fn count_failure(&self, kind: ErrorKind) {
        *self
            .failures
            .write()
            .entry(kind.as_str().to_string())
            .or_insert(0) += 1;
    }
}

impl StreamMetrics for InMemoryStreamMetrics {
    fn record_started(&self, _provider: &str) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_first_chunk(&self, _provider: &str, elapsed: Duration) {
        self.first_chunks.fetch_add(1, Ordering::Relaxed);
        self.total_first_chunk_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    fn record_chunk(&self, _provider: &str, chars: usize) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.characters.fetch_add(chars as u64, Ordering::Relaxed);
    }

    fn record_completed(&self, _provider: &str, _chunks: usize, _duration: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self, _provider: &str, kind: ErrorKind) {
        if kind == ErrorKind::Cancelled {
            self.cancelled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.count_failure(kind);
    }

    fn record_open_failed(&self, _provider: &str, kind: ErrorKind) {
        if kind == ErrorKind::Cancelled {
            self.cancelled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.open_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.count_failure(kind);
    }

    fn snapshot(&self) -> StreamMetricsSnapshot {
        StreamMetricsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            open_failed: self.open_failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            characters: self.characters.load(Ordering::Relaxed),
            total_first_chunk_ms: self.total_first_chunk_ms.load(Ordering::Relaxed),
            first_chunks: self.first_chunks.load(Ordering::Relaxed),
            failures: self.failures.read().clone(),
        }
    }
}

/// Collector that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStreamMetrics;

impl StreamMetrics for NoopStreamMetrics {
    fn record_started(&self, _provider: &str) {}
    fn record_first_chunk(&self, _provider: &str, _elapsed: Duration) {}
    fn record_chunk(&self, _provider: &str, _chars: usize) {}
    fn record_completed(&self, _provider: &str, _chunks: usize, _duration: Duration) {}
    fn record_failed(&self, _provider: &str, _kind: ErrorKind) {}
    fn record_open_failed(&self, _provider: &str, _kind: ErrorKind) {}

    fn snapshot(&self) -> StreamMetricsSnapshot {
        StreamMetricsSnapshot::default()
    }
}
