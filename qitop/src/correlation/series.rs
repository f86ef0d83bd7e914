//! Time series fed by correlated calls.
//!
//! Six series back the plots of the selected method. Only the correlator
//! task appends; display readers copy a bounded window out under the lock.

// Sizes and microsecond counts are plotted as f64
#![allow(clippy::cast_precision_loss)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::call_record::{CallRecord, Outcome};
use crate::retention::RetentionBuffer;

/// Plotted signal of the selected method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesKind {
    /// Duration of successful calls (us)
    Latency,
    /// Duration of calls answered with an error (us)
    ErrorLatency,
    CallSize,
    ReplySize,
    UserCpu,
    SystemCpu,
}

impl SeriesKind {
    pub const ALL: [Self; 6] = [
        Self::Latency,
        Self::ErrorLatency,
        Self::CallSize,
        Self::ReplySize,
        Self::UserCpu,
        Self::SystemCpu,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Latency => "latency (us)",
            Self::ErrorLatency => "error latency (us)",
            Self::CallSize => "call size (bytes)",
            Self::ReplySize => "reply size (bytes)",
            Self::UserCpu => "user cpu (us)",
            Self::SystemCpu => "system cpu (us)",
        }
    }
}

/// The six retention buffers of one correlator.
#[derive(Debug, Clone)]
pub struct CallSeries {
    latency: RetentionBuffer,
    error_latency: RetentionBuffer,
    call_size: RetentionBuffer,
    reply_size: RetentionBuffer,
    user_cpu: RetentionBuffer,
    system_cpu: RetentionBuffer,
}

impl CallSeries {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            latency: RetentionBuffer::new(capacity),
            error_latency: RetentionBuffer::new(capacity),
            call_size: RetentionBuffer::new(capacity),
            reply_size: RetentionBuffer::new(capacity),
            user_cpu: RetentionBuffer::new(capacity),
            system_cpu: RetentionBuffer::new(capacity),
        }
    }

    /// Append one record: its duration goes to exactly one latency series,
    /// sizes and CPU times always.
    pub fn record(&mut self, record: &CallRecord) {
        let duration = record.duration_us as f64;
        match record.outcome {
            Outcome::Success => self.latency.push(duration),
            Outcome::Error => self.error_latency.push(duration),
        }
        self.call_size.push(record.call_size as f64);
        self.reply_size.push(record.reply_size as f64);
        self.user_cpu.push(record.user_us as f64);
        self.system_cpu.push(record.system_us as f64);
    }

    #[must_use]
    pub fn buffer(&self, kind: SeriesKind) -> &RetentionBuffer {
        match kind {
            SeriesKind::Latency => &self.latency,
            SeriesKind::ErrorLatency => &self.error_latency,
            SeriesKind::CallSize => &self.call_size,
            SeriesKind::ReplySize => &self.reply_size,
            SeriesKind::UserCpu => &self.user_cpu,
            SeriesKind::SystemCpu => &self.system_cpu,
        }
    }
}

/// Shared handle on a [`CallSeries`], written by the correlator task.
#[derive(Debug, Clone)]
pub struct SharedSeries {
    inner: Arc<Mutex<CallSeries>>,
}

impl SharedSeries {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CallSeries::new(capacity))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallSeries> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, record: &CallRecord) {
        self.lock().record(record);
    }

    /// Copy of up to the last `limit` samples of one series, oldest first.
    #[must_use]
    pub fn snapshot(&self, kind: SeriesKind, limit: usize) -> Vec<f64> {
        self.lock().buffer(kind).snapshot(limit).to_vec()
    }
}
