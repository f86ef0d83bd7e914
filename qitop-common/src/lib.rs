//! # Shared Data Structures (Bus ↔ Monitor)
//!
//! Defines the vocabulary exchanged between a bus adapter and the monitoring
//! engine: trace events emitted by remote objects, per-method statistics and
//! service directory notifications. The types carry no behaviour beyond small
//! conversions so that any bus adapter can depend on this crate without
//! pulling in the engine.
//!
//! ## Key Types
//!
//! - [`TraceEvent`] - One half (call, reply or error) of a remote invocation
//! - [`MethodStatistic`] - Remote-owned call counters for one method
//! - [`ServiceInfo`] - Name and process location of a registered service
//! - [`ServiceChange`] - Service directory add/remove notification
//!
//! Enable the `serde` feature to derive `Serialize`/`Deserialize`.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Size in bytes of the fixed message header preceding every payload.
///
/// Call and reply sizes reported by the monitor are `HEADER_SIZE + payload`.
pub const HEADER_SIZE: usize = 28;

/// First method id of the bus-internal range (introspection, stats, traces).
pub const IGNORED_ACTION_FIRST: u32 = 0x50;

/// Last method id (inclusive) of the bus-internal range.
pub const IGNORED_ACTION_LAST: u32 = 0x53;

/// Raw kind tag of a call message.
pub const KIND_CALL: i32 = 1;

/// Raw kind tag of a successful reply.
pub const KIND_REPLY: i32 = 2;

/// Raw kind tag of an error reply.
pub const KIND_ERROR: i32 = 3;

/// Returns `true` for method ids reserved by the bus itself.
///
/// These never represent user actions and are excluded from rankings and
/// trace correlation.
#[must_use]
pub fn ignore_action(method_id: u32) -> bool {
    (IGNORED_ACTION_FIRST..=IGNORED_ACTION_LAST).contains(&method_id)
}

// ============================================================================
// Trace Events
// ============================================================================

/// Kind of a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventKind {
    Call,
    Reply,
    Error,
}

impl EventKind {
    /// Decode a raw kind tag, `None` for tags this crate does not know.
    #[must_use]
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            KIND_CALL => Some(Self::Call),
            KIND_REPLY => Some(Self::Reply),
            KIND_ERROR => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Call => KIND_CALL,
            Self::Reply => KIND_REPLY,
            Self::Error => KIND_ERROR,
        }
    }
}

/// Wall-clock timestamp as reported by the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timeval {
    pub tv_sec: i64,
    pub tv_usec: i64,
}

impl Timeval {
    #[must_use]
    pub const fn new(tv_sec: i64, tv_usec: i64) -> Self {
        Self { tv_sec, tv_usec }
    }

    /// Microseconds since the Unix epoch, `None` if it does not fit an `i64`.
    #[must_use]
    pub fn as_micros(self) -> Option<i64> {
        self.tv_sec
            .checked_mul(1_000_000)?
            .checked_add(self.tv_usec)
    }

    /// Signed microseconds elapsed since `earlier` (negative if `earlier` is later).
    ///
    /// Timestamps come from the remote side unchecked, so the result is
    /// `None` when either conversion or the difference overflows.
    #[must_use]
    pub fn micros_since(self, earlier: Timeval) -> Option<i64> {
        self.as_micros()?.checked_sub(earlier.as_micros()?)
    }
}

/// One half of a remote invocation, as emitted on a trace subscription.
///
/// Events sharing the same `id` belong to the same invocation. The call and
/// its response may arrive in either order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TraceEvent {
    /// Correlation id shared by a call and its response
    pub id: u32,

    /// Method id (slot) of the invoked method on the traced object
    pub slot_id: u32,

    /// Raw kind tag (see [`KIND_CALL`], [`KIND_REPLY`], [`KIND_ERROR`])
    pub kind: i32,

    pub timestamp: Timeval,

    /// Serialized arguments (call) or return value (response)
    pub payload: Vec<u8>,

    /// User CPU time spent serving the call, in microseconds (responses only)
    pub cpu_user_us: i64,

    /// System CPU time spent serving the call, in microseconds (responses only)
    pub cpu_system_us: i64,
}

impl TraceEvent {
    #[must_use]
    pub fn new(
        id: u32,
        slot_id: u32,
        kind: EventKind,
        timestamp: Timeval,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id,
            slot_id,
            kind: kind.as_raw(),
            timestamp,
            payload,
            cpu_user_us: 0,
            cpu_system_us: 0,
        }
    }

    #[must_use]
    pub fn call(id: u32, slot_id: u32, timestamp: Timeval, payload: Vec<u8>) -> Self {
        Self::new(id, slot_id, EventKind::Call, timestamp, payload)
    }

    #[must_use]
    pub fn reply(id: u32, slot_id: u32, timestamp: Timeval, payload: Vec<u8>) -> Self {
        Self::new(id, slot_id, EventKind::Reply, timestamp, payload)
    }

    #[must_use]
    pub fn error(id: u32, slot_id: u32, timestamp: Timeval, payload: Vec<u8>) -> Self {
        Self::new(id, slot_id, EventKind::Error, timestamp, payload)
    }

    /// Attach the CPU times measured by the remote side.
    #[must_use]
    pub fn with_cpu(mut self, user_us: i64, system_us: i64) -> Self {
        self.cpu_user_us = user_us;
        self.cpu_system_us = system_us;
        self
    }

    /// Decoded kind, `None` if the raw tag is unknown.
    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_raw(self.kind)
    }
}

// ============================================================================
// Statistics and Directory
// ============================================================================

/// Call counters for one method, cumulated by the remote object since
/// statistics were last enabled or cleared. Wall times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MethodStatistic {
    pub count: u32,
    pub min_wall: f64,
    pub max_wall: f64,
    pub cumulative_wall: f64,
}

impl MethodStatistic {
    #[must_use]
    pub const fn new(count: u32, min_wall: f64, max_wall: f64, cumulative_wall: f64) -> Self {
        Self {
            count,
            min_wall,
            max_wall,
            cumulative_wall,
        }
    }

    /// Mean wall time in seconds (0 when no call was recorded).
    #[must_use]
    pub fn avg_wall(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.cumulative_wall / f64::from(self.count)
        }
    }
}

/// A service as listed by the service directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceInfo {
    pub name: String,

    /// Process location (`machine:pid`) hosting the service
    pub location: String,
}

/// Service directory notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ServiceChange {
    Added(String),
    Removed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_action_range() {
        assert!(!ignore_action(0x4f));
        assert!(ignore_action(0x50));
        assert!(ignore_action(0x51));
        assert!(ignore_action(0x53));
        assert!(!ignore_action(0x54));
        assert!(!ignore_action(100));
    }

    #[test]
    fn test_event_kind_raw_tags() {
        assert_eq!(EventKind::from_raw(1), Some(EventKind::Call));
        assert_eq!(EventKind::from_raw(2), Some(EventKind::Reply));
        assert_eq!(EventKind::from_raw(3), Some(EventKind::Error));
        assert_eq!(EventKind::from_raw(7), None);
        assert_eq!(EventKind::Error.as_raw(), KIND_ERROR);
    }

    #[test]
    fn test_timeval_difference() {
        let call = Timeval::new(100, 0);
        let reply = Timeval::new(100, 2_000);
        assert_eq!(reply.micros_since(call), Some(2_000));
        assert_eq!(call.micros_since(reply), Some(-2_000));

        // Borrow across the second boundary
        let late = Timeval::new(101, 100);
        let early = Timeval::new(100, 999_900);
        assert_eq!(late.micros_since(early), Some(200));
    }

    #[test]
    fn test_timeval_overflow_is_none() {
        let huge = Timeval::new(i64::MAX / 2, 0);
        assert_eq!(huge.as_micros(), None);
        assert_eq!(huge.micros_since(Timeval::new(1, 0)), None);
        assert_eq!(Timeval::new(1, 0).micros_since(huge), None);

        // Each side fits, the difference does not
        let low = Timeval::new(-9_000_000_000_000, 0);
        let high = Timeval::new(9_000_000_000_000, 0);
        assert_eq!(high.micros_since(low), None);
    }

    #[test]
    fn test_avg_wall() {
        assert_eq!(MethodStatistic::default().avg_wall(), 0.0);
        let stat = MethodStatistic::new(4, 0.001, 0.004, 0.010);
        assert!((stat.avg_wall() - 0.0025).abs() < 1e-12);
    }
}
