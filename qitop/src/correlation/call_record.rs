//! Call records built from a paired call and response.

use std::fmt;

use qitop_common::{EventKind, Timeval, TraceEvent, HEADER_SIZE};
use serde::Serialize;
use thiserror::Error;

use crate::domain::CorrelationId;

/// How the remote invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Error,
}

/// One completed remote invocation.
///
/// Sizes include the fixed message header; CPU times come from the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    pub id: u32,
    pub slot: u32,

    /// Timestamp of the call half
    pub timestamp: Timeval,

    /// Response timestamp minus call timestamp (never negative)
    pub duration_us: i64,

    pub call_size: usize,
    pub reply_size: usize,
    pub user_us: i64,
    pub system_us: i64,
    pub outcome: Outcome,
}

/// Why two events sharing an id do not form a valid record.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingError {
    #[error("{0}: two call events")]
    TwoCalls(CorrelationId),

    #[error("{0}: two response events")]
    TwoResponses(CorrelationId),

    #[error("{id}: response precedes call by {skew_us}us")]
    NegativeDuration { id: CorrelationId, skew_us: i64 },

    #[error("{0}: timestamps out of range")]
    TimestampOverflow(CorrelationId),
}

impl CallRecord {
    /// Build a record from the two halves of an invocation, in either order.
    ///
    /// The call and the response are told apart by their kind tag, not by
    /// arrival order.
    ///
    /// # Errors
    /// Fails when both events have the same role, when the response is
    /// timestamped before the call, or when the timestamps cannot be
    /// expressed in microseconds.
    pub fn from_pair(first: &TraceEvent, second: &TraceEvent) -> Result<Self, PairingError> {
        let id = CorrelationId(second.id);
        let (call, response) = match (first.kind(), second.kind()) {
            (Some(EventKind::Call), Some(EventKind::Call)) => {
                return Err(PairingError::TwoCalls(id))
            }
            (Some(EventKind::Call), _) => (first, second),
            (_, Some(EventKind::Call)) => (second, first),
            _ => return Err(PairingError::TwoResponses(id)),
        };

        let duration_us = response
            .timestamp
            .micros_since(call.timestamp)
            .ok_or(PairingError::TimestampOverflow(id))?;
        if duration_us < 0 {
            return Err(PairingError::NegativeDuration {
                id,
                skew_us: duration_us.saturating_neg(),
            });
        }

        let outcome = match response.kind() {
            Some(EventKind::Reply) => Outcome::Success,
            _ => Outcome::Error,
        };

        Ok(Self {
            id: call.id,
            slot: call.slot_id,
            timestamp: call.timestamp,
            duration_us,
            call_size: HEADER_SIZE + call.payload.len(),
            reply_size: HEADER_SIZE + response.payload.len(),
            user_us: response.cpu_user_us,
            system_us: response.cpu_system_us,
            outcome,
        })
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

impl fmt::Display for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match self.outcome {
            Outcome::Success => "ok",
            Outcome::Error => "error",
        };
        write!(
            f,
            "{} {outcome} {}us call={}B reply={}B user={}us sys={}us",
            CorrelationId(self.id),
            self.duration_us,
            self.call_size,
            self.reply_size,
            self.user_us,
            self.system_us
        )
    }
}
