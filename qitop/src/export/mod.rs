//! Session export
//!
//! Collects the call records of the selected method and the last ranking,
//! then writes them as one JSON document:
//!
//! ```text
//! {
//!   "ranking": [ { "rank": 1, "count": 42, "min_latency_us": ..., "action": "Camera.getImage" } ],
//!   "calls":   [ { "id": 7, "slot": 100, "duration_us": 2000, "outcome": "success", ... } ],
//!   "dropped_calls": 0
//! }
//! ```
//!
//! Only the most recent [`DEFAULT_MAX_RECORDS`] calls are kept so an
//! unlimited session does not grow without bound.

use std::collections::VecDeque;
use std::io::Write;

use serde::Serialize;

use crate::analysis::RankingRow;
use crate::correlation::CallRecord;
use crate::domain::ExportError;

/// Calls kept by [`RecordExporter::new`].
pub const DEFAULT_MAX_RECORDS: usize = 100_000;

#[derive(Serialize)]
struct ExportDocument<'a> {
    ranking: &'a [RankingRow],
    calls: &'a VecDeque<CallRecord>,
    dropped_calls: u64,
}

/// Accumulates records during a session and writes them at the end.
#[derive(Debug)]
pub struct RecordExporter {
    records: VecDeque<CallRecord>,
    ranking: Vec<RankingRow>,
    max_records: usize,
    dropped: u64,
}

impl Default for RecordExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordExporter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_RECORDS)
    }

    /// Exporter keeping at most `max_records` calls (at least one).
    #[must_use]
    pub fn with_limit(max_records: usize) -> Self {
        Self {
            records: VecDeque::new(),
            ranking: Vec::new(),
            max_records: max_records.max(1),
            dropped: 0,
        }
    }

    /// Keep `record`, evicting the oldest one once the limit is reached.
    pub fn add_record(&mut self, record: CallRecord) {
        if self.records.len() == self.max_records {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(record);
    }

    /// Replace the ranking written with the records.
    pub fn set_ranking(&mut self, ranking: Vec<RankingRow>) {
        self.ranking = ranking;
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Calls evicted because the limit was reached.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Write the JSON document to `writer`.
    ///
    /// # Errors
    /// Returns an error if serialization or the final flush fails.
    pub fn export<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
        let document = ExportDocument {
            ranking: &self.ranking,
            calls: &self.records,
            dropped_calls: self.dropped,
        };
        serde_json::to_writer_pretty(&mut writer, &document)?;
        writer.write_all(b"\n")?;
        writer.flush().map_err(|e| ExportError::WriteFailed(e.to_string()))
    }
}
