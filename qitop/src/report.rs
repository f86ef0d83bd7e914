//! Headless output: ranking tables, call records and the exit summary.

use std::fmt::Write as _;

use crate::analysis::RankingRow;
use crate::correlation::{CallRecord, CorrelatorStats};
use crate::monitor::Selection;

/// Header line of the ranking table.
pub const RANKING_HEADER: &str = " count | min (us) | max (us) | avg (us) | Service.Method";

/// Format up to `top` rows under [`RANKING_HEADER`] (`top == 0` means all).
#[must_use]
pub fn format_ranking(rows: &[RankingRow], top: usize) -> String {
    let limit = if top == 0 { rows.len() } else { top.min(rows.len()) };
    let mut out = String::from(RANKING_HEADER);
    out.push('\n');
    for row in &rows[..limit] {
        let _ = writeln!(out, "{}", format_row(row));
    }
    out
}

/// One table line, latencies rounded to the microsecond.
#[must_use]
pub fn format_row(row: &RankingRow) -> String {
    format!(
        "{:5} | {:8.0} | {:8.0} | {:8.0} | {}",
        row.count, row.min_latency_us, row.max_latency_us, row.avg_latency_us, row.action
    )
}

/// Print the ranking table of one poll cycle.
pub fn display_ranking(rows: &[RankingRow], top: usize) {
    if rows.is_empty() {
        println!("(no calls recorded yet)");
        return;
    }
    println!("\n{}", format_ranking(rows, top).trim_end());
}

/// Print one correlated call of the selected method.
pub fn display_call_record(selection: &Selection, record: &CallRecord) {
    println!("[CALL] {}.{} {record}", selection.service, selection.method);
}

pub fn display_selection(selection: &Selection) {
    println!(
        "tracing: {}.{} (slot {}, process {})",
        selection.service, selection.method, selection.slot, selection.location
    );
}

/// Print the exit summary on stderr.
pub fn display_summary(
    exit_reason: &str,
    elapsed_secs: f64,
    services: usize,
    ranked: usize,
    correlator: Option<CorrelatorStats>,
) {
    eprintln!(
        "\n{exit_reason}: {elapsed_secs:.1}s, {services} services, {ranked} ranked methods"
    );
    if let Some(stats) = correlator {
        eprintln!(
            "trace: {} events, {} paired ({} ok / {} error), {} pending",
            stats.events, stats.paired, stats.successes, stats.errors, stats.pending
        );
        eprintln!(
            "discarded: {} other-slot, {} negative, {} bad timestamps, {} mismatched, {} dropped",
            stats.discarded_other_slot,
            stats.negative_durations,
            stats.invalid_timestamps,
            stats.mismatched,
            stats.dropped_records
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(count: u32, action: &str) -> RankingRow {
        RankingRow {
            rank: 1,
            count,
            min_latency_us: 12.4,
            max_latency_us: 980.6,
            avg_latency_us: 250.0,
            action: action.to_string(),
        }
    }

    #[test]
    fn test_row_layout() {
        assert_eq!(
            format_row(&row(42, "Camera.getImage")),
            "   42 |       12 |      981 |      250 | Camera.getImage"
        );
    }

    #[test]
    fn test_top_limits_rows() {
        let rows = vec![row(3, "A.a"), row(2, "B.b"), row(1, "C.c")];

        let table = format_ranking(&rows, 2);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], RANKING_HEADER);
        assert!(lines[2].ends_with("B.b"));

        assert_eq!(format_ranking(&rows, 0).lines().count(), 4);
        assert_eq!(format_ranking(&rows, 10).lines().count(), 4);
    }
}
