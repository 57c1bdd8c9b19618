use chrono::{DateTime, NaiveDate, NaiveDateTime};
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::log_store::LogRecord;

pub const TOP_SENDERS: usize = 5;
const NO_EXTENSION: &str = "(none)";
const UNCATEGORIZED: &str = "Uncategorized";

/// One bar of an HTML bar chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub label: String,
    pub value: usize,
    pub percent: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub total: usize,
    pub with_attachments: usize,
    pub per_day: Vec<Bar>,
    pub extensions: Vec<Bar>,
    pub top_senders: Vec<Bar>,
    pub categories: Vec<Bar>,
}

// Accepts RFC 3339 and the older "YYYY-MM-DD HH:MM:SS" log timestamps
fn record_day(timestamp: &str) -> Option<NaiveDate> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(parsed.date_naive());
    }
    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.date())
        .ok()
}

fn extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_lowercase())
        .unwrap_or_else(|| NO_EXTENSION.to_string())
}

fn to_bars(pairs: impl IntoIterator<Item = (String, usize)>) -> Vec<Bar> {
    let pairs: Vec<_> = pairs.into_iter().collect();
    let max = pairs.iter().map(|(_, v)| *v).max().unwrap_or(0);
    pairs
        .into_iter()
        .map(|(label, value)| Bar {
            percent: if max == 0 { 0 } else { (value * 100 / max) as u32 },
            label,
            value,
        })
        .collect()
}

// Count descending, then label ascending
fn ranked(counts: impl IntoIterator<Item = (String, usize)>) -> Vec<(String, usize)> {
    counts
        .into_iter()
        .sorted_by(|(la, ca), (lb, cb)| cb.cmp(ca).then_with(|| la.cmp(lb)))
        .collect()
}

pub fn per_day(records: &[LogRecord]) -> Vec<Bar> {
    let days: BTreeMap<NaiveDate, usize> = records
        .iter()
        .filter_map(|r| record_day(&r.timestamp))
        .counts()
        .into_iter()
        .collect();
    to_bars(days.into_iter().map(|(day, n)| (day.format("%Y-%m-%d").to_string(), n)))
}

pub fn extensions(records: &[LogRecord]) -> Vec<Bar> {
    let counts = records
        .iter()
        .flat_map(|r| r.attachments.iter())
        .map(|path| extension(path))
        .counts();
    to_bars(ranked(counts))
}

pub fn top_senders(records: &[LogRecord], n: usize) -> Vec<Bar> {
    let counts = records.iter().map(|r| r.sender.clone()).counts();
    to_bars(ranked(counts).into_iter().take(n))
}

pub fn categories(records: &[LogRecord]) -> Vec<Bar> {
    let counts = records
        .iter()
        .map(|r| r.category.clone().unwrap_or_else(|| UNCATEGORIZED.to_string()))
        .counts();
    to_bars(ranked(counts))
}

pub fn summarize(records: &[LogRecord]) -> Summary {
    Summary {
        total: records.len(),
        with_attachments: records.iter().filter(|r| !r.attachments.is_empty()).count(),
        per_day: per_day(records),
        extensions: extensions(records),
        top_senders: top_senders(records, TOP_SENDERS),
        categories: categories(records),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: &str, sender: &str, attachments: &[&str], category: Option<&str>) -> LogRecord {
        LogRecord {
            timestamp: ts.to_string(),
            sender: sender.to_string(),
            subject: "s".to_string(),
            attachments: attachments.iter().map(|a| a.to_string()).collect(),
            category: category.map(str::to_string),
            ..Default::default()
        }
    }

    fn sample() -> Vec<LogRecord> {
        vec![
            record("2025-10-06T09:00:00Z", "alice", &["a/x.PDF", "a/y.pdf"], Some("Work")),
            record("2025-10-06 18:30:00", "bob", &["a/notes"], Some("Finance")),
            record("2025-10-05T12:00:00+02:00", "alice", &[], Some("Work")),
            record("garbage", "carol", &["a/pic.jpg"], None),
        ]
    }

    #[test]
    fn per_day_is_ascending_and_skips_unparseable() {
        let bars = per_day(&sample());
        let labels: Vec<_> = bars.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, ["2025-10-05", "2025-10-06"]);
        assert_eq!(bars[1].value, 2);
        assert_eq!(bars[1].percent, 100);
        assert_eq!(bars[0].percent, 50);
    }

    #[test]
    fn extensions_are_lowercased() {
        let bars = extensions(&sample());
        assert_eq!(bars[0], Bar { label: "pdf".into(), value: 2, percent: 100 });
        assert!(bars.iter().any(|b| b.label == NO_EXTENSION));
        assert!(bars.iter().any(|b| b.label == "jpg"));
    }

    #[test]
    fn top_senders_rank_by_count_then_name() {
        let bars = top_senders(&sample(), 2);
        let labels: Vec<_> = bars.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, ["alice", "bob"]);
    }

    #[test]
    fn summary_counts() {
        let summary = summarize(&sample());
        assert_eq!(summary.total, 4);
        assert_eq!(summary.with_attachments, 3);
        assert!(summary.categories.iter().any(|b| b.label == UNCATEGORIZED));
    }

    #[test]
    fn empty_log_gives_empty_series() {
        let summary = summarize(&[]);
        assert_eq!(summary.total, 0);
        assert!(summary.per_day.is_empty());
        assert!(summary.top_senders.is_empty());
    }
}
