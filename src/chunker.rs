//! Splits collected records into bounded batches for the analyzer.

use crate::source::LogRecord;
use crate::window::TimeWindow;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub source_label: String,
    /// Position among this source's chunks, from 0.
    pub sequence_index: usize,
    pub records: Vec<LogRecord>,
    pub span: TimeWindow,
}

impl Chunk {
    pub fn char_count(&self) -> usize {
        self.records.iter().map(|r| r.text.chars().count()).sum()
    }
}

/// Groups records by source label (in order of first appearance) and fills
/// chunks greedily at record boundaries.
///
/// A chunk is closed when the next record would push it past either limit.
/// A record longer than `max_chunk_chars` on its own gets a chunk to itself.
/// Limits below 1 are treated as 1.
pub fn split(records: &[LogRecord], max_chunk_chars: usize, max_chunk_records: usize) -> Vec<Chunk> {
    let max_chars = max_chunk_chars.max(1);
    let max_records = max_chunk_records.max(1);

    let mut groups: Vec<(&str, Vec<&LogRecord>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for record in records {
        let slot = *index.entry(record.source_label.as_str()).or_insert_with(|| {
            groups.push((record.source_label.as_str(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(record);
    }

    let mut chunks = Vec::new();
    for (label, group) in groups {
        let mut sequence_index = 0;
        let mut current: Vec<LogRecord> = Vec::new();
        let mut current_chars = 0usize;

        for record in group {
            let len = record.text.chars().count();
            let overflows = current_chars + len > max_chars || current.len() + 1 > max_records;
            if !current.is_empty() && overflows {
                chunks.push(make_chunk(label, sequence_index, std::mem::take(&mut current)));
                sequence_index += 1;
                current_chars = 0;
            }
            current.push(record.clone());
            current_chars += len;
        }

        if !current.is_empty() {
            chunks.push(make_chunk(label, sequence_index, current));
        }
    }

    chunks
}

fn make_chunk(label: &str, sequence_index: usize, records: Vec<LogRecord>) -> Chunk {
    let span = TimeWindow::spanning(records.iter().map(|r| r.timestamp));
    Chunk {
        source_label: label.to_string(),
        sequence_index,
        records,
        span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_725_600 + secs, 0).unwrap()
    }

    fn records(label: &str, texts: &[&str]) -> Vec<LogRecord> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| LogRecord::new(label, at(i as i64), *t))
            .collect()
    }

    fn rejoin(chunks: &[Chunk], label: &str) -> Vec<LogRecord> {
        let mut own: Vec<&Chunk> = chunks.iter().filter(|c| c.source_label == label).collect();
        own.sort_by_key(|c| c.sequence_index);
        own.into_iter().flat_map(|c| c.records.clone()).collect()
    }

    #[test]
    fn test_partition_per_source() {
        let mut input = records("api", &["aaaa", "bbbb", "cccc", "dddd", "eeee"]);
        input.extend(records("db", &["1111", "2222", "3333"]));
        input.swap(1, 6);

        let chunks = split(&input, 9, 100);

        for label in ["api", "db"] {
            let expected: Vec<LogRecord> =
                input.iter().filter(|r| r.source_label == label).cloned().collect();
            assert_eq!(rejoin(&chunks, label), expected);
        }
        for chunk in &chunks {
            assert!(chunk.char_count() <= 9);
            assert!(chunk.records.iter().all(|r| r.source_label == chunk.source_label));
        }
        // First appearance order: api before db.
        assert_eq!(chunks[0].source_label, "api");
    }

    #[test]
    fn test_idempotent() {
        let input = records("api", &["one", "two", "three", "four", "five", "six"]);
        assert_eq!(split(&input, 8, 2), split(&input, 8, 2));
    }

    #[test]
    fn test_record_limit() {
        let input = records("api", &["a", "b", "c", "d", "e"]);
        let chunks = split(&input, 1000, 2);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.records.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let indices: Vec<usize> = chunks.iter().map(|c| c.sequence_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_oversized_record_stands_alone() {
        let huge = "x".repeat(50);
        let input = records("api", &["ab", &huge, "cd"]);
        let chunks = split(&input, 10, 100);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].records.len(), 1);
        assert_eq!(chunks[1].records[0].text, huge);
    }

    #[test]
    fn test_chars_not_bytes() {
        let input = records("api", &["ééé", "üüü"]);
        assert_eq!(split(&input, 6, 10).len(), 1);
    }

    #[test]
    fn test_zero_limits_clamped() {
        let input = records("api", &["a", "b"]);
        assert_eq!(split(&input, 0, 0).len(), 2);
        assert!(split(&[], 10, 10).is_empty());
    }

    #[test]
    fn test_span() {
        let input = records("api", &["a", "b", "c"]);
        let chunks = split(&input, 100, 100);
        assert_eq!(chunks[0].span, TimeWindow::new(at(0), at(2)));
    }
}
