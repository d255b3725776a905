use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::TextEncoding;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp_ms: u64,
    pub direction: Direction,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Payload read for a data event.
    Rx,
    /// Bytes echoed back to the line.
    Tx,
    /// Bytes read ahead of a marker, marker included.
    Pattern,
}

impl Direction {
    fn prefix(&self) -> &'static str {
        match self {
            Direction::Rx => "RX: ",
            Direction::Tx => "TX: ",
            Direction::Pattern => "PAT: ",
        }
    }
}

/// Bounded record of the traffic seen by the dispatcher.
pub struct TrafficLog {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
}

impl TrafficLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries,
        }
    }

    pub fn push(&mut self, direction: Direction, data: Vec<u8>) {
        if self.max_entries == 0 {
            return;
        }
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        if self.entries.len() == self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp_ms,
            direction,
            data,
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_text(&self, show_timestamp: bool, show_hex: bool) -> String {
        self.to_text_with_encoding(show_timestamp, show_hex, TextEncoding::Auto)
    }

    pub fn to_text_with_encoding(&self, show_timestamp: bool, show_hex: bool, encoding: TextEncoding) -> String {
        let mut result = String::new();
        for entry in &self.entries {
            let body = if show_hex {
                entry
                    .data
                    .iter()
                    .map(|byte| format!("{byte:02X}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            } else {
                let text = encoding.decode(&entry.data);
                if text.trim().is_empty() {
                    continue;
                }
                text
            };

            if show_timestamp {
                result.push_str(&format_timestamp(entry.timestamp_ms));
            }
            result.push_str(entry.direction.prefix());
            result.push_str(body.trim_end_matches(['\r', '\n']));
            result.push('\n');
        }
        result
    }
}

/// `[HH:MM:SS.mmm] ` in UTC.
fn format_timestamp(timestamp_ms: u64) -> String {
    let millis = timestamp_ms % 1000;
    let secs = timestamp_ms / 1000;
    let hours = (secs / 3600) % 24;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;
    format!("[{hours:02}:{minutes:02}:{seconds:02}.{millis:03}] ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_entries_evicted() {
        let mut log = TrafficLog::new(2);
        log.push(Direction::Rx, b"one".to_vec());
        log.push(Direction::Tx, b"two".to_vec());
        log.push(Direction::Rx, b"three".to_vec());

        let data: Vec<_> = log.entries().map(|e| e.data.clone()).collect();
        assert_eq!(data, vec![b"two".to_vec(), b"three".to_vec()]);
    }

    #[test]
    fn test_text_rendering_skips_blank_payloads() {
        let mut log = TrafficLog::new(8);
        log.push(Direction::Rx, b"abc\n".to_vec());
        log.push(Direction::Tx, b"\r\n".to_vec());
        log.push(Direction::Pattern, b"x+++".to_vec());

        assert_eq!(log.to_text(false, false), "RX: abc\nPAT: x+++\n");
    }

    #[test]
    fn test_hex_rendering() {
        let mut log = TrafficLog::new(8);
        log.push(Direction::Tx, vec![0x01, 0xab]);
        assert_eq!(log.to_text(false, true), "TX: 01 AB\n");
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(format_timestamp(3_723_004), "[01:02:03.004] ");
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut log = TrafficLog::new(0);
        log.push(Direction::Rx, b"a".to_vec());
        assert!(log.is_empty());
    }
}
