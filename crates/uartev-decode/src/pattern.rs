use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Marker made of `count` repetitions of `byte`, e.g. `+++`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub byte: u8,
    pub count: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self { byte: b'+', count: 3 }
    }
}

impl PatternConfig {
    pub fn new(byte: u8, count: usize) -> Self {
        Self { byte, count }
    }
}

/// Finds markers in received chunks.
///
/// A marker is a run of exactly `count` marker bytes. Longer or shorter runs
/// are ordinary data. The end of a chunk is treated as an idle gap on the
/// line, so a run never continues into the next chunk.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    cfg: PatternConfig,
}

impl PatternDetector {
    pub fn new(cfg: PatternConfig) -> Self {
        Self { cfg }
    }

    /// Returns the byte range of every marker in `chunk`, in order.
    pub fn scan(&self, chunk: &[u8]) -> Vec<Range<usize>> {
        let mut found = Vec::new();
        if self.cfg.count == 0 {
            return found;
        }

        let mut i = 0;
        while i < chunk.len() {
            if chunk[i] != self.cfg.byte {
                i += 1;
                continue;
            }
            let start = i;
            while i < chunk.len() && chunk[i] == self.cfg.byte {
                i += 1;
            }
            if i - start == self.cfg.count {
                found.push(start..i);
            }
        }
        found
    }
}
