//! Per-viewer frame rate accounting over a progress stream.
//!
//! Viewers print their label once per rendered frame. A `ThroughputMeter`
//! counts those characters, turns each sampling window into a frames/second
//! figure per label and summarises the history at the end of a run.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::config::is_progress_label;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Number of non-zero samples the figures were computed from.
    pub samples: usize,
}

/// Summarise the non-zero entries of `rates`. `None` when there are none.
pub fn rate_stats(rates: &[f64]) -> Option<RateStats> {
    let mut values: Vec<f64> = rates.iter().copied().filter(|r| *r > 0.0).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    let median = if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    };
    Some(RateStats {
        min: values[0],
        max: values[n - 1],
        mean: values.iter().sum::<f64>() / n as f64,
        median,
        samples: n,
    })
}

#[derive(Debug, Default)]
struct LabelCounter {
    window: u64,
    total: u64,
    history: Vec<f64>,
}

#[derive(Debug)]
pub struct ThroughputMeter {
    counters: BTreeMap<char, LabelCounter>,
}

impl ThroughputMeter {
    /// Track only the given labels; any other character is ignored.
    /// Labels must be printable ASCII, one stdout byte each.
    pub fn new(labels: impl IntoIterator<Item = char>) -> Result<Self> {
        let mut counters = BTreeMap::new();
        for label in labels {
            if !is_progress_label(label) {
                return Err(anyhow!(
                    "label {:?} is not a printable ASCII character",
                    label
                ));
            }
            counters.insert(label, LabelCounter::default());
        }
        Ok(Self { counters })
    }

    pub fn labels(&self) -> impl Iterator<Item = char> + '_ {
        self.counters.keys().copied()
    }

    /// Returns true if `c` is a tracked label.
    pub fn record(&mut self, c: char) -> bool {
        match self.counters.get_mut(&c) {
            Some(counter) => {
                counter.window += 1;
                counter.total += 1;
                true
            }
            None => false,
        }
    }

    /// Count label bytes in raw output. Bytes of multi-byte UTF-8 sequences
    /// are all >= 0x80 and never match a label.
    pub fn record_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes.iter().filter(|b| b.is_ascii()) {
            self.record(char::from(b));
        }
    }

    /// Close the current window and return the per-label rate for it.
    pub fn sample(&mut self, elapsed: Duration) -> Vec<(char, f64)> {
        let secs = elapsed.as_secs_f64();
        self.counters
            .iter_mut()
            .map(|(&label, counter)| {
                let rate = if secs > 0.0 {
                    counter.window as f64 / secs
                } else {
                    0.0
                };
                counter.history.push(rate);
                counter.window = 0;
                (label, rate)
            })
            .collect()
    }

    pub fn total(&self, label: char) -> u64 {
        self.counters.get(&label).map_or(0, |c| c.total)
    }

    pub fn history(&self, label: char) -> &[f64] {
        self.counters
            .get(&label)
            .map_or(&[][..], |c| c.history.as_slice())
    }

    pub fn summary(&self) -> BTreeMap<char, Option<RateStats>> {
        self.counters
            .iter()
            .map(|(&label, counter)| (label, rate_stats(&counter.history)))
            .collect()
    }
}
