//! Bounded, time-ordered sample history.
//!
//! The store itself is a plain ring buffer; concurrent access goes through
//! the [`SharedState`](crate::state::SharedState) lock that owns it.

use std::collections::VecDeque;

use serde::Serialize;
use thiserror::Error;

use crate::controller::Mode;

/// Twelve hours at one sample per second.
pub const DEFAULT_CAPACITY: usize = 43_200;

/// One simulated instant. Built once per tick and never modified.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub co2: f64,
    pub temperature: f64,
    pub relative_humidity: f64,
    pub pm25: f64,
    pub occupants: u32,
    pub fan: f64,
    pub valve: f64,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("sample at {next} is older than the newest stored sample at {newest}")]
    OutOfOrder { newest: f64, next: f64 },
    #[error("sample timestamp {0} is not finite")]
    NonFinite(f64),
}

#[derive(Debug)]
pub struct SampleStore {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SampleStore {
    /// A store holding at most `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
        }
    }

    /// Append `sample`, evicting the oldest entry when full.
    ///
    /// Timestamps must be finite and non-decreasing. A violation leaves the
    /// store untouched.
    pub fn append(&mut self, sample: Sample) -> Result<(), StoreError> {
        if !sample.timestamp.is_finite() {
            return Err(StoreError::NonFinite(sample.timestamp));
        }
        if let Some(newest) = self.samples.back() {
            if sample.timestamp < newest.timestamp {
                return Err(StoreError::OutOfOrder {
                    newest: newest.timestamp,
                    next: sample.timestamp,
                });
            }
        }
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        Ok(())
    }

    /// The most recent `n` samples, oldest first.
    pub fn tail(&self, n: usize) -> Vec<Sample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied().collect()
    }

    /// Samples no older than `secs` before the newest one, oldest first.
    pub fn window(&self, secs: f64) -> Vec<Sample> {
        let Some(newest) = self.samples.back() else {
            return Vec::new();
        };
        let cutoff = newest.timestamp - secs.max(0.0);
        let start = self.samples.partition_point(|s| s.timestamp < cutoff);
        self.samples.range(start..).copied().collect()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ===========================================================================
// Tests
// ===========================================================================
