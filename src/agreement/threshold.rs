use std::collections::BTreeMap;

use super::message::Value;
use crate::common::error::{ConfigError, ConfigResult};

/// Quorum sizes for a run of `n` participants tolerating `f` Byzantine ones.
/// Construction fails unless `n >= 3f + 1`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Thresholds {
    n: usize,
    f: usize,
}

impl Thresholds {
    pub fn new(n: usize, f: usize) -> ConfigResult<Self> {
        if n == 0 {
            return Err(ConfigError::TooFewNodes);
        }
        if 3 * f >= n {
            return Err(ConfigError::UnsafeFaultBound { n, f });
        }
        Ok(Thresholds { n, f })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn f(&self) -> usize {
        self.f
    }

    /// Smallest count strictly above `(n + f) / 2`.
    pub fn echo(&self) -> usize {
        (self.n + self.f) / 2 + 1
    }

    /// Simple majority over `n` Decide messages.
    pub fn decide(&self) -> usize {
        (self.n - 1) / 2 + 1
    }

    pub fn echo_reached(&self, count: usize) -> bool {
        count >= self.echo()
    }

    pub fn decide_reached(&self, count: usize) -> bool {
        count >= self.decide()
    }
}

/// Per-value counter with a deterministic plurality.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Tally {
    counts: BTreeMap<Value, usize>,
}

impl Tally {
    pub fn new() -> Self {
        Tally::default()
    }

    /// Adds one and returns the new count for `value`.
    pub fn add(&mut self, value: Value) -> usize {
        let count = self.counts.entry(value).or_insert(0);
        *count += 1;
        *count
    }

    pub fn count(&self, value: Value) -> usize {
        self.counts.get(&value).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Most frequent value. Ties go to the lowest value.
    pub fn plurality(&self) -> Option<(Value, usize)> {
        let mut best: Option<(Value, usize)> = None;
        // BTreeMap iterates in ascending value order, so only a strictly
        // larger count can displace the current best.
        for (&value, &count) in &self.counts {
            if count == 0 {
                continue;
            }
            match best {
                Some((_, best_count)) if count <= best_count => {}
                _ => best = Some((value, count)),
            }
        }
        best
    }
}

impl FromIterator<Value> for Tally {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut tally = Tally::new();
        for value in iter {
            tally.add(value);
        }
        tally
    }
}
