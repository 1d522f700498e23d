//! Queue priority distribution
//!
//! Pairs are spread over the three priority classes in modulo-5 buckets:
//! remainders 0-1 are LOW, 2-3 are NORMAL and 4 is HIGH (40/40/20). The
//! sparse HIGH class lets the low and normal classes dominate the population,
//! which exposes starvation or unfairness in a strict-priority scheduler.

use std::fmt;

use serde::Serialize;

use crate::runtime::Priority;

/// Priority class of the queues of pair `index`
#[inline]
pub fn priority_of(index: usize) -> Priority {
    match index % 5 {
        0 | 1 => Priority::Low,
        2 | 3 => Priority::Normal,
        _ => Priority::High,
    }
}

/// Number of pairs per priority class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriorityMix {
    pub low: usize,
    pub normal: usize,
    pub high: usize,
}

impl PriorityMix {
    /// Distribution over pairs `[0, pair_count)`
    pub fn for_pairs(pair_count: usize) -> Self {
        (0..pair_count).map(priority_of).fold(Self::default(), |mut mix, p| {
            mix.add(p);
            mix
        })
    }

    pub fn add(&mut self, priority: Priority) {
        match priority {
            Priority::Low => self.low += 1,
            Priority::Normal => self.normal += 1,
            Priority::High => self.high += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.low + self.normal + self.high
    }
}

impl fmt::Display for PriorityMix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LOW={} NORMAL={} HIGH={}",
            self.low, self.normal, self.high
        )
    }
}
