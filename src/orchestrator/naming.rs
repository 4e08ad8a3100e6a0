use crate::model::Operator;
use std::sync::atomic::{AtomicU64, Ordering};

/// One monotonic counter per operator, used to name results `Union_1`, `Union_2`, ...
#[derive(Debug)]
pub struct NamingCounters {
    union: AtomicU64,
    intersection: AtomicU64,
    difference: AtomicU64,
}

impl Default for NamingCounters {
    fn default() -> Self {
        Self {
            union: AtomicU64::new(1),
            intersection: AtomicU64::new(1),
            difference: AtomicU64::new(1),
        }
    }
}

impl NamingCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, op: Operator) -> &AtomicU64 {
        match op {
            Operator::Union => &self.union,
            Operator::Intersection => &self.intersection,
            Operator::Difference => &self.difference,
        }
    }

    /// Value the next call to [`NamingCounters::next`] will hand out.
    pub fn peek(&self, op: Operator) -> u64 {
        self.slot(op).load(Ordering::SeqCst)
    }

    /// Read and increment in one step. Each value is returned once.
    pub fn next(&self, op: Operator) -> u64 {
        self.slot(op).fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_name(&self, op: Operator) -> String {
        format!("{}_{}", op.display_name(), self.next(op))
    }

    /// Make sure `used` is never handed out again. Counters only move forward.
    pub fn skip_past(&self, op: Operator, used: u64) {
        self.slot(op).fetch_max(used.saturating_add(1), Ordering::SeqCst);
    }
}
