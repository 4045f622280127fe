//! Per-stage, per-run retry budget.
//!
//! Only full regenerations consume budget. Local patches never do, so cheap
//! fixes cannot starve the expensive retries.

use serde::{Deserialize, Serialize};

/// Attempts used vs. attempts allowed for one stage invocation.
///
/// Invariant: `used <= max`. Exhausted when `used == max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    used: u32,
    max: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self { used: 0, max }
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn remaining(&self) -> u32 {
        self.max - self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.used == self.max
    }

    /// Take one unit. Returns `false` (and leaves the budget untouched) when
    /// already exhausted.
    pub fn consume(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.used += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_budget_is_fresh() {
        let budget = RetryBudget::new(3);
        assert_eq!(budget.used(), 0);
        assert_eq!(budget.max(), 3);
        assert_eq!(budget.remaining(), 3);
        assert!(!budget.is_exhausted());
    }

    #[test]
    fn test_consume_until_exhausted() {
        let mut budget = RetryBudget::new(2);
        assert!(budget.consume());
        assert!(budget.consume());
        assert!(budget.is_exhausted());
        assert!(!budget.consume());
        assert_eq!(budget.used(), 2);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_zero_budget_starts_exhausted() {
        let mut budget = RetryBudget::new(0);
        assert!(budget.is_exhausted());
        assert!(!budget.consume());
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn test_used_never_exceeds_max() {
        let mut budget = RetryBudget::new(5);
        for _ in 0..20 {
            budget.consume();
            assert!(budget.used() <= budget.max());
        }
    }
}
