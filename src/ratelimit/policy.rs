//! Fixed-window admission policy.

use super::counter::{CounterRecord, Limit};

/// Result of evaluating a post-increment record against a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the request that produced the record is admitted
    pub allowed: bool,
    /// Requests still admissible in the current window
    pub remaining: u64,
}

/// Pure allow/deny decision for fixed windows.
///
/// The limit is inclusive: the request that brings `count` to exactly
/// `max` is allowed, the next one is denied. The record passed in must be
/// the one observed right after its own increment, inside the same
/// critical section, otherwise two racing requests could both be admitted
/// as the last one.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowPolicy;

impl WindowPolicy {
    /// Evaluate a post-increment record.
    pub fn evaluate(record: &CounterRecord, limit: &Limit) -> Verdict {
        Verdict {
            allowed: record.count() <= limit.max(),
            remaining: limit.max().saturating_sub(record.count()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn record_with_count(count: u64) -> CounterRecord {
        let now = Instant::now();
        let mut record = CounterRecord::new(now, Duration::from_secs(60));
        for _ in 0..count {
            record.hit(now);
        }
        record
    }

    #[test]
    fn test_below_limit_is_allowed() {
        let limit = Limit::new(3, Duration::from_secs(60)).unwrap();
        let verdict = WindowPolicy::evaluate(&record_with_count(1), &limit);
        assert_eq!(verdict, Verdict { allowed: true, remaining: 2 });
    }

    #[test]
    fn test_limit_is_inclusive() {
        let limit = Limit::new(3, Duration::from_secs(60)).unwrap();
        let verdict = WindowPolicy::evaluate(&record_with_count(3), &limit);
        assert_eq!(verdict, Verdict { allowed: true, remaining: 0 });
    }

    #[test]
    fn test_over_limit_is_denied_with_zero_remaining() {
        let limit = Limit::new(3, Duration::from_secs(60)).unwrap();
        let verdict = WindowPolicy::evaluate(&record_with_count(5), &limit);
        assert_eq!(verdict, Verdict { allowed: false, remaining: 0 });
    }
}
