//! Per-session clarifying-question budget.

use std::sync::Mutex;

/// Hard cap on clarifying questions shared by every run in a session.
///
/// `used <= max` holds at all times. The only mutation is [`reserve`],
/// whose critical section is a compare-and-increment that never awaits.
///
/// [`reserve`]: QuestionBudget::reserve
#[derive(Debug)]
pub struct QuestionBudget {
    max: u32,
    used: Mutex<u32>,
}

impl QuestionBudget {
    pub fn new(max: u32) -> Self {
        Self::with_used(max, 0)
    }

    /// Budget with questions already spent elsewhere in the session.
    /// `used` is clamped to `max`.
    pub fn with_used(max: u32, used: u32) -> Self {
        Self {
            max,
            used: Mutex::new(used.min(max)),
        }
    }

    /// Takes one question from the budget. Returns false, leaving the count
    /// untouched, when the budget is spent.
    pub fn reserve(&self) -> bool {
        if self.max == 0 {
            return false;
        }
        let mut used = self.used.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *used >= self.max {
            return false;
        }
        *used += 1;
        true
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn used(&self) -> u32 {
        *self.used.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_zero_budget_never_reserves() {
        let budget = QuestionBudget::new(0);
        assert!(!budget.reserve());
        assert_eq!(budget.used(), 0);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_reserve_until_exhausted() {
        let budget = QuestionBudget::new(2);
        assert!(budget.reserve());
        assert!(budget.reserve());
        assert!(!budget.reserve());
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn test_with_used_clamps() {
        let budget = QuestionBudget::with_used(3, 5);
        assert_eq!(budget.used(), 3);
        assert!(!budget.reserve());

        let budget = QuestionBudget::with_used(3, 1);
        assert_eq!(budget.remaining(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_respect_cap() {
        let budget = Arc::new(QuestionBudget::new(7));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let budget = Arc::clone(&budget);
            handles.push(tokio::spawn(async move {
                tokio::task::yield_now().await;
                budget.reserve()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.expect("task should not panic") {
                granted += 1;
            }
        }

        assert_eq!(granted, 7);
        assert_eq!(budget.used(), 7);
    }
}
