//! Bounded exponential backoff for a locked database.

use std::time::Duration;

/// How [`SqliteStore`](crate::SqliteStore) waits out `SQLITE_BUSY`.
///
/// The connection's own busy timeout is zero, so this is the only waiting
/// that happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub max_attempts: u32,
  pub base_delay:   Duration,
  pub max_delay:    Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 6,
      base_delay:   Duration::from_millis(10),
      max_delay:    Duration::from_millis(500),
    }
  }
}

impl RetryPolicy {
  /// Never retry.
  pub fn none() -> Self { Self { max_attempts: 1, ..Self::default() } }

  /// Delay after the `attempt`-th failure (1-based): the base delay doubled
  /// per prior failure, capped at `max_delay`.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    self
      .base_delay
      .checked_mul(factor)
      .map_or(self.max_delay, |d| d.min(self.max_delay))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn delays_double_up_to_the_cap() {
    let policy = RetryPolicy::default();
    let delays: Vec<u64> = (1..=7).map(|a| policy.delay_for(a).as_millis() as u64).collect();
    assert_eq!(delays, [10, 20, 40, 80, 160, 320, 500]);
  }

  #[test]
  fn huge_attempt_counts_saturate() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_for(64), policy.max_delay);
    assert_eq!(policy.delay_for(u32::MAX), policy.max_delay);
  }
}
