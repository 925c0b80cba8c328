//! Retry backoff for failed builds: 5 s base, doubled per attempt, capped at
//! ten minutes, with up to a second of uniform jitter to spread herd wakeups.

use std::time::Duration;

use rand::Rng;

pub const BACKOFF_BASE: Duration = Duration::from_secs(5);
pub const BACKOFF_CAP: Duration = Duration::from_secs(600);
pub const BACKOFF_JITTER: Duration = Duration::from_secs(1);

/// Backoff before retry number `attempt` (1-based: the first failure passes
/// attempt 1 and waits about five seconds).
pub fn backoff(attempt: i32) -> Duration {
    let exponent = u32::try_from(attempt.max(1) - 1).unwrap_or(0).min(20);
    let scaled = BACKOFF_BASE
        .saturating_mul(1_u32.checked_shl(exponent).unwrap_or(u32::MAX))
        .min(BACKOFF_CAP);
    let jitter = rand::thread_rng().gen_range(Duration::ZERO..BACKOFF_JITTER);
    scaled + jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_about_five_seconds() {
        for _ in 0..32 {
            let delay = backoff(1);
            assert!(delay >= Duration::from_secs(5));
            assert!(delay < Duration::from_secs(6));
        }
    }

    #[test]
    fn doubles_per_attempt() {
        let second = backoff(2);
        assert!(second >= Duration::from_secs(10) && second < Duration::from_secs(11));
        let third = backoff(3);
        assert!(third >= Duration::from_secs(20) && third < Duration::from_secs(21));
    }

    #[test]
    fn caps_at_ten_minutes_plus_jitter() {
        for attempt in [10, 50, i32::MAX] {
            let delay = backoff(attempt);
            assert!(delay >= Duration::from_secs(600));
            assert!(delay < Duration::from_secs(601));
        }
    }

    #[test]
    fn nonpositive_attempts_behave_like_the_first() {
        assert!(backoff(0) < Duration::from_secs(6));
        assert!(backoff(-3) < Duration::from_secs(6));
    }
}
