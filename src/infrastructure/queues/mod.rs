//! Queue implementations - Infrastructure adapters for the delete-job queue port

mod memory_queue;
mod sqlite_queue;

pub use memory_queue::InMemoryDeleteJobQueue;
pub use sqlite_queue::SqliteDeleteJobQueue;

use chrono::Duration;
use rand::Rng;

/// Deliveries a job gets before it is parked as dead.
pub const DEFAULT_MAX_JOB_ATTEMPTS: u32 = 5;

/// Exponential backoff with jitter for failed job attempts, capped at five
/// minutes. Jitter keeps a burst of failures from retrying in lockstep.
pub(crate) fn retry_backoff(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(9);
    let base_ms = 500u64 << exponent;
    let capped_ms = base_ms.min(300_000);
    let jitter_ms = rand::thread_rng().gen_range(0..250);
    Duration::milliseconds((capped_ms + jitter_ms) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let first = retry_backoff(1);
        assert!(first >= Duration::milliseconds(500));
        assert!(first < Duration::milliseconds(800));

        let tenth = retry_backoff(10);
        assert!(tenth <= Duration::milliseconds(300_250));

        let huge = retry_backoff(u32::MAX);
        assert!(huge <= Duration::milliseconds(300_250));
    }
}
