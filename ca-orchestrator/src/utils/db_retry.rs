//! Lock-tolerant database writes
//!
//! Status rounds and media object batches can contend with concurrent
//! completion callbacks. Those writes go through [`retry_on_lock`], which
//! retries SQLite lock errors with a doubling pause.

use ca_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};

/// Doubling pause between attempts, from 10ms up to 1s
#[derive(Debug)]
struct LockBackoff {
    next: Duration,
    deadline: Instant,
}

impl LockBackoff {
    const FIRST: Duration = Duration::from_millis(10);
    const CEILING: Duration = Duration::from_millis(1000);

    fn new(max_wait: Duration) -> Self {
        Self {
            next: Self::FIRST,
            deadline: Instant::now() + max_wait,
        }
    }

    /// Pause before the next attempt, or `None` once the deadline has passed
    fn pause(&mut self) -> Option<Duration> {
        if Instant::now() >= self.deadline {
            return None;
        }
        let pause = self.next;
        self.next = (self.next * 2).min(Self::CEILING);
        Some(pause)
    }
}

fn is_lock_error(err: &Error) -> bool {
    let Error::Database(db_err) = err else {
        return false;
    };
    let text = db_err.to_string();
    text.contains("database is locked") || text.contains("database table is locked")
}

/// Run `write` until it succeeds, fails with a non-lock error, or
/// `max_wait_ms` (`database_max_lock_wait_ms`) has passed.
///
/// `what` names the write in log lines.
pub async fn retry_on_lock<F, Fut, T>(what: &str, max_wait_ms: u64, mut write: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut backoff = LockBackoff::new(Duration::from_millis(max_wait_ms));
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match write().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(
                        write = what,
                        attempts,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Write went through after lock contention"
                    );
                }
                return Ok(value);
            }
            Err(err) if is_lock_error(&err) => err,
            Err(err) => return Err(err),
        };

        let Some(pause) = backoff.pause() else {
            tracing::error!(write = what, attempts, max_wait_ms, error = %err, "Giving up on locked database");
            return Err(Error::Internal(format!(
                "Database locked: {} failed after {} attempts in {} ms",
                what,
                attempts,
                started.elapsed().as_millis()
            )));
        };
        tracing::warn!(write = what, attempts, pause_ms = pause.as_millis() as u64, "Database locked, retrying");
        tokio::time::sleep(pause).await;
    }
}
