use anyhow::Result;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Outcome of one attempt inside [`retry_with_backoff`].
pub enum Attempt<T, E> {
    Done(T),
    /// Transient; sleep and try again.
    Retry(E),
    /// Permanent; stop immediately.
    Fail(E),
}

pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last: E,
}

pub enum RetryError<E> {
    Exhausted(RetryExhausted<E>),
    Failed(E),
}

/// Fixed-backoff retry. `max_attempts == 0` retries forever.
pub fn retry_with_backoff<T, E, F>(
    max_attempts: u32,
    backoff: Duration,
    mut op: F,
) -> std::result::Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Attempt<T, E>,
{
    let mut attempt = 0u32;
    loop {
        attempt = attempt.saturating_add(1);
        match op(attempt) {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(err) => return Err(RetryError::Failed(err)),
            Attempt::Retry(err) => {
                if max_attempts != 0 && attempt >= max_attempts {
                    return Err(RetryError::Exhausted(RetryExhausted {
                        attempts: attempt,
                        last: err,
                    }));
                }
                thread::sleep(backoff);
            }
        }
    }
}
