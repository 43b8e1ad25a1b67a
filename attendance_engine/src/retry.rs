// Bounded retry with backoff for transient store failures.

use std::time::Duration;

/// Retry policy: fixed or exponential backoff, bounded attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
    exponential: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            exponential: false,
        }
    }

    pub fn with_exponential_backoff(mut self) -> Self {
        self.exponential = true;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `f` until it succeeds or attempts run out, sleeping between
    /// tries. The last error is returned when every attempt fails.
    pub fn run<F, T, E>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }

                    let delay = if self.exponential {
                        self.backoff * 2_u32.pow(attempt - 1)
                    } else {
                        self.backoff
                    };
                    std::thread::sleep(delay);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50))
    }
}
