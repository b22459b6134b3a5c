use std::fmt::Display;
use std::num::NonZeroU32;
use std::time::Duration;

/// How many times to try an operation, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: NonZeroU32,
    delay: Duration,
}

impl Default for RetryPolicy {
    /// Three attempts in total (the first one plus two retries), back-to-back.
    fn default() -> Self {
        Self::new(NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN), Duration::ZERO)
    }
}

impl RetryPolicy {
    pub const fn new(attempts: NonZeroU32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// The last error from an operation that was given up on, and how many times it was tried.
#[derive(Debug)]
pub struct GaveUp<E> {
    pub error: E,
    pub attempts: u32,
}

/// Runs `op` until it succeeds, fails with an error that `is_retryable` rejects, or the policy's attempt budget runs
/// out.
///
/// `op` is passed the (1-based) attempt number. Every failure is logged against `label` so that the log shows which
/// attempt of what failed and why.
pub fn run<T, E, R, F>(policy: &RetryPolicy, label: &str, mut is_retryable: R, mut op: F) -> Result<T, GaveUp<E>>
where
    E: Display,
    R: FnMut(&E) -> bool,
    F: FnMut(u32) -> Result<T, E>,
{
    let max = policy.attempts();
    let mut attempt = 1;

    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(error) => {
                let retryable = is_retryable(&error);
                if !retryable || attempt >= max {
                    if retryable {
                        log::error!("{label}: attempt {attempt}/{max} failed, giving up: {error}");
                    } else {
                        log::error!("{label}: attempt {attempt}/{max} failed and cannot be retried: {error}");
                    }
                    return Err(GaveUp { error, attempts: attempt });
                }

                log::warn!("{label}: attempt {attempt}/{max} failed, retrying: {error}");
                if !policy.delay.is_zero() {
                    std::thread::sleep(policy.delay);
                }
                attempt += 1;
            },
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn policy(n: u32) -> RetryPolicy {
        RetryPolicy::new(NonZeroU32::new(n).unwrap(), Duration::ZERO)
    }

    #[test]
    fn default_is_three_immediate_attempts() {
        let p = RetryPolicy::default();
        assert_eq!(p.attempts(), 3);
        assert_eq!(p.delay(), Duration::ZERO);
    }

    #[test]
    fn succeeds_on_last_attempt() {
        let mut calls = Vec::new();
        let res = run(&policy(3), "test", |_: &String| true, |n| {
            calls.push(n);
            if n < 3 { Err(format!("fail {n}")) } else { Ok("done") }
        });

        assert_eq!(res.unwrap(), "done");
        assert_eq!(calls, [1, 2, 3]);
    }

    #[test]
    fn stops_after_budget() {
        let mut calls = 0;
        let err = run(&policy(3), "test", |_: &String| true, |n| -> Result<(), _> {
            calls += 1;
            Err(format!("fail {n}"))
        })
        .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.error, "fail 3");
    }

    #[test]
    fn non_retryable_stops_immediately() {
        let mut calls = 0;
        let err = run(&policy(3), "test", |e: &String| e != "fatal", |_| -> Result<(), _> {
            calls += 1;
            Err("fatal".to_string())
        })
        .unwrap_err();

        assert_eq!(calls, 1);
        assert_eq!(err.attempts, 1);
    }
}
