//! Per-unit execution deadline

use std::time::{Duration, Instant};

use super::result::{Error, Result};

/// Time budget for one unit, checked between statements
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    /// Start the clock; `None` means no limit
    pub fn start(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn unlimited() -> Self {
        Self::start(None)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fail with `ExecutionTimeout` once the budget is spent
    pub fn check(&self) -> Result<()> {
        match self.limit {
            Some(limit) => {
                let elapsed = self.elapsed();
                if elapsed > limit {
                    Err(Error::ExecutionTimeout { elapsed, limit })
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_expires() {
        assert!(Deadline::unlimited().check().is_ok());
    }

    #[test]
    fn test_zero_limit_expires() {
        let deadline = Deadline::start(Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(2));
        let err = deadline.check().unwrap_err();
        assert_eq!(err.kind(), "ExecutionTimeout");
    }
}
