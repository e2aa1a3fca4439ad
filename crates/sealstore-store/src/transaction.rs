//! Transaction boundary for durable storage operations

use crate::{Result, StoreError};
use std::time::Duration;
use tracing::{debug, warn};

/// Options for one unit of work
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxnOptions {
    /// The unit of work only reads
    pub read_only: bool,
}

impl TxnOptions {
    /// Read-write unit of work
    pub fn read_write() -> Self {
        Self { read_only: false }
    }

    /// Read-only unit of work
    pub fn read_only() -> Self {
        Self { read_only: true }
    }
}

/// Runs units of work transactionally, retrying transient conflicts
pub trait TransactionBoundary: Send + Sync {
    /// Execute `work` inside a transaction
    fn execute(&self, options: TxnOptions, work: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}

/// Run `work` inside `boundary` and return its value
pub fn in_transaction<T, F>(boundary: &dyn TransactionBoundary, options: TxnOptions, mut work: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut output = None;
    boundary.execute(options, &mut || {
        output = Some(work()?);
        Ok(())
    })?;
    output.ok_or_else(|| StoreError::IllegalState("transaction completed without a result".to_string()))
}

/// Transaction boundary that retries units of work failing with a retryable error
#[derive(Clone, Debug)]
pub struct RetryingTransactionHelper {
    max_retries: u32,
    backoff: Duration,
}

impl Default for RetryingTransactionHelper {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryingTransactionHelper {
    /// Create a helper with the default retry policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of retries after the first attempt
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay between attempts; grows linearly per attempt
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

impl TransactionBoundary for RetryingTransactionHelper {
    fn execute(&self, options: TxnOptions, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let mut attempt = 0;
        loop {
            match work() {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    debug!(
                        attempt,
                        read_only = options.read_only,
                        error = %e,
                        "Retrying transaction after transient failure"
                    );
                    std::thread::sleep(self.backoff * attempt);
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(attempts = attempt + 1, error = %e, "Transaction retries exhausted");
                    }
                    return Err(e);
                }
                Ok(()) => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper() -> RetryingTransactionHelper {
        RetryingTransactionHelper::new().with_backoff(Duration::from_millis(1))
    }

    #[test]
    fn test_returns_value() {
        let value = in_transaction(&helper(), TxnOptions::read_only(), || Ok(41 + 1)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_retries_conflicts() {
        let mut attempts = 0;
        let value = in_transaction(&helper(), TxnOptions::read_write(), || {
            attempts += 1;
            if attempts < 3 {
                Err(StoreError::Conflict("busy".to_string()))
            } else {
                Ok(attempts)
            }
        })
        .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let mut attempts = 0;
        let result: Result<()> = in_transaction(&helper().with_max_retries(2), TxnOptions::default(), || {
            attempts += 1;
            Err(StoreError::Conflict("busy".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_does_not_retry_permanent_errors() {
        let mut attempts = 0;
        let result: Result<()> = in_transaction(&helper(), TxnOptions::default(), || {
            attempts += 1;
            Err(StoreError::NotFound("x".to_string()))
        });
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(attempts, 1);
    }
}
