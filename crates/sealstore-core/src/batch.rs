//! Paginated batch processing
//!
//! A [`BatchWorkProvider`] hands out pages of work until it returns an empty
//! page; every entry of a page goes to a [`BatchWorker`] on the blocking
//! thread pool, with at most `thread_count` entries in flight. Failed entries
//! are counted and reported, they never stop the batch.

use crate::error::{EncryptionError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Supplies the entries of a batch page by page
pub trait BatchWorkProvider<T>: Send {
    /// Estimated number of entries, for progress reporting
    fn total_estimated_work(&mut self) -> Result<u64>;

    /// Next page of entries; an empty page ends the batch
    fn next_page(&mut self) -> Result<Vec<T>>;
}

/// Processes single batch entries
pub trait BatchWorker<T>: Send + Sync {
    /// Identifier of an entry used in logs and error reports
    fn identifier(&self, entry: &T) -> String;

    /// Process one entry, typically in its own transaction
    fn process(&self, entry: &T) -> Result<()>;
}

/// Outcome of a batch run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Name of the process
    pub process_name: String,
    /// Estimated number of entries when the batch started
    pub total_estimated: u64,
    /// Entries handed to the worker
    pub processed: u64,
    /// Entries processed without error
    pub succeeded: u64,
    /// Entries that failed
    pub errors: u64,
    /// Message of the most recent failure
    pub last_error: Option<String>,
    /// Identifier of the entry of the most recent failure
    pub last_error_entry: Option<String>,
}

impl BatchReport {
    fn record_error(&mut self, entry: String, error: String) {
        warn!(process = %self.process_name, entry = %entry, error = %error, "Batch entry failed");
        self.errors += 1;
        self.last_error = Some(error);
        self.last_error_entry = Some(entry);
    }

    /// The report, or [`EncryptionError::BatchFailed`] if any entry failed
    pub fn into_result(self) -> Result<Self> {
        if self.errors == 0 {
            return Ok(self);
        }
        Err(EncryptionError::BatchFailed {
            process: self.process_name,
            errors: self.errors,
            last_error: self.last_error.unwrap_or_default(),
            last_entry: self.last_error_entry.unwrap_or_default(),
        })
    }
}

/// Runs batches with bounded concurrency
#[derive(Clone, Debug)]
pub struct BatchProcessor {
    process_name: String,
    thread_count: usize,
    log_interval: u64,
}

impl BatchProcessor {
    /// Processor running up to `thread_count` entries at a time
    pub fn new(process_name: impl Into<String>, thread_count: usize) -> Self {
        Self {
            process_name: process_name.into(),
            thread_count: thread_count.max(1),
            log_interval: 1000,
        }
    }

    /// Log progress every `log_interval` entries; 0 disables progress logs
    pub fn with_log_interval(mut self, log_interval: u64) -> Self {
        self.log_interval = log_interval;
        self
    }

    /// Run the batch to completion
    ///
    /// Only failures of the provider abort the batch; entry failures are
    /// collected in the returned report.
    pub async fn process<T, P, W>(&self, provider: P, worker: Arc<W>) -> Result<BatchReport>
    where
        T: Send + 'static,
        P: BatchWorkProvider<T> + 'static,
        W: BatchWorker<T> + 'static,
    {
        let (mut provider, total) = blocking(move || {
            let mut provider = provider;
            let total = provider.total_estimated_work();
            (provider, total)
        })
        .await?;

        let mut report = BatchReport {
            process_name: self.process_name.clone(),
            total_estimated: total?,
            ..BatchReport::default()
        };
        info!(
            process = %self.process_name,
            total = report.total_estimated,
            threads = self.thread_count,
            "Starting batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.thread_count));
        loop {
            let (returned, page) = blocking(move || {
                let page = provider.next_page();
                (provider, page)
            })
            .await?;
            provider = returned;

            let page = page?;
            if page.is_empty() {
                break;
            }

            let mut tasks = JoinSet::new();
            for entry in page {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| EncryptionError::IllegalState(e.to_string()))?;
                let worker = worker.clone();
                tasks.spawn_blocking(move || {
                    let _permit = permit;
                    let identifier = worker.identifier(&entry);
                    (identifier, worker.process(&entry))
                });
            }

            while let Some(joined) = tasks.join_next().await {
                report.processed += 1;
                match joined {
                    Ok((_, Ok(()))) => report.succeeded += 1,
                    Ok((identifier, Err(e))) => report.record_error(identifier, e.to_string()),
                    Err(e) => report.record_error("<unknown>".to_string(), e.to_string()),
                }

                if self.log_interval > 0 && report.processed % self.log_interval == 0 {
                    info!(
                        process = %self.process_name,
                        processed = report.processed,
                        total = report.total_estimated,
                        errors = report.errors,
                        "Batch progress"
                    );
                }
            }
        }

        info!(
            process = %self.process_name,
            processed = report.processed,
            errors = report.errors,
            "Completed batch"
        );
        Ok(report)
    }
}

async fn blocking<F, R>(work: F) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EncryptionError::IllegalState(format!("batch task failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Pages {
        pages: Vec<Vec<u32>>,
    }

    impl BatchWorkProvider<u32> for Pages {
        fn total_estimated_work(&mut self) -> Result<u64> {
            Ok(self.pages.iter().map(|p| p.len() as u64).sum())
        }

        fn next_page(&mut self) -> Result<Vec<u32>> {
            if self.pages.is_empty() {
                return Ok(Vec::new());
            }
            Ok(self.pages.remove(0))
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl BatchWorker<u32> for Recorder {
        fn identifier(&self, entry: &u32) -> String {
            format!("entry-{entry}")
        }

        fn process(&self, entry: &u32) -> Result<()> {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.seen.fetch_add(1, Ordering::SeqCst);

            if entry % 5 == 0 {
                return Err(EncryptionError::BatchItem {
                    entry: entry.to_string(),
                    message: "divisible by five".to_string(),
                });
            }
            Ok(())
        }
    }

    fn pages(count: u32, page_size: u32) -> Pages {
        let entries: Vec<u32> = (1..=count).collect();
        Pages {
            pages: entries.chunks(page_size as usize).map(<[u32]>::to_vec).collect(),
        }
    }

    #[tokio::test]
    async fn test_processes_every_entry() {
        let worker = Arc::new(Recorder::default());
        let report = BatchProcessor::new("test", 3)
            .process(pages(23, 4), worker.clone())
            .await
            .unwrap();

        assert_eq!(worker.seen.load(Ordering::SeqCst), 23);
        assert_eq!(report.total_estimated, 23);
        assert_eq!(report.processed, 23);
        assert_eq!(report.errors, 4);
        assert_eq!(report.succeeded, 19);
        assert!(report.last_error_entry.unwrap().starts_with("entry-"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let worker = Arc::new(Recorder::default());
        BatchProcessor::new("bounded", 2)
            .process(pages(12, 12), worker.clone())
            .await
            .unwrap();
        assert!(worker.max_running.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report = BatchProcessor::new("empty", 1)
            .process(Pages { pages: Vec::new() }, Arc::new(Recorder::default()))
            .await
            .unwrap();
        assert_eq!(report.processed, 0);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_failed_report_becomes_error() {
        let report = BatchReport {
            process_name: "demo".to_string(),
            processed: 3,
            succeeded: 2,
            errors: 1,
            last_error: Some("boom".to_string()),
            last_error_entry: Some("entry-2".to_string()),
            ..BatchReport::default()
        };
        match report.into_result() {
            Err(EncryptionError::BatchFailed {
                errors,
                last_error,
                last_entry,
                ..
            }) => {
                assert_eq!(errors, 1);
                assert_eq!(last_error, "boom");
                assert_eq!(last_entry, "entry-2");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    struct FailingProvider;

    impl BatchWorkProvider<u32> for FailingProvider {
        fn total_estimated_work(&mut self) -> Result<u64> {
            Ok(1)
        }

        fn next_page(&mut self) -> Result<Vec<u32>> {
            Err(EncryptionError::IllegalState("database gone".to_string()))
        }
    }

    #[tokio::test]
    async fn test_provider_failure_aborts() {
        let result = BatchProcessor::new("failing", 1)
            .process(FailingProvider, Arc::new(Recorder::default()))
            .await;
        assert!(matches!(result, Err(EncryptionError::IllegalState(_))));
    }
}
