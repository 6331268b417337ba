//! Bounded polling of long-running operations.
//!
//! Polling runs as a future under `tokio::time::timeout`; hitting the bound
//! stops polling but never cancels the remote operation.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PipelineError;

/// Fixed interval and upper bound for polling an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(with = "crate::domain::duration")]
    pub interval: Duration,

    #[serde(with = "crate::domain::duration")]
    pub max_wait: Duration,
}

impl PollSettings {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }
}

/// How polling ended
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// The operation reached a terminal state
    Done(T),

    /// The bound elapsed first; `last` is the most recent snapshot, if any
    TimedOut { last: Option<T> },
}

/// Poll `fetch` every `settings.interval` until `is_done` holds or
/// `settings.max_wait` elapses.
///
/// A failed poll request is logged and polling continues; it does not
/// resubmit the operation.
pub async fn poll_until<T, F, Fut, D>(
    settings: &PollSettings,
    operation: &str,
    mut fetch: F,
    is_done: D,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
    D: Fn(&T) -> bool,
{
    let mut last: Option<T> = None;
    let mut polls = 0u32;

    let polling = async {
        loop {
            polls += 1;
            match fetch().await {
                Ok(snapshot) if is_done(&snapshot) => return snapshot,
                Ok(snapshot) => {
                    debug!(operation, polls, "Operation still running");
                    last = Some(snapshot);
                }
                Err(e) => {
                    warn!(operation, polls, error = %e, "Polling request failed");
                }
            }
            tokio::time::sleep(settings.interval).await;
        }
    };

    let result = tokio::time::timeout(settings.max_wait, polling).await;
    match result {
        Ok(done) => PollOutcome::Done(done),
        Err(_) => {
            warn!(
                operation,
                waited_ms = settings.max_wait.as_millis() as u64,
                "Stopped polling before the operation finished"
            );
            PollOutcome::TimedOut { last }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> PollSettings {
        PollSettings::new(Duration::from_millis(2), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_returns_when_done() {
        let counter = AtomicU32::new(0);
        let polls = &counter;

        let outcome = poll_until(
            &fast(),
            "operations/1",
            || async move { Ok::<u32, PipelineError>(polls.fetch_add(1, Ordering::SeqCst) + 1) },
            |n| *n >= 3,
        )
        .await;

        assert!(matches!(outcome, PollOutcome::Done(3)));
    }

    #[tokio::test]
    async fn test_times_out_with_last_snapshot() {
        let settings = PollSettings::new(Duration::from_millis(2), Duration::from_millis(20));

        let outcome = poll_until(
            &settings,
            "operations/2",
            || async { Ok::<&str, PipelineError>("running") },
            |_| false,
        )
        .await;

        match outcome {
            PollOutcome::TimedOut { last } => assert_eq!(last, Some("running")),
            PollOutcome::Done(_) => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn test_keeps_polling_after_request_errors() {
        let counter = AtomicU32::new(0);
        let polls = &counter;

        let outcome = poll_until(
            &fast(),
            "operations/3",
            || async move {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(PipelineError::ingestion("502 Bad Gateway"))
                } else {
                    Ok(true)
                }
            },
            |done| *done,
        )
        .await;

        assert!(matches!(outcome, PollOutcome::Done(true)));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
