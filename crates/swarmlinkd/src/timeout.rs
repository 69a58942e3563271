//! Deadline and cleanup wrapper for node operations
//!
//! [`guard`] races an operation against an optional deadline. Whenever the
//! operation fails (including a deadline that is configured to fail) the
//! cleanup future runs before the error is returned, so a half-opened handle
//! is always torn down. Losing the race only drops the operation's future;
//! work it already handed to the swarm or the DHT may still complete.

use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// What a deadline turns into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnTimeout {
    /// Return [`Error::Timeout`]
    Fail,
    /// Resolve with [`Raced::TimedOut`]
    Resolve,
}

/// Description of a guarded operation
#[derive(Debug, Clone)]
pub struct Watch {
    pub id: String,
    pub kind: &'static str,
    pub timeout: Option<Duration>,
    pub on_timeout: OnTimeout,
}

impl Watch {
    pub fn new(id: impl ToString, kind: &'static str, timeout: Option<Duration>) -> Self {
        Watch {
            id: id.to_string(),
            kind,
            timeout,
            on_timeout: OnTimeout::Fail,
        }
    }

    /// Resolve with a sentinel instead of failing when the deadline passes
    pub fn resolving(mut self) -> Self {
        self.on_timeout = OnTimeout::Resolve;
        self
    }

    fn message(&self) -> String {
        format!("{} took too long, it timed out - {}", self.id, self.kind)
    }

    fn error(&self) -> Error {
        Error::Timeout {
            id: self.id.clone(),
            kind: self.kind,
        }
    }
}

/// Outcome of a raced operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Raced<T> {
    Done(T),
    TimedOut(String),
}

impl<T> Raced<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Raced::TimedOut(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            Raced::Done(value) => Some(value),
            Raced::TimedOut(_) => None,
        }
    }
}

/// Race `op` against the watch's deadline, running `cleanup` on failure
pub async fn guard<'a, T, F>(
    watch: &Watch,
    op: F,
    cleanup: Option<BoxFuture<'a, ()>>,
) -> Result<Raced<T>>
where
    F: Future<Output = Result<T>>,
{
    let outcome = match watch.timeout {
        None => op.await.map(Raced::Done),
        Some(limit) => {
            tokio::select! {
                result = op => result.map(Raced::Done),
                _ = tokio::time::sleep(limit) => {
                    debug!("{}", watch.message());
                    match watch.on_timeout {
                        OnTimeout::Fail => Err(watch.error()),
                        OnTimeout::Resolve => Ok(Raced::TimedOut(watch.message())),
                    }
                }
            }
        }
    };

    match outcome {
        Ok(raced) => Ok(raced),
        Err(err) => {
            if let Some(cleanup) = cleanup {
                cleanup.await;
            }
            Err(err)
        }
    }
}

/// [`guard`] for operations whose deadline always fails
pub async fn bounded<'a, T, F>(
    watch: &Watch,
    op: F,
    cleanup: Option<BoxFuture<'a, ()>>,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let watch = Watch {
        on_timeout: OnTimeout::Fail,
        ..watch.clone()
    };
    match guard(&watch, op, cleanup).await? {
        Raced::Done(value) => Ok(value),
        Raced::TimedOut(_) => Err(watch.error()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn slow(value: u32, delay: Duration) -> Result<u32> {
        tokio::time::sleep(delay).await;
        Ok(value)
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Option<BoxFuture<'static, ()>> {
        let counter = counter.clone();
        Some(
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_deadline_awaits_directly() {
        let watch = Watch::new("op", "test", None);
        let result = guard(&watch, slow(7, Duration::from_secs(3600)), None)
            .await
            .unwrap();
        assert_eq!(result, Raced::Done(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finishes_before_deadline() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let watch = Watch::new("op", "test", Some(Duration::from_secs(5)));

        let result = guard(&watch, slow(1, Duration::from_secs(1)), counting(&cleanups))
            .await
            .unwrap();
        assert_eq!(result.done(), Some(1));
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fails_and_cleans_up() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let watch = Watch::new("abc", "start", Some(Duration::from_secs(1)));

        let result = guard(&watch, slow(1, Duration::from_secs(10)), counting(&cleanups)).await;
        match result {
            Err(Error::Timeout { id, kind }) => {
                assert_eq!(id, "abc");
                assert_eq!(kind, "start");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_resolves_with_sentinel() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let watch = Watch::new("abc", "mid", Some(Duration::from_secs(1))).resolving();

        let result = guard(&watch, slow(1, Duration::from_secs(10)), counting(&cleanups))
            .await
            .unwrap();
        assert!(result.is_timed_out());
        assert_eq!(
            result,
            Raced::TimedOut("abc took too long, it timed out - mid".to_string())
        );
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_runs_cleanup() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let watch = Watch::new("abc", "add", None);

        let failing = async { Err::<u32, _>(Error::not_found("abc")) };
        let result = guard(&watch, failing, counting(&cleanups)).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_ignores_resolving_watch() {
        let watch = Watch::new("abc", "data", Some(Duration::from_millis(10))).resolving();
        let result = bounded(&watch, slow(1, Duration::from_secs(1)), None).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }
}
