use crate::error::CollectError;

use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug_span, error, Instrument};

/// The unit of work the collector runs.
/// It must be `Send` and `'static`, and produce either a value `R` or an error `E`.
pub type Task<R, E> = BoxFuture<'static, Result<R, E>>;

/// The type-erased unit handed to an [`Executor`](crate::Executor).
pub type Job = BoxFuture<'static, ()>;

/// Boxes a fallible future into a [`Task`].
pub fn task<F, R, E>(future: F) -> Task<R, E>
where
  F: Future<Output = Result<R, E>> + Send + 'static,
{
  Box::pin(future)
}

/// Boxes a future that cannot fail into a [`Task`].
pub fn infallible<F, R>(future: F) -> Task<R, Infallible>
where
  F: Future<Output = R> + Send + 'static,
  R: Send + 'static,
{
  Box::pin(future.map(Ok))
}

/// Wraps a blocking closure as a [`Task`].
///
/// The closure runs on whichever thread first polls the task, so pair it with
/// an executor that tolerates blocking, e.g. [`TokioExecutor::blocking`](crate::TokioExecutor::blocking).
pub fn from_fn<F, R, E>(f: F) -> Task<R, E>
where
  F: FnOnce() -> Result<R, E> + Send + 'static,
  R: Send + 'static,
  E: Send + 'static,
{
  Box::pin(async move { f() })
}

/// A task that has left the pending queue, paired with its sequence number.
pub(crate) struct Slot<R, E> {
  pub(crate) seq: u64,
  pub(crate) task: Task<R, E>,
}

impl<R: Send + 'static, E: Send + 'static> Slot<R, E> {
  /// Converts the slot into an executor job that reports its outcome to `on_complete`.
  ///
  /// Panics inside the task are caught and reported as `CollectError::TaskPanicked`.
  pub(crate) fn into_job<F>(self, collector: &str, aggregation: u64, on_complete: F) -> Job
  where
    F: FnOnce(Result<R, CollectError<E>>) + Send + 'static,
  {
    let seq = self.seq;
    let span = debug_span!("collect_task", collector = %collector, aggregation, seq);
    let task = self.task;

    Box::pin(
      async move {
        let outcome = match AssertUnwindSafe(task).catch_unwind().await {
          Ok(Ok(value)) => Ok(value),
          Ok(Err(e)) => Err(CollectError::TaskFailed(e)),
          Err(_panic_payload) => {
            error!(seq, "Task panicked during execution.");
            Err(CollectError::TaskPanicked)
          }
        };
        on_complete(outcome);
      }
      .instrument(span),
    )
  }
}
