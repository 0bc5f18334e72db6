use crate::aggregator::Status;
use crate::dispatcher::Progress;
use crate::error::{CollectError, Rejected};
use crate::task::Task;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Consumer-side view of an aggregation, independent of the task value type.
pub(crate) trait Resolve<C, E>: Send + Sync {
  fn id(&self) -> u64;
  fn name(&self) -> &str;
  fn poll_resolved(&self, cx: &mut Context<'_>) -> Poll<Result<C, CollectError<E>>>;
  fn cancel(&self) -> bool;
  fn status(&self) -> Status;
  fn progress(&self) -> Progress;
  fn cancellation_token(&self) -> CancellationToken;
}

/// Producer-side view of a streaming aggregation, independent of the collection type.
pub(crate) trait Intake<R, E>: Send + Sync {
  fn push(self: Arc<Self>, task: Task<R, E>) -> Result<(), Rejected>;
  fn close(&self);
  fn is_accepting(&self) -> bool;
  fn cancellation_token(&self) -> CancellationToken;
}

/// The single result of an aggregation: every value collected into `C`, or the first failure.
///
/// `Aggregate` is a [`Future`]. Awaiting it yields `Ok(C)` once every task has
/// succeeded, or the first error observed. It can also be inspected and
/// cancelled without awaiting.
///
/// Dropping an `Aggregate` that has not settled cancels it.
#[must_use = "an aggregation is cancelled when its handle is dropped"]
pub struct Aggregate<C, E> {
  pub(crate) inner: Arc<dyn Resolve<C, E>>,
}

impl<C, E> Aggregate<C, E> {
  /// Returns the unique ID of this aggregation.
  pub fn id(&self) -> u64 {
    self.inner.id()
  }

  /// Returns the name of the collector that started this aggregation.
  pub fn name(&self) -> &str {
    self.inner.name()
  }

  /// `true` once the aggregation succeeded, failed or was cancelled.
  pub fn is_done(&self) -> bool {
    self.inner.status().is_terminal()
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.status() == Status::Cancelled
  }

  pub fn status(&self) -> Status {
    self.inner.status()
  }

  pub fn progress(&self) -> Progress {
    self.inner.progress()
  }

  /// Requests cancellation.
  ///
  /// Queued tasks are dropped without running. Tasks already handed to the
  /// executor keep running; their results are discarded. Returns `true` only
  /// for the call that actually cancelled an open aggregation.
  pub fn cancel(&self) -> bool {
    debug!(aggregation = %self.id(), "Aggregate: Cancellation requested.");
    self.inner.cancel()
  }

  /// A token that is cancelled as soon as the aggregation settles in any way.
  /// Tasks may watch it to stop early once their result can no longer matter.
  pub fn cancellation_token(&self) -> CancellationToken {
    self.inner.cancellation_token()
  }

  /// Blocks the current thread until the aggregation settles.
  ///
  /// Do not call this from inside an async runtime worker; `.await` the
  /// aggregate instead.
  pub fn wait(self) -> Result<C, CollectError<E>> {
    futures::executor::block_on(self)
  }
}

impl<C, E> Future for Aggregate<C, E> {
  type Output = Result<C, CollectError<E>>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    self.inner.poll_resolved(cx)
  }
}

impl<C, E> Drop for Aggregate<C, E> {
  fn drop(&mut self) {
    if self.inner.cancel() {
      debug!(aggregation = %self.inner.id(), "Aggregate dropped before settling. Aggregation cancelled.");
    }
  }
}

impl<C, E> fmt::Debug for Aggregate<C, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Aggregate")
      .field("id", &self.inner.id())
      .field("name", &self.inner.name())
      .field("status", &self.inner.status())
      .field("progress", &self.inner.progress())
      .finish()
  }
}

/// Input half of a streaming aggregation.
///
/// Each pushed task is submitted as soon as the parallelism bound allows.
/// The aggregation can only succeed after the feeder is closed, either with
/// [`Feeder::close`] or by dropping it.
pub struct Feeder<R, E> {
  pub(crate) intake: Arc<dyn Intake<R, E>>,
}

impl<R, E> Feeder<R, E> {
  /// Accepts a task. Fails with [`Rejected`] once the aggregation settled;
  /// the task is then dropped without running.
  pub fn push<F>(&self, future: F) -> Result<(), Rejected>
  where
    F: Future<Output = Result<R, E>> + Send + 'static,
  {
    self.intake.clone().push(Box::pin(future))
  }

  /// `false` once the aggregation settled (failed or cancelled).
  pub fn is_accepting(&self) -> bool {
    self.intake.is_accepting()
  }

  /// Signals end of input. The aggregation resolves when outstanding tasks finish.
  pub fn close(self) {
    drop(self);
  }

  /// Pushes every task the stream yields, then closes the input.
  ///
  /// Stops early, without polling the stream further, if the aggregation
  /// settles first. Returns the number of tasks accepted.
  pub async fn feed<S, F>(self, stream: S) -> Result<usize, Rejected>
  where
    S: Stream<Item = F>,
    F: Future<Output = Result<R, E>> + Send + 'static,
  {
    let settled = self.intake.cancellation_token();
    let mut stream = std::pin::pin!(stream);
    let mut accepted = 0usize;

    loop {
      tokio::select! {
        biased;
        _ = settled.cancelled() => {
          debug!(accepted, "Feeder: aggregation settled while feeding. Stopping.");
          return Err(Rejected);
        }
        next = stream.next() => {
          match next {
            Some(future) => {
              self.push(future)?;
              accepted += 1;
            }
            None => break,
          }
        }
      }
    }

    debug!(accepted, "Feeder: input stream exhausted. Closing.");
    Ok(accepted)
  }
}

impl<R, E> Drop for Feeder<R, E> {
  fn drop(&mut self) {
    self.intake.close();
  }
}

impl<R, E> fmt::Debug for Feeder<R, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Feeder")
      .field("accepting", &self.intake.is_accepting())
      .finish()
  }
}
