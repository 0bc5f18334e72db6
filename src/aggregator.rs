use crate::error::CollectError;

use std::task::{Context, Poll, Waker};

use tokio_util::sync::CancellationToken;

/// Observable state of an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  /// Accepting results; more input may still arrive.
  Open,
  /// Input is closed; waiting for outstanding tasks to finish.
  Draining,
  /// Every task succeeded and the collection is (or was) available.
  Succeeded,
  /// A task failed or panicked; the first such error was recorded.
  Failed,
  /// Cancelled by the consumer.
  Cancelled,
}

impl Status {
  pub fn is_terminal(self) -> bool {
    matches!(self, Status::Succeeded | Status::Failed | Status::Cancelled)
  }
}

enum Phase<C, E> {
  Open,
  Succeeded(Option<C>),
  Failed(Option<CollectError<E>>),
  Cancelled,
}

/// Side effects of a terminal transition, performed once the dispatcher lock is released.
#[must_use]
pub(crate) struct Settled {
  waker: Option<Waker>,
  token: CancellationToken,
}

impl Settled {
  pub(crate) fn notify(self) {
    self.token.cancel();
    if let Some(waker) = self.waker {
      waker.wake();
    }
  }
}

/// Single point of truth for the outcome of one aggregation.
/// Resolves at most once; every transition out of `Open` is final.
pub(crate) struct Aggregator<C, E> {
  phase: Phase<C, E>,
  partial: C,
  recorded: usize,
  waker: Option<Waker>,
  token: CancellationToken,
}

impl<C: Default, E> Aggregator<C, E> {
  pub(crate) fn new(token: CancellationToken) -> Self {
    Self {
      phase: Phase::Open,
      partial: C::default(),
      recorded: 0,
      waker: None,
      token,
    }
  }

  pub(crate) fn is_open(&self) -> bool {
    matches!(self.phase, Phase::Open)
  }

  pub(crate) fn status(&self, input_closed: bool) -> Status {
    match self.phase {
      Phase::Open if input_closed => Status::Draining,
      Phase::Open => Status::Open,
      Phase::Succeeded(_) => Status::Succeeded,
      Phase::Failed(_) => Status::Failed,
      Phase::Cancelled => Status::Cancelled,
    }
  }

  /// Number of successful values recorded so far.
  pub(crate) fn recorded(&self) -> usize {
    self.recorded
  }

  pub(crate) fn token(&self) -> &CancellationToken {
    &self.token
  }

  /// Appends a value. Returns `false` if the aggregation already settled and the value was dropped.
  pub(crate) fn record_success<R>(&mut self, value: R) -> bool
  where
    C: Extend<R>,
  {
    if !self.is_open() {
      return false;
    }
    self.partial.extend(std::iter::once(value));
    self.recorded += 1;
    true
  }

  /// First failure wins. Later failures return `None` and are dropped by the caller.
  pub(crate) fn record_failure(&mut self, error: CollectError<E>) -> Option<Settled> {
    if !self.is_open() {
      return None;
    }
    drop(std::mem::take(&mut self.partial));
    Some(self.settle(Phase::Failed(Some(error))))
  }

  /// Resolves successfully with everything recorded so far.
  pub(crate) fn finish(&mut self) -> Option<Settled> {
    if !self.is_open() {
      return None;
    }
    let collection = std::mem::take(&mut self.partial);
    Some(self.settle(Phase::Succeeded(Some(collection))))
  }

  pub(crate) fn cancel(&mut self) -> Option<Settled> {
    if !self.is_open() {
      return None;
    }
    drop(std::mem::take(&mut self.partial));
    Some(self.settle(Phase::Cancelled))
  }

  fn settle(&mut self, phase: Phase<C, E>) -> Settled {
    self.phase = phase;
    Settled {
      waker: self.waker.take(),
      token: self.token.clone(),
    }
  }

  /// Hands the outcome to the consumer exactly once.
  pub(crate) fn poll_take(&mut self, cx: &mut Context<'_>) -> Poll<Result<C, CollectError<E>>> {
    match &mut self.phase {
      Phase::Open => {
        match &self.waker {
          Some(existing) if existing.will_wake(cx.waker()) => {}
          _ => self.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
      }
      Phase::Succeeded(collection) => Poll::Ready(collection.take().ok_or(CollectError::ResultUnavailable)),
      Phase::Failed(error) => Poll::Ready(Err(error.take().unwrap_or(CollectError::ResultUnavailable))),
      Phase::Cancelled => Poll::Ready(Err(CollectError::Cancelled)),
    }
  }
}
