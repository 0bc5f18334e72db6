use thiserror::Error;

/// Rejected construction parameters, reported before any task is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid argument: {0}")]
pub struct InvalidArgument(pub String);

/// Errors an [`Aggregate`](crate::Aggregate) can resolve to.
///
/// `E` is the error type produced by the collected tasks. `Display` and
/// `std::error::Error` are implemented whenever `E` implements them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectError<E> {
  #[error(transparent)]
  InvalidArgument(#[from] InvalidArgument),

  #[error("Task failed: {0}")]
  TaskFailed(E),

  #[error("Task panicked during execution")]
  TaskPanicked,

  #[error("Aggregation was cancelled")]
  Cancelled,

  #[error("Aggregation result already taken")]
  ResultUnavailable,
}

impl<E> CollectError<E> {
  /// Returns the task's own error if this is a `TaskFailed`.
  pub fn into_task_error(self) -> Option<E> {
    match self {
      CollectError::TaskFailed(e) => Some(e),
      _ => None,
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, CollectError::Cancelled)
  }
}

/// A streaming push arrived after the aggregation already settled.
/// The task was dropped without running.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Aggregation already settled, task was not accepted")]
pub struct Rejected;
