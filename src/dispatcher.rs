use crate::aggregator::{Aggregator, Settled, Status};
use crate::error::{CollectError, Rejected};
use crate::executor::Executor;
use crate::handle::{Intake, Resolve};
use crate::task::{Slot, Task};

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

lazy_static::lazy_static! {
  static ref NEXT_AGGREGATION_ID: AtomicU64 = AtomicU64::new(0);
}

/// Point-in-time counters for one aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
  /// Tasks handed to the executor so far.
  pub submitted: u64,
  /// Tasks submitted whose completion has not been reported yet.
  pub in_flight: usize,
  /// Tasks accepted but not yet submitted.
  pub queued: usize,
  /// Tasks whose completion has been reported, successful or not.
  pub completed: u64,
}

struct DispatchState<C, R, E> {
  pending: VecDeque<Task<R, E>>,
  in_flight: usize,
  submitted: u64,
  completed: u64,
  input_closed: bool,
  dispatching: bool,
  aggregator: Aggregator<C, E>,
}

impl<C: Default, R, E> DispatchState<C, R, E> {
  fn has_capacity(&self, limit: Option<NonZeroUsize>) -> bool {
    limit.map_or(true, |limit| self.in_flight < limit.get())
  }

  fn is_drained(&self) -> bool {
    self.input_closed && self.pending.is_empty() && self.in_flight == 0
  }

  /// Pops the next admissible task and counts it as in flight.
  fn take_next(&mut self, limit: Option<NonZeroUsize>) -> Option<Slot<R, E>> {
    if !self.aggregator.is_open() || !self.has_capacity(limit) {
      return None;
    }
    let task = self.pending.pop_front()?;
    self.in_flight += 1;
    let seq = self.submitted;
    self.submitted += 1;
    Some(Slot { seq, task })
  }
}

/// Work left over from a terminal transition, finished after the lock is released.
struct Teardown<R, E> {
  settled: Option<Settled>,
  abandoned: VecDeque<Task<R, E>>,
}

impl<R, E> Teardown<R, E> {
  fn none() -> Self {
    Self {
      settled: None,
      abandoned: VecDeque::new(),
    }
  }

  fn run(self, collector: &str, aggregation: u64) {
    if !self.abandoned.is_empty() {
      debug!(collector = %collector, aggregation, count = self.abandoned.len(), "Abandoning queued tasks without running them.");
    }
    drop(self.abandoned);
    if let Some(settled) = self.settled {
      settled.notify();
    }
  }
}

/// Admission control for one aggregation.
///
/// Queue, in-flight counter and aggregator share one mutex. The executor is
/// always called with the mutex released, and at most one thread runs the
/// submission loop at a time, so an executor that runs jobs inline drains
/// the queue iteratively rather than recursively.
pub(crate) struct Dispatcher<C, R, E> {
  id: u64,
  name: Arc<str>,
  limit: Option<NonZeroUsize>,
  executor: Arc<dyn Executor>,
  state: Mutex<DispatchState<C, R, E>>,
}

impl<C, R, E> Dispatcher<C, R, E>
where
  C: Default + Extend<R> + Send + 'static,
  R: Send + 'static,
  E: Send + 'static,
{
  pub(crate) fn new(name: Arc<str>, limit: Option<NonZeroUsize>, executor: Arc<dyn Executor>) -> Arc<Self> {
    Arc::new(Self {
      id: NEXT_AGGREGATION_ID.fetch_add(1, AtomicOrdering::Relaxed),
      name,
      limit,
      executor,
      state: Mutex::new(DispatchState {
        pending: VecDeque::new(),
        in_flight: 0,
        submitted: 0,
        completed: 0,
        input_closed: false,
        dispatching: false,
        aggregator: Aggregator::new(CancellationToken::new()),
      }),
    })
  }

  /// Collect mode: the full input is known before the first submission.
  /// Runs the initial burst of up to `limit` submissions on the calling thread.
  pub(crate) fn start(self: &Arc<Self>, tasks: VecDeque<Task<R, E>>) {
    info!(
      collector = %self.name,
      aggregation = self.id,
      total = tasks.len(),
      parallelism = ?self.limit,
      "Starting aggregation."
    );
    let settled = {
      let mut state = self.state.lock();
      state.pending = tasks;
      state.input_closed = true;
      if state.is_drained() {
        state.aggregator.finish()
      } else {
        None
      }
    };

    if let Some(settled) = settled {
      debug!(collector = %self.name, aggregation = self.id, "No input. Resolved with an empty collection.");
      settled.notify();
      return;
    }
    self.dispatch();
  }

  /// Streaming mode: accepts one task and submits it if capacity allows.
  pub(crate) fn enqueue(self: &Arc<Self>, task: Task<R, E>) -> Result<(), Rejected> {
    {
      let mut state = self.state.lock();
      if !state.aggregator.is_open() || state.input_closed {
        trace!(collector = %self.name, aggregation = self.id, "Rejecting task: aggregation is no longer accepting input.");
        return Err(Rejected);
      }
      state.pending.push_back(task);
    }
    self.dispatch();
    Ok(())
  }

  /// Marks the input as exhausted. Resolves immediately if nothing is outstanding.
  pub(crate) fn close_input(&self) {
    let settled = {
      let mut state = self.state.lock();
      if state.input_closed {
        return;
      }
      state.input_closed = true;
      debug!(
        collector = %self.name,
        aggregation = self.id,
        submitted = state.submitted,
        queued = state.pending.len(),
        "Input closed."
      );
      if state.is_drained() {
        state.aggregator.finish()
      } else {
        None
      }
    };

    if let Some(settled) = settled {
      info!(collector = %self.name, aggregation = self.id, "Aggregation succeeded.");
      settled.notify();
    }
  }

  fn dispatch(self: &Arc<Self>) {
    {
      let mut state = self.state.lock();
      if state.dispatching {
        trace!(collector = %self.name, aggregation = self.id, "Submission loop already running. It will pick up freed capacity.");
        return;
      }
      state.dispatching = true;
    }

    loop {
      let slot = {
        let mut state = self.state.lock();
        match state.take_next(self.limit) {
          Some(slot) => slot,
          None => {
            state.dispatching = false;
            trace!(
              collector = %self.name,
              aggregation = self.id,
              in_flight = state.in_flight,
              queued = state.pending.len(),
              "Submission loop idle."
            );
            return;
          }
        }
      };

      debug!(collector = %self.name, aggregation = self.id, seq = slot.seq, "Submitting task to executor.");
      let dispatcher = self.clone();
      let job = slot.into_job(&self.name, self.id, move |outcome| dispatcher.complete(outcome));
      self.executor.execute(job);
    }
  }

  /// Completion callback, run on whichever thread finished the task.
  fn complete(self: &Arc<Self>, outcome: Result<R, CollectError<E>>) {
    let (teardown, backfill) = {
      let mut state = self.state.lock();
      state.in_flight -= 1;
      state.completed += 1;
      let mut teardown = Teardown::none();

      match outcome {
        Ok(value) => {
          if !state.aggregator.record_success(value) {
            trace!(collector = %self.name, aggregation = self.id, "Discarding value: aggregation already settled.");
          } else if state.is_drained() {
            teardown.settled = state.aggregator.finish();
            info!(
              collector = %self.name,
              aggregation = self.id,
              values = state.aggregator.recorded(),
              "Aggregation succeeded."
            );
          }
        }
        Err(error) => {
          let kind = match &error {
            CollectError::TaskPanicked => "panicked",
            _ => "failed",
          };
          match state.aggregator.record_failure(error) {
            Some(settled) => {
              warn!(
                collector = %self.name,
                aggregation = self.id,
                kind,
                in_flight = state.in_flight,
                queued = state.pending.len(),
                "Task {}. Aggregation failed fast.", kind
              );
              teardown.settled = Some(settled);
              teardown.abandoned = std::mem::take(&mut state.pending);
            }
            None => {
              debug!(collector = %self.name, aggregation = self.id, kind, "Discarding task error: aggregation already settled.");
            }
          }
        }
      }

      let backfill = state.aggregator.is_open() && !state.pending.is_empty();
      (teardown, backfill)
    };

    teardown.run(&self.name, self.id);
    if backfill {
      self.dispatch();
    }
  }

  fn cancel_aggregation(&self) -> bool {
    let teardown = {
      let mut state = self.state.lock();
      match state.aggregator.cancel() {
        Some(settled) => {
          info!(
            collector = %self.name,
            aggregation = self.id,
            in_flight = state.in_flight,
            queued = state.pending.len(),
            "Aggregation cancelled. In-flight tasks will run to completion, their results are discarded."
          );
          Teardown {
            settled: Some(settled),
            abandoned: std::mem::take(&mut state.pending),
          }
        }
        None => {
          trace!(collector = %self.name, aggregation = self.id, "Cancel requested on a settled aggregation. No effect.");
          return false;
        }
      }
    };
    teardown.run(&self.name, self.id);
    true
  }
}

impl<C, R, E> Resolve<C, E> for Dispatcher<C, R, E>
where
  C: Default + Extend<R> + Send + 'static,
  R: Send + 'static,
  E: Send + 'static,
{
  fn id(&self) -> u64 {
    self.id
  }

  fn name(&self) -> &str {
    &self.name
  }

  fn poll_resolved(&self, cx: &mut Context<'_>) -> Poll<Result<C, CollectError<E>>> {
    self.state.lock().aggregator.poll_take(cx)
  }

  fn cancel(&self) -> bool {
    self.cancel_aggregation()
  }

  fn status(&self) -> Status {
    let state = self.state.lock();
    state.aggregator.status(state.input_closed)
  }

  fn progress(&self) -> Progress {
    let state = self.state.lock();
    Progress {
      submitted: state.submitted,
      in_flight: state.in_flight,
      queued: state.pending.len(),
      completed: state.completed,
    }
  }

  fn cancellation_token(&self) -> CancellationToken {
    self.state.lock().aggregator.token().clone()
  }
}

impl<C, R, E> Intake<R, E> for Dispatcher<C, R, E>
where
  C: Default + Extend<R> + Send + 'static,
  R: Send + 'static,
  E: Send + 'static,
{
  fn push(self: Arc<Self>, task: Task<R, E>) -> Result<(), Rejected> {
    self.enqueue(task)
  }

  fn close(&self) {
    self.close_input();
  }

  fn is_accepting(&self) -> bool {
    let state = self.state.lock();
    state.aggregator.is_open() && !state.input_closed
  }

  fn cancellation_token(&self) -> CancellationToken {
    self.state.lock().aggregator.token().clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::{task, Job};
  use std::sync::atomic::AtomicUsize;

  type TestDispatcher = Dispatcher<Vec<u32>, u32, String>;

  /// Executor that parks jobs so the test decides when each one runs.
  #[derive(Default, Clone)]
  struct ParkingExecutor {
    parked: Arc<Mutex<VecDeque<Job>>>,
    executed: Arc<AtomicUsize>,
  }

  impl ParkingExecutor {
    fn run_one(&self) -> bool {
      let job = self.parked.lock().pop_front();
      match job {
        Some(job) => {
          futures::executor::block_on(job);
          true
        }
        None => false,
      }
    }
  }

  impl Executor for ParkingExecutor {
    fn execute(&self, job: Job) {
      self.executed.fetch_add(1, AtomicOrdering::SeqCst);
      self.parked.lock().push_back(job);
    }
  }

  fn dispatcher(limit: usize, executor: &ParkingExecutor) -> Arc<TestDispatcher> {
    Dispatcher::new(Arc::from("dispatcher_test"), NonZeroUsize::new(limit), Arc::new(executor.clone()))
  }

  fn ok_tasks(values: impl IntoIterator<Item = u32>) -> VecDeque<Task<u32, String>> {
    values.into_iter().map(|v| task(async move { Ok(v) })).collect()
  }

  #[test]
  fn test_initial_burst_respects_limit() {
    let executor = ParkingExecutor::default();
    let d = dispatcher(3, &executor);
    d.start(ok_tasks(0..10));

    assert_eq!(executor.executed.load(AtomicOrdering::SeqCst), 3);
    assert_eq!(
      d.progress(),
      Progress {
        submitted: 3,
        in_flight: 3,
        queued: 7,
        completed: 0
      }
    );
    assert_eq!(Resolve::status(&*d), Status::Draining);
  }

  #[test]
  fn test_completion_backfills_one_slot() {
    let executor = ParkingExecutor::default();
    let d = dispatcher(2, &executor);
    d.start(ok_tasks(0..5));
    assert!(executor.run_one());

    let progress = d.progress();
    assert_eq!(progress.submitted, 3);
    assert_eq!(progress.in_flight, 2);
    assert_eq!(progress.completed, 1);
  }

  #[test]
  fn test_drains_to_success() {
    let executor = ParkingExecutor::default();
    let d = dispatcher(2, &executor);
    d.start(ok_tasks(1..=4));
    while executor.run_one() {}

    assert_eq!(Resolve::status(&*d), Status::Succeeded);
    let mut values = futures::executor::block_on(futures::future::poll_fn(|cx| d.poll_resolved(cx))).unwrap();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2, 3, 4]);
  }

  #[test]
  fn test_failure_abandons_queue_and_stops_backfill() {
    let executor = ParkingExecutor::default();
    let d = dispatcher(2, &executor);
    let mut tasks = ok_tasks(0..6);
    tasks.push_front(task(async { Err("bad input".to_string()) }));
    d.start(tasks);
    assert!(executor.run_one());

    assert_eq!(Resolve::status(&*d), Status::Failed);
    let progress = d.progress();
    assert_eq!(progress.queued, 0);
    assert_eq!(progress.in_flight, 1);

    // The remaining in-flight task drains without triggering new submissions.
    assert!(executor.run_one());
    assert!(!executor.run_one());
    assert_eq!(executor.executed.load(AtomicOrdering::SeqCst), 2);
  }

  #[test]
  fn test_enqueue_after_cancel_is_rejected() {
    let executor = ParkingExecutor::default();
    let d = dispatcher(1, &executor);
    assert!(d.enqueue(task(async { Ok(1) })).is_ok());
    assert!(d.enqueue(task(async { Ok(2) })).is_ok());
    assert_eq!(d.progress().queued, 1);

    assert!(d.cancel_aggregation());
    assert!(!d.cancel_aggregation());
    assert_eq!(d.progress().queued, 0);
    assert_eq!(d.enqueue(task(async { Ok(3) })), Err(Rejected));
  }

  #[test]
  fn test_close_input_with_nothing_outstanding_resolves() {
    let executor = ParkingExecutor::default();
    let d = dispatcher(1, &executor);
    assert_eq!(Resolve::status(&*d), Status::Open);
    d.close_input();
    assert_eq!(Resolve::status(&*d), Status::Succeeded);
    assert_eq!(executor.executed.load(AtomicOrdering::SeqCst), 0);
  }
}
