//! The executor capability the collector submits work to.
//!
//! The collector never owns, configures or shuts down an executor; it only
//! hands it [`Job`]s. Anything implementing `Fn(Job) + Send + Sync` is an
//! executor, which keeps test doubles (counting, dropping) trivial.

use crate::task::Job;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Context;

use futures_util::task::{waker_ref, ArcWake};
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;

/// Runs a unit of work, eventually, possibly on another thread, possibly
/// synchronously on the calling thread.
pub trait Executor: Send + Sync + 'static {
  fn execute(&self, job: Job);
}

impl<F> Executor for F
where
  F: Fn(Job) + Send + Sync + 'static,
{
  fn execute(&self, job: Job) {
    self(job)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpawnMode {
  Async,
  Blocking,
}

/// Submits jobs to a Tokio runtime through its [`TokioHandle`].
#[derive(Debug, Clone)]
pub struct TokioExecutor {
  handle: TokioHandle,
  mode: SpawnMode,
}

impl TokioExecutor {
  /// Spawns each job as an ordinary Tokio task.
  pub fn new(tokio_handle: TokioHandle) -> Self {
    Self {
      handle: tokio_handle,
      mode: SpawnMode::Async,
    }
  }

  /// Runs each job to completion on Tokio's blocking pool.
  /// Use this for tasks built with [`from_fn`](crate::task::from_fn) that block the thread.
  pub fn blocking(tokio_handle: TokioHandle) -> Self {
    Self {
      handle: tokio_handle,
      mode: SpawnMode::Blocking,
    }
  }
}

impl Executor for TokioExecutor {
  fn execute(&self, job: Job) {
    match self.mode {
      SpawnMode::Async => {
        self.handle.spawn(job);
      }
      SpawnMode::Blocking => {
        self.handle.spawn_blocking(move || futures::executor::block_on(job));
      }
    }
  }
}

/// Polls each job immediately on the submitting thread.
///
/// A job that returns `Pending` is polled again on whichever thread wakes it,
/// so `execute` returns as soon as the job first yields and never waits for
/// it to finish.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
  fn execute(&self, job: Job) {
    let inline_job = Arc::new(InlineJob {
      future: Mutex::new(Some(job)),
      notified: AtomicBool::new(false),
    });
    inline_job.run();
  }
}

struct InlineJob {
  future: Mutex<Option<Job>>,
  notified: AtomicBool,
}

impl InlineJob {
  fn run(self: &Arc<Self>) {
    self.notified.store(true, Ordering::Release);
    loop {
      // Whoever holds the lock is polling and will see `notified`.
      let Some(mut slot) = self.future.try_lock() else {
        return;
      };
      self.notified.store(false, Ordering::Release);

      if let Some(job) = slot.as_mut() {
        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);
        if job.as_mut().poll(&mut cx).is_ready() {
          *slot = None;
        }
      }
      drop(slot);

      if !self.notified.load(Ordering::Acquire) {
        return;
      }
    }
  }
}

impl ArcWake for InlineJob {
  fn wake_by_ref(arc_self: &Arc<Self>) {
    arc_self.run();
  }
}
