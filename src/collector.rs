use crate::dispatcher::Dispatcher;
use crate::error::InvalidArgument;
use crate::executor::Executor;
use crate::handle::{Aggregate, Feeder};
use crate::task::Task;

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::{debug, warn};

const DEFAULT_COLLECTOR_NAME: &str = "par_collect";

/// How many tasks may be in flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
  /// Never more than this many tasks handed to the executor and not yet finished.
  Bounded(NonZeroUsize),
  /// Every task is submitted as soon as it is accepted.
  Unbounded,
}

impl Parallelism {
  /// Validates a bound. Zero is rejected.
  pub fn bounded(limit: usize) -> Result<Self, InvalidArgument> {
    NonZeroUsize::new(limit)
      .map(Parallelism::Bounded)
      .ok_or_else(|| InvalidArgument("parallelism can't be lower than 1".to_string()))
  }

  pub(crate) fn limit(self) -> Option<NonZeroUsize> {
    match self {
      Parallelism::Bounded(limit) => Some(limit),
      Parallelism::Unbounded => None,
    }
  }
}

/// Validated configuration for running tasks in parallel on a caller-supplied executor.
///
/// A collector is cheap to clone and can start any number of independent
/// aggregations. It never owns the executor's lifecycle.
#[derive(Clone)]
pub struct ParallelCollector {
  name: Arc<str>,
  parallelism: Parallelism,
  executor: Arc<dyn Executor>,
}

impl fmt::Debug for ParallelCollector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ParallelCollector")
      .field("name", &self.name)
      .field("parallelism", &self.parallelism)
      .finish_non_exhaustive()
  }
}

impl ParallelCollector {
  pub fn builder() -> CollectorBuilder {
    CollectorBuilder::default()
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn parallelism(&self) -> Parallelism {
    self.parallelism
  }

  /// Runs every task and collects the values into `C`, in completion order.
  ///
  /// The whole input is materialised first, then up to `parallelism` tasks
  /// are submitted before this returns. The call never waits for a task to
  /// finish. An empty input resolves immediately without touching the executor.
  pub fn collect<C, I, F, R, E>(&self, tasks: I) -> Aggregate<C, E>
  where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<R, E>> + Send + 'static,
    C: Default + Extend<R> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
  {
    let pending: VecDeque<Task<R, E>> = tasks.into_iter().map(|f| Box::pin(f) as Task<R, E>).collect();
    let dispatcher = self.dispatcher::<C, R, E>();
    dispatcher.start(pending);
    Aggregate { inner: dispatcher }
  }

  /// Like [`collect`](Self::collect), applying `mapper` to each input on the executor.
  ///
  /// `mapper` is not called until the corresponding task is first polled by
  /// the executor, so a mapper that does synchronous work up front still runs
  /// under the parallelism bound.
  pub fn collect_mapped<C, I, T, M, F, R, E>(&self, items: I, mapper: M) -> Aggregate<C, E>
  where
    I: IntoIterator<Item = T>,
    T: Send + 'static,
    M: Fn(T) -> F + Send + Sync + 'static,
    F: Future<Output = Result<R, E>> + Send + 'static,
    C: Default + Extend<R> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
  {
    let mapper = Arc::new(mapper);
    self.collect(items.into_iter().map(move |item| {
      let mapper = mapper.clone();
      async move { mapper(item).await }
    }))
  }

  /// Starts a streaming aggregation whose total is unknown up front.
  ///
  /// Tasks pushed into the [`Feeder`] are submitted as capacity allows; the
  /// [`Aggregate`] resolves once the feeder is closed and everything pushed
  /// has finished.
  pub fn streaming<C, R, E>(&self) -> (Feeder<R, E>, Aggregate<C, E>)
  where
    C: Default + Extend<R> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
  {
    let dispatcher = self.dispatcher::<C, R, E>();
    debug!(collector = %self.name, parallelism = ?self.parallelism, "Starting streaming aggregation.");
    (
      Feeder {
        intake: dispatcher.clone(),
      },
      Aggregate { inner: dispatcher },
    )
  }

  /// Collects into a `Vec`, in completion order.
  pub fn to_vec<I, F, R, E>(&self, tasks: I) -> Aggregate<Vec<R>, E>
  where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<R, E>> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
  {
    self.collect(tasks)
  }

  /// Collects into a `HashSet`; duplicate values collapse.
  pub fn to_set<I, F, R, E>(&self, tasks: I) -> Aggregate<HashSet<R>, E>
  where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<R, E>> + Send + 'static,
    R: Eq + Hash + Send + 'static,
    E: Send + 'static,
  {
    self.collect(tasks)
  }

  fn dispatcher<C, R, E>(&self) -> Arc<Dispatcher<C, R, E>>
  where
    C: Default + Extend<R> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
  {
    Dispatcher::new(self.name.clone(), self.parallelism.limit(), self.executor.clone())
  }
}

/// Builder for [`ParallelCollector`]. Validation happens in [`build`](Self::build).
#[derive(Default)]
pub struct CollectorBuilder {
  name: Option<String>,
  parallelism: Option<usize>,
  executor: Option<Arc<dyn Executor>>,
}

impl fmt::Debug for CollectorBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CollectorBuilder")
      .field("name", &self.name)
      .field("parallelism", &self.parallelism)
      .field("executor_is_some", &self.executor.is_some())
      .finish()
  }
}

impl CollectorBuilder {
  /// Name used in log events. Defaults to `"par_collect"`.
  pub fn name(mut self, name: &str) -> Self {
    self.name = Some(name.to_string());
    self
  }

  /// Maximum number of tasks in flight. Must be at least 1.
  pub fn parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = Some(parallelism);
    self
  }

  /// Submits every task immediately. This is the default.
  pub fn unbounded(mut self) -> Self {
    self.parallelism = None;
    self
  }

  pub fn executor(mut self, executor: impl Executor) -> Self {
    self.executor = Some(Arc::new(executor));
    self
  }

  /// Shares an executor that is already behind an `Arc`.
  pub fn shared_executor(mut self, executor: Arc<dyn Executor>) -> Self {
    self.executor = Some(executor);
    self
  }

  pub fn build(self) -> Result<ParallelCollector, InvalidArgument> {
    let name: Arc<str> = Arc::from(self.name.as_deref().unwrap_or(DEFAULT_COLLECTOR_NAME));

    let parallelism = match self.parallelism {
      Some(limit) => Parallelism::bounded(limit).inspect_err(|e| {
        warn!(collector = %name, requested = limit, "Rejecting collector configuration: {}", e);
      })?,
      None => Parallelism::Unbounded,
    };

    let executor = self.executor.ok_or_else(|| {
      warn!(collector = %name, "Rejecting collector configuration: no executor.");
      InvalidArgument("an executor is required".to_string())
    })?;

    debug!(collector = %name, ?parallelism, "Collector configured.");
    Ok(ParallelCollector {
      name,
      parallelism,
      executor,
    })
  }
}
