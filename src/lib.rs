//! Bounded-parallelism task aggregation.
//!
//! A [`ParallelCollector`] submits futures to a caller-supplied [`Executor`],
//! never keeping more than `parallelism` of them in flight, and returns a
//! single [`Aggregate`] that resolves to every value collected into a
//! collection of your choice, or to the first failure. Cancellation is
//! cooperative: queued tasks are dropped, running tasks finish and their
//! results are discarded.
//!
//! ```rust
//! use par_collect::{InlineExecutor, ParallelCollector};
//!
//! let collector = ParallelCollector::builder()
//!   .parallelism(2)
//!   .executor(InlineExecutor)
//!   .build()
//!   .unwrap();
//!
//! let aggregate = collector.to_vec((1..=4).map(|i| async move { Ok::<_, ()>(i * 10) }));
//! let mut values = aggregate.wait().unwrap();
//! values.sort();
//! assert_eq!(values, vec![10, 20, 30, 40]);
//! ```

mod aggregator;
mod collector;
mod dispatcher;
mod error;
mod executor;
mod handle;
pub mod task;

pub use aggregator::Status;
pub use collector::{CollectorBuilder, ParallelCollector, Parallelism};
pub use dispatcher::Progress;
pub use error::{CollectError, InvalidArgument, Rejected};
pub use executor::{Executor, InlineExecutor, TokioExecutor};
pub use handle::{Aggregate, Feeder};
pub use task::{Job, Task};
