use par_collect::{Aggregate, CollectError, ParallelCollector, TokioExecutor};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Timeout Cancellation Example ---");

  let collector = ParallelCollector::builder()
    .name("timeout_demo")
    .parallelism(2)
    .executor(TokioExecutor::new(Handle::current()))
    .build()
    .expect("valid collector configuration");

  let mut aggregate: Aggregate<Vec<u64>, String> = collector.collect((0..10u64).map(|i| async move {
    tokio::time::sleep(Duration::from_secs(1 + i)).await;
    Ok(i)
  }));

  tokio::select! {
    outcome = &mut aggregate => info!("Finished before the deadline: {:?}", outcome),
    _ = tokio::time::sleep(Duration::from_millis(1500)) => {
      info!("Deadline passed with progress {:?}. Cancelling.", aggregate.progress());
      aggregate.cancel();
    }
  }

  match aggregate.await {
    Err(CollectError::Cancelled) => info!("Aggregation reports cancelled. Queued tasks never ran."),
    other => info!("Unexpected outcome: {:?}", other),
  }
  info!("--- Timeout Cancellation Example End ---");
}
