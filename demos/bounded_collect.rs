use par_collect::{ParallelCollector, TokioExecutor};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn slow_square(i: u64) -> Result<u64, String> {
  info!("Task {} starting (should take 500ms)", i);
  tokio::time::sleep(Duration::from_millis(500)).await;
  Ok(i * i)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Bounded Collect Example (Parallelism: 2) ---");

  let parallelism = 2;
  let collector = ParallelCollector::builder()
    .name("bounded_demo")
    .parallelism(parallelism)
    .executor(TokioExecutor::new(Handle::current()))
    .build()
    .expect("valid collector configuration");

  let num_tasks = 6u64;
  info!(
    "Collecting {} tasks of 500ms each. With parallelism {}, this should take ~{} secs.",
    num_tasks,
    parallelism,
    (num_tasks as f32 / parallelism as f32).ceil() * 0.5
  );

  let aggregate = collector.collect_mapped::<Vec<u64>, _, _, _, _, _, _>(0..num_tasks, slow_square);
  info!("Aggregate returned immediately: done = {}", aggregate.is_done());

  match aggregate.await {
    Ok(mut values) => {
      values.sort_unstable();
      info!("All tasks succeeded: {:?}", values);
    }
    Err(e) => info!("Aggregation failed: {:?}", e),
  }
  info!("--- Bounded Collect Example End ---");
}
