use futures::{stream, StreamExt};
use par_collect::{ParallelCollector, TokioExecutor};
use std::collections::HashSet;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Streaming Feed Example ---");

  let collector = ParallelCollector::builder()
    .name("streaming_demo")
    .parallelism(3)
    .executor(TokioExecutor::new(Handle::current()))
    .build()
    .expect("valid collector configuration");

  let (feeder, aggregate) = collector.streaming::<HashSet<String>, String, String>();

  // Inputs trickle in; the total is not known up front.
  let words = ["alpha", "beta", "gamma", "delta", "alpha"];
  let source = stream::iter(words).then(|word| async move {
    tokio::time::sleep(Duration::from_millis(100)).await;
    async move {
      tokio::time::sleep(Duration::from_millis(200)).await;
      Ok::<_, String>(word.to_uppercase())
    }
  });

  let feeding = tokio::spawn(feeder.feed(source));

  match aggregate.await {
    Ok(words) => info!("Distinct words: {:?}", words),
    Err(e) => info!("Aggregation failed: {:?}", e),
  }
  info!("Feeder accepted: {:?}", feeding.await);
  info!("--- Streaming Feed Example End ---");
}
