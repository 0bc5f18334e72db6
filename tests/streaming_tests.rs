use futures::channel::oneshot;
use futures::stream;
use futures::StreamExt;
use par_collect::{Aggregate, CollectError, Feeder, InlineExecutor, ParallelCollector, Rejected, Status, TokioExecutor};
use std::time::Duration;
use tokio::time::sleep;

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,par_collect=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

fn inline_collector(parallelism: usize) -> ParallelCollector {
  ParallelCollector::builder()
    .name("streaming_tests")
    .parallelism(parallelism)
    .executor(InlineExecutor)
    .build()
    .unwrap()
}

/// Pushes a task that finishes with whatever the returned sender delivers.
fn push_gated(feeder: &Feeder<u32, String>) -> oneshot::Sender<Result<u32, String>> {
  let (tx, rx) = oneshot::channel();
  feeder
    .push(async move { rx.await.unwrap_or_else(|_| Err("gate dropped".to_string())) })
    .unwrap();
  tx
}

#[test]
fn test_pushes_beyond_bound_are_queued() {
  setup_tracing_for_test();
  let (feeder, result) = inline_collector(2).streaming::<Vec<u32>, u32, String>();

  let gates: Vec<_> = (0..5).map(|_| push_gated(&feeder)).collect();

  let progress = result.progress();
  assert_eq!(progress.in_flight, 2);
  assert_eq!(progress.queued, 3);
  assert_eq!(progress.submitted, 2);
  assert_eq!(result.status(), Status::Open);

  // Inline execution: completing a gate backfills on this thread.
  for (i, gate) in gates.into_iter().enumerate() {
    gate.send(Ok(i as u32)).unwrap();
    assert!(result.progress().in_flight <= 2);
  }

  assert_eq!(result.progress().completed, 5);
  assert!(!result.is_done(), "Input is still open, aggregation must not resolve yet.");

  feeder.close();
  assert_eq!(result.status(), Status::Succeeded);
  let mut values = result.wait().unwrap();
  values.sort_unstable();
  assert_eq!(values, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_close_with_outstanding_tasks_drains_first() {
  setup_tracing_for_test();
  let (feeder, result) = inline_collector(1).streaming::<Vec<u32>, u32, String>();
  let first = push_gated(&feeder);
  let second = push_gated(&feeder);

  feeder.close();
  assert_eq!(result.status(), Status::Draining);

  first.send(Ok(1)).unwrap();
  assert_eq!(result.status(), Status::Draining);
  second.send(Ok(2)).unwrap();
  assert_eq!(result.status(), Status::Succeeded);
  assert_eq!(result.wait().map(|v| v.len()), Ok(2));
}

#[test]
fn test_close_without_input_resolves_empty() {
  setup_tracing_for_test();
  let (feeder, result) = inline_collector(3).streaming::<Vec<u32>, u32, String>();
  assert!(!result.is_done());
  drop(feeder);
  assert!(result.is_done());
  assert_eq!(result.wait(), Ok(Vec::new()));
}

#[test]
fn test_push_after_failure_is_rejected() {
  setup_tracing_for_test();
  let (feeder, result) = inline_collector(2).streaming::<Vec<u32>, u32, String>();
  let ok_gate = push_gated(&feeder);
  let bad_gate = push_gated(&feeder);
  let queued_gate = push_gated(&feeder);

  bad_gate.send(Err("bad".to_string())).unwrap();
  assert_eq!(result.status(), Status::Failed);
  assert!(!feeder.is_accepting());
  assert_eq!(result.progress().queued, 0);
  assert_eq!(feeder.push(async { Ok::<u32, String>(99) }), Err(Rejected));

  // Late success from the task that was already running is discarded.
  ok_gate.send(Ok(1)).unwrap();
  // The queued task was dropped unrun, so its gate has no receiver.
  assert!(queued_gate.send(Ok(2)).is_err());

  assert_eq!(result.wait(), Err(CollectError::TaskFailed("bad".to_string())));
}

#[test]
fn test_second_failure_is_swallowed() {
  setup_tracing_for_test();
  let (feeder, result) = inline_collector(2).streaming::<Vec<u32>, u32, String>();
  let first = push_gated(&feeder);
  let second = push_gated(&feeder);
  feeder.close();

  first.send(Err("first".to_string())).unwrap();
  second.send(Err("second".to_string())).unwrap();
  assert_eq!(result.progress().completed, 2);
  assert_eq!(result.wait(), Err(CollectError::TaskFailed("first".to_string())));
}

#[test]
fn test_cancel_discards_running_results() {
  setup_tracing_for_test();
  let (feeder, result) = inline_collector(1).streaming::<Vec<u32>, u32, String>();
  let running = push_gated(&feeder);
  let _queued = push_gated(&feeder);

  assert!(result.cancel());
  assert!(!feeder.is_accepting());
  running.send(Ok(1)).unwrap();
  assert_eq!(result.progress().completed, 1);
  assert_eq!(result.progress().submitted, 1);
  assert_eq!(result.wait(), Err(CollectError::Cancelled));
}

#[tokio::test]
async fn test_feed_drains_stream_and_closes() {
  setup_tracing_for_test();
  let collector = ParallelCollector::builder()
    .name("streaming_feed")
    .parallelism(3)
    .executor(TokioExecutor::new(tokio::runtime::Handle::current()))
    .build()
    .unwrap();
  let (feeder, result): (Feeder<u32, String>, Aggregate<Vec<u32>, String>) = collector.streaming();

  let tasks = stream::iter(0..10u32).map(|i| async move {
    sleep(Duration::from_millis(5)).await;
    Ok::<u32, String>(i * i)
  });

  let accepted = feeder.feed(tasks).await.unwrap();
  assert_eq!(accepted, 10);

  let mut values = tokio::time::timeout(Duration::from_secs(2), result).await.unwrap().unwrap();
  values.sort_unstable();
  assert_eq!(values, (0..10u32).map(|i| i * i).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_feed_stops_when_aggregation_settles() {
  setup_tracing_for_test();
  let collector = ParallelCollector::builder()
    .name("streaming_feed_cancel")
    .parallelism(1)
    .executor(TokioExecutor::new(tokio::runtime::Handle::current()))
    .build()
    .unwrap();
  let (feeder, result) = collector.streaming::<Vec<u32>, u32, String>();

  // An endless, slow source of tasks.
  let source = stream::unfold(0u32, |i| async move {
    sleep(Duration::from_millis(10)).await;
    Some((async move { Ok::<u32, String>(i) }, i + 1))
  });

  let feeding = tokio::spawn(feeder.feed(source));
  sleep(Duration::from_millis(50)).await;
  assert!(result.cancel());

  let fed = tokio::time::timeout(Duration::from_secs(1), feeding).await.unwrap().unwrap();
  assert_eq!(fed, Err(Rejected));
  assert_eq!(result.await, Err(CollectError::Cancelled));
}
