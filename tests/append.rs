use std::time::Duration;

use treeline::prelude::*;
use treeline_testing::NeverCancel;

fn driver() -> EphemeralLog {
    EphemeralLog::new(EphemeralLogConfig::default())
}

fn options(max_size: usize, max_age_ms: u64) -> AppendOptions<EphemeralLog, NeverCancel> {
    AppendOptions::new(QueueConfig {
        max_size,
        max_age_ms,
    })
}

#[tokio::test]
async fn unique_adds_resolve_to_sequential_indices() {
    let driver = driver();
    let (appender, _shutdown, _reader) =
        assemble(&driver, options(256, 50), NeverCancel).unwrap();

    let one = appender.add(Entry::new(b"one".to_vec())).await;
    let two = appender.add(Entry::new(b"two".to_vec())).await;
    let three = appender.add(Entry::new(b"three".to_vec())).await;

    let one = one.assignment().await.unwrap();
    let two = two.assignment().await.unwrap();
    let three = three.assignment().await.unwrap();

    assert_eq!((one.index, one.is_dup), (0, false));
    assert_eq!((two.index, two.is_dup), (1, false));
    assert_eq!((three.index, three.is_dup), (2, false));
}

#[tokio::test]
async fn identical_adds_in_one_window_share_an_index() {
    let driver = driver();
    let (appender, _shutdown, _reader) =
        assemble(&driver, options(256, 50), NeverCancel).unwrap();

    let first = appender.add(Entry::new(b"x".to_vec())).await;
    let second = appender.add(Entry::new(b"x".to_vec())).await;

    let first = first.assignment().await.unwrap();
    let second = second.assignment().await.unwrap();

    assert_eq!(first.index, second.index);

    // only one copy of the leaf was sequenced
    assert_eq!(driver.sequenced_size(), 1);
}

#[tokio::test]
async fn assigned_indices_are_unique_across_batches() {
    let driver = driver();
    let (appender, _shutdown, _reader) =
        assemble(&driver, options(7, 20), NeverCancel).unwrap();

    let mut futures = Vec::new();
    for leaf in treeline_testing::leaves(50) {
        futures.push(appender.add(Entry::new(leaf)).await);
    }

    let mut indices = std::collections::BTreeSet::new();
    for future in futures {
        assert!(indices.insert(future.assignment().await.unwrap().index));
    }

    let expected: std::collections::BTreeSet<u64> = (0..50).collect();
    assert_eq!(indices, expected);
}

#[tokio::test]
async fn memory_dedup_catches_repeats_across_batches() {
    let driver = driver();

    let options = options(1, 50).with_decorator(dedup::decorator(64));
    let (appender, _shutdown, _reader) = assemble(&driver, options, NeverCancel).unwrap();

    let first = appender.add(Entry::new(b"x".to_vec())).await;
    assert_eq!(first.assignment().await.unwrap().index, 0);

    // the batch window is long gone, only the dedup cache remembers
    let repeat = appender.add(Entry::new(b"x".to_vec())).await;
    let repeat = repeat.assignment().await.unwrap();

    assert_eq!(repeat.index, 0);
    assert!(repeat.is_dup);
    assert_eq!(driver.sequenced_size(), 1);
}

#[tokio::test]
async fn shutdown_waits_for_a_covering_checkpoint() {
    let driver = driver();
    let (appender, shutdown, _reader) =
        assemble(&driver, options(256, 20), NeverCancel).unwrap();

    let mut futures = Vec::new();
    for leaf in treeline_testing::leaves(100) {
        futures.push(appender.add(Entry::new(leaf)).await);
    }

    for future in futures {
        future.assignment().await.unwrap();
    }

    let waiter = tokio::spawn(async move { shutdown.shutdown(NeverCancel).await });

    // no checkpoint yet, shutdown must keep polling
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!waiter.is_finished());

    assert_eq!(driver.integrate(), 100);
    let published = driver.publish_checkpoint();
    assert_eq!(published.size, 100);

    waiter.await.unwrap().unwrap();
}

#[tokio::test]
async fn add_after_shutdown_fails_without_touching_the_sink() {
    let driver = driver();
    let (appender, shutdown, _reader) =
        assemble(&driver, options(256, 20), NeverCancel).unwrap();

    let future = appender.add(Entry::new(b"early".to_vec())).await;
    assert_eq!(future.assignment().await.unwrap().index, 0);

    driver.integrate();
    driver.publish_checkpoint();
    shutdown.shutdown(NeverCancel).await.unwrap();

    let sequenced_before = driver.sequenced_size();

    let late = appender.add(Entry::new(b"late".to_vec())).await;
    let err = late.assignment().await.unwrap_err();

    assert_eq!(err.to_string(), "appender has been shut down");
    assert_eq!(driver.sequenced_size(), sequenced_before);
}

#[tokio::test]
async fn pushback_reaches_the_caller() {
    let driver = EphemeralLog::new(EphemeralLogConfig {
        pushback_max_outstanding: 1,
        ..Default::default()
    });

    let (appender, _shutdown, _reader) =
        assemble(&driver, options(1, 50), NeverCancel).unwrap();

    let first = appender.add(Entry::new(b"a".to_vec())).await;
    assert_eq!(first.assignment().await.unwrap().index, 0);

    let second = appender.add(Entry::new(b"b".to_vec())).await;
    assert!(matches!(
        second.assignment().await,
        Err(AppendError::Pushback)
    ));
}
