use std::time::Duration;

use tokio_util::sync::CancellationToken;

use treeline::prelude::*;
use treeline_redb::RedbAntispam;
use treeline_testing::{leaf_identity, streams::ScriptedLog, NeverCancel};

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) {
    let started = std::time::Instant::now();

    while !check() {
        if started.elapsed() > deadline {
            panic!("condition not reached within {deadline:?}");
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn fast_follower() -> FollowerConfig {
    FollowerConfig {
        poll_interval_ms: 10,
    }
}

#[tokio::test]
async fn follower_fills_the_persistent_index_smallest_index_wins() {
    let log = ScriptedLog::new();
    log.extend([b"a".to_vec(), b"b".to_vec(), b"a".to_vec()]);

    let store = RedbAntispam::in_memory().unwrap();

    let exit = CancellationToken::new();
    let follower = AntispamFollower::new(store.clone(), log.clone(), fast_follower());
    let task = tokio::spawn(follower.run(CancelTokenImpl(exit.clone())));

    {
        let store = store.clone();
        wait_until(Duration::from_secs(5), move || {
            store.processed_entries().unwrap() >= 3
        })
        .await;
    }

    assert_eq!(
        store.lookup(&hash::identity_hash(b"a")).unwrap(),
        Some(0),
        "the duplicate at index 2 must not overwrite the row"
    );
    assert_eq!(store.lookup(&hash::identity_hash(b"b")).unwrap(), Some(1));

    exit.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn follower_recovers_from_transient_read_errors() {
    let log = ScriptedLog::new();
    log.extend([b"a".to_vec()]);
    log.fail_next_size();

    let store = RedbAntispam::in_memory().unwrap();

    let exit = CancellationToken::new();
    let follower = AntispamFollower::new(store.clone(), log.clone(), fast_follower());
    let task = tokio::spawn(follower.run(CancelTokenImpl(exit.clone())));

    {
        let store = store.clone();
        wait_until(Duration::from_secs(5), move || {
            store.processed_entries().unwrap() >= 1
        })
        .await;
    }

    assert_eq!(store.lookup(&hash::identity_hash(b"a")).unwrap(), Some(0));

    exit.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn integrated_duplicate_short_circuits_the_queue() {
    let driver = EphemeralLog::new(EphemeralLogConfig::default());
    let store = RedbAntispam::in_memory().unwrap();

    let exit = CancellationToken::new();
    let cancel = CancelTokenImpl(exit.clone());

    let options = AppendOptions::new(QueueConfig {
        max_size: 256,
        max_age_ms: 20,
    })
    .with_decorator(antispam::decorator(store.clone()))
    .with_follower(antispam::follower(store.clone(), fast_follower()));

    let (appender, _shutdown, _reader) = assemble(&driver, options, cancel).unwrap();

    let first = appender.add(Entry::new(b"x".to_vec())).await;
    assert_eq!(first.assignment().await.unwrap().index, 0);

    // let the follower see the integrated leaf
    driver.integrate();
    {
        let store = store.clone();
        wait_until(Duration::from_secs(5), move || {
            store.processed_entries().unwrap() >= 1
        })
        .await;
    }

    let repeat = appender.add(Entry::new(b"x".to_vec())).await;
    let repeat = repeat.assignment().await.unwrap();

    assert_eq!(repeat.index, 0);
    assert!(repeat.is_dup);

    // the duplicate never consumed a sequence number
    assert_eq!(driver.sequenced_size(), 1);

    exit.cancel();
}

#[tokio::test]
async fn stale_follower_degrades_to_letting_duplicates_through() {
    let driver = EphemeralLog::new(EphemeralLogConfig::default());
    let store = RedbAntispam::in_memory().unwrap();

    // no follower registered at all: the persistent index stays empty
    let options = AppendOptions::new(QueueConfig {
        max_size: 1,
        max_age_ms: 50,
    })
    .with_decorator(antispam::decorator(store));

    let (appender, _shutdown, _reader) = assemble(&driver, options, NeverCancel).unwrap();

    let first = appender.add(Entry::new(b"x".to_vec())).await;
    assert_eq!(first.assignment().await.unwrap().index, 0);

    let repeat = appender.add(Entry::new(b"x".to_vec())).await;
    let repeat = repeat.assignment().await.unwrap();

    // sequenced again: spam control is best-effort, not correctness
    assert_eq!(repeat.index, 1);
    assert!(!repeat.is_dup);
}

#[tokio::test]
async fn testing_leaf_identities_match_the_entry_hashes() {
    let entry = Entry::new(treeline_testing::leaf(7));
    assert_eq!(*entry.identity(), leaf_identity(7));
}
