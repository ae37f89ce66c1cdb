mod common;

use std::collections::BTreeMap;

use stream_processor::record::AggregateState;
use stream_processor::store::SnapshotFile;
use stream_processor::Record;
use tempfile::TempDir;

use common::weather_engine;

/// Readings spread over two partitions: (partition, offset, value)
fn readings() -> Vec<(i32, i64, String)> {
    let stations = ["StationA", "StationB", "StationC"];
    (0..24)
        .map(|i| {
            let partition = (i % 2) as i32;
            let offset = (i / 2) as i64;
            let station = stations[i % stations.len()];
            let temp = 25.0 + (i % 10) as f64;
            let humidity = 40.0 + i as f64;
            (partition, offset, format!("{station},{temp},{humidity}"))
        })
        .collect()
}

fn states(store: &stream_processor::KeyedAggregateStore) -> BTreeMap<String, AggregateState> {
    store
        .snapshot()
        .entries
        .into_iter()
        .map(|(key, entry)| (key, entry.state))
        .collect()
}

/// Sums from different partitions may be added in a different order, so
/// compare them with a tolerance
fn assert_same_states(
    actual: &BTreeMap<String, AggregateState>,
    expected: &BTreeMap<String, AggregateState>,
) {
    assert_eq!(
        actual.keys().collect::<Vec<_>>(),
        expected.keys().collect::<Vec<_>>()
    );
    for (key, expected_state) in expected {
        let state = &actual[key];
        assert_eq!(state.count, expected_state.count, "count for {key}");
        assert!((state.sum_metric_a - expected_state.sum_metric_a).abs() < 1e-9);
        assert!((state.sum_metric_b - expected_state.sum_metric_b).abs() < 1e-9);
    }
}

async fn uninterrupted_run() -> BTreeMap<String, AggregateState> {
    let harness = weather_engine(None);
    harness.engine.start().await.unwrap();
    for (partition, offset, value) in readings() {
        harness
            .engine
            .submit(Record::new("", value, partition, offset))
            .await
            .unwrap();
    }
    harness.engine.shutdown().await.unwrap();
    states(&harness.store)
}

#[tokio::test]
async fn test_restart_from_uncommitted_offsets_matches_uninterrupted_run() {
    let expected = uninterrupted_run().await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    let all = readings();

    // First run processes the first 16 readings and snapshots on drain
    let first = weather_engine(Some(SnapshotFile::new(&path)));
    first.engine.start().await.unwrap();
    for (partition, offset, value) in all.iter().take(16).cloned() {
        first
            .engine
            .submit(Record::new("", value, partition, offset))
            .await
            .unwrap();
    }
    let report = first.engine.shutdown().await.unwrap();
    assert_eq!(report.snapshot_keys, Some(3));

    // Pretend only offsets < 3 were committed: the restart replays from there
    let second = weather_engine(Some(SnapshotFile::new(&path)));
    second.engine.start().await.unwrap();
    assert_eq!(second.store.len(), 3);

    for (partition, offset, value) in all.iter().filter(|(_, offset, _)| *offset >= 3).cloned() {
        second
            .engine
            .submit(Record::new("", value, partition, offset))
            .await
            .unwrap();
    }
    let report = second.engine.shutdown().await.unwrap();

    assert_same_states(&states(&second.store), &expected);
    // Hot readings at offsets 3 and 4 of both partitions were already absorbed
    assert_eq!(report.counters.replayed, 4);
}

#[tokio::test]
async fn test_mid_run_snapshot_then_full_replay() {
    let expected = uninterrupted_run().await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("store.json");
    let all = readings();

    let first = weather_engine(Some(SnapshotFile::new(&path)));
    first.engine.start().await.unwrap();
    for (partition, offset, value) in all.iter().take(10).cloned() {
        first
            .engine
            .submit(Record::new("", value, partition, offset))
            .await
            .unwrap();
    }
    let tracker = first.engine.offset_tracker().clone();
    assert!(
        common::wait_for(|| {
            tracker.get_partition_offset(0) == Some(5) && tracker.get_partition_offset(1) == Some(5)
        })
        .await
    );
    let snapshot = first.engine.snapshot().await.unwrap().unwrap();
    assert_eq!(snapshot.key_count(), 3);
    // Crash: the first engine is dropped without draining
    drop(first);

    let second = weather_engine(Some(SnapshotFile::new(&path)));
    second.engine.start().await.unwrap();
    for (partition, offset, value) in all.iter().cloned() {
        second
            .engine
            .submit(Record::new("", value, partition, offset))
            .await
            .unwrap();
    }
    let report = second.engine.shutdown().await.unwrap();

    assert_same_states(&states(&second.store), &expected);
    let counters = report.counters;
    assert_eq!(counters.replayed + counters.dropped + counters.results, 24);
}

#[tokio::test]
async fn test_missing_snapshot_starts_empty() {
    let dir = TempDir::new().unwrap();
    let harness = weather_engine(Some(SnapshotFile::new(dir.path().join("absent.json"))));

    harness.engine.start().await.unwrap();
    assert!(harness.store.is_empty());
    harness.engine.shutdown().await.unwrap();

    assert!(dir.path().join("absent.json").exists());
}

#[tokio::test]
async fn test_crash_after_commit_resumes_without_losing_updates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    let reading = |offset: i64| {
        Record::new("", format!("StationA,{}.0,50.0", 31 + offset), 0, offset)
    };

    let first = weather_engine(Some(SnapshotFile::new(&path)));
    first.engine.start().await.unwrap();
    for offset in 0..5 {
        first.engine.submit(reading(offset)).await.unwrap();
    }
    let tracker = first.engine.offset_tracker().clone();
    assert!(common::wait_for(|| tracker.get_partition_offset(0) == Some(5)).await);

    // What the Kafka source would commit on its next tick
    let committed = first.engine.committable_offsets().await.unwrap();
    assert_eq!(committed.get(&0), Some(&5));
    assert!(path.exists());

    // More input lands after the commit, then the process dies without draining
    for offset in 5..7 {
        first.engine.submit(reading(offset)).await.unwrap();
    }
    assert!(common::wait_for(|| tracker.get_partition_offset(0) == Some(7)).await);
    drop(first);

    let second = weather_engine(Some(SnapshotFile::new(&path)));
    second.engine.start().await.unwrap();
    for offset in committed[&0]..8 {
        second.engine.submit(reading(offset)).await.unwrap();
    }
    second.engine.shutdown().await.unwrap();

    let state = second.store.get("StationA").unwrap();
    assert_eq!(state.count, 8);
    assert_eq!(state.sum_metric_b, 400.0);
}

#[tokio::test]
async fn test_result_lost_to_a_halted_partition_is_emitted_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");

    let first = weather_engine(Some(SnapshotFile::new(&path)));
    first.results.fail_permanently();
    first.engine.start().await.unwrap();
    first
        .engine
        .submit(Record::new("", "StationA,35.0,60.0", 0, 0))
        .await
        .unwrap();
    let report = first.engine.shutdown().await.unwrap();

    assert_eq!(report.failed_partitions(), vec![0]);
    assert_eq!(report.offsets.get(&0), None);
    assert_eq!(report.snapshot_keys, Some(1));
    assert!(first.results.is_empty());

    // Uncommitted, so the record is delivered again
    let second = weather_engine(Some(SnapshotFile::new(&path)));
    second.engine.start().await.unwrap();
    second
        .engine
        .submit(Record::new("", "StationA,35.0,60.0", 0, 0))
        .await
        .unwrap();
    let report = second.engine.shutdown().await.unwrap();

    assert_eq!(
        second.results.records(),
        vec![(
            "StationA".to_string(),
            "StationA : Température Moyenne = 95.00°F, Humidité Moyenne = 60.00%".to_string()
        )]
    );
    assert_eq!(second.store.get("StationA").unwrap().count, 1);
    assert_eq!(report.counters.replayed, 1);
    assert_eq!(report.offsets.get(&0), Some(&1));
}
