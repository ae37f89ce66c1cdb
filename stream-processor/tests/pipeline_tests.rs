mod common;

use stream_processor::stages::{clean, validate};
use stream_processor::{Record, RejectReason, ValidationOutcome};

use common::{forbidden_words, text_engine, weather_engine};

#[tokio::test]
async fn test_text_scenarios_route_to_the_right_channel() {
    let harness = text_engine(3);
    harness.engine.start().await.unwrap();

    harness
        .engine
        .submit(Record::new("k1", "  hello   world  ", 0, 0))
        .await
        .unwrap();
    harness
        .engine
        .submit(Record::new("k2", "this is SPAM", 0, 1))
        .await
        .unwrap();

    let report = harness.engine.shutdown().await.unwrap();

    assert_eq!(
        harness.accepted.records(),
        vec![("k1".to_string(), "HELLO WORLD".to_string())]
    );
    assert_eq!(
        harness.dead_letter.records(),
        vec![("k2".to_string(), "this is SPAM".to_string())]
    );
    assert_eq!(report.counters.accepted, 1);
    assert_eq!(report.counters.rejected, 1);
}

#[tokio::test]
async fn test_every_record_is_routed_exactly_once() {
    let harness = text_engine(3);
    harness.engine.start().await.unwrap();

    let inputs = [
        "plain text",
        "",
        "   ",
        "hack the planet",
        "xxx",
        "  mixed   Case  words ",
        "spam",
        "fine",
    ];
    let long = "word ".repeat(40);

    let mut total = 0;
    for partition in 0..3 {
        for (offset, value) in inputs.iter().chain(std::iter::once(&long.as_str())).enumerate() {
            harness
                .engine
                .submit(Record::new(
                    format!("p{partition}-{offset}"),
                    *value,
                    partition,
                    offset as i64,
                ))
                .await
                .unwrap();
            total += 1;
        }
    }

    let report = harness.engine.shutdown().await.unwrap();

    let routed = harness.accepted.len() + harness.dead_letter.len();
    assert_eq!(routed, total);
    assert_eq!(report.counters.routed(), total as u64);
    assert_eq!(report.counters.accepted, harness.accepted.len() as u64);
    assert_eq!(report.counters.rejected, harness.dead_letter.len() as u64);

    // Nothing is both accepted and dead-lettered
    for (key, _) in harness.accepted.records() {
        assert!(!harness.dead_letter.records().iter().any(|(k, _)| *k == key));
    }
}

#[tokio::test]
async fn test_order_is_kept_within_a_partition() {
    let harness = text_engine(3);
    harness.engine.start().await.unwrap();

    for offset in 0..50 {
        harness
            .engine
            .submit(Record::new("same", format!("msg {offset}"), 4, offset))
            .await
            .unwrap();
    }
    let report = harness.engine.shutdown().await.unwrap();

    let expected: Vec<String> = (0..50).map(|i| format!("MSG {i}")).collect();
    assert_eq!(harness.accepted.values(), expected);
    assert_eq!(report.offsets.get(&4), Some(&50));
}

#[tokio::test]
async fn test_weather_scenarios() {
    let harness = weather_engine(None);
    harness.engine.start().await.unwrap();

    harness
        .engine
        .submit(Record::new("", "StationA,35.0,60.0", 0, 0))
        .await
        .unwrap();
    harness
        .engine
        .submit(Record::new("", "StationA,20.0,50.0", 0, 1))
        .await
        .unwrap();

    let report = harness.engine.shutdown().await.unwrap();

    assert_eq!(
        harness.results.records(),
        vec![(
            "StationA".to_string(),
            "StationA : Température Moyenne = 95.00°F, Humidité Moyenne = 60.00%".to_string()
        )]
    );
    let state = harness.store.get("StationA").unwrap();
    assert_eq!(state.count, 1);
    assert_eq!(report.counters.results, 1);
    assert_eq!(report.counters.dropped, 1);
}

#[tokio::test]
async fn test_averages_are_exact_across_partitions() {
    let harness = weather_engine(None);
    harness.engine.start().await.unwrap();

    let readings = [(31.0, 10.0), (32.0, 20.0), (33.0, 30.0), (34.0, 40.0)];
    for (i, (temp, humidity)) in readings.iter().enumerate() {
        let partition = (i % 2) as i32;
        harness
            .engine
            .submit(Record::new(
                "",
                format!("StationZ,{temp},{humidity}"),
                partition,
                i as i64,
            ))
            .await
            .unwrap();
    }
    harness.engine.shutdown().await.unwrap();

    let state = harness.store.get("StationZ").unwrap();
    assert_eq!(state.count, 4);
    let expected_a: f64 = readings.iter().map(|(t, _)| t * 9.0 / 5.0 + 32.0).sum();
    assert!((state.sum_metric_a - expected_a).abs() < 1e-9);
    assert_eq!(state.sum_metric_b, 100.0);
    assert_eq!(harness.results.len(), 4);
}

#[tokio::test]
async fn test_unparseable_readings_are_dead_lettered() {
    let harness = weather_engine(None);
    harness.engine.start().await.unwrap();

    for (offset, value) in ["StationA,abc,60", "StationA,35", ",35,60", "StationA,inf,1"]
        .into_iter()
        .enumerate()
    {
        harness
            .engine
            .submit(Record::new("raw", value, 0, offset as i64))
            .await
            .unwrap();
    }
    let report = harness.engine.shutdown().await.unwrap();

    assert_eq!(harness.dead_letter.len(), 4);
    assert!(harness.results.is_empty());
    assert!(harness.store.is_empty());
    assert_eq!(report.counters.rejected, 4);
}

#[test]
fn test_clean_is_idempotent_and_normalises_whitespace() {
    let samples = ["  a  b\t\tc \n", "already CLEAN", "", "\u{00e9}t\u{00e9}  chaud"];
    for sample in samples {
        let once = clean(sample);
        assert_eq!(clean(&once), once);
        assert!(!once.starts_with(' ') && !once.ends_with(' '));
        assert!(!once.contains("  "));
        assert_eq!(once, once.to_uppercase());
    }
}

#[test]
fn test_forbidden_words_are_detected_after_cleaning() {
    for word in forbidden_words() {
        let cleaned = clean(&format!("some {} here", word.to_lowercase()));
        assert_eq!(
            validate(&cleaned, &forbidden_words(), 100),
            ValidationOutcome::Rejected(RejectReason::ForbiddenWord)
        );
    }
}
