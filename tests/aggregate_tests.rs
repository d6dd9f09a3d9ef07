//! Integration tests for the aggregation engine and the persisted state.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use p1_rs::aggregate::{AggregateState, Aggregator, SnapshotTrigger};
use p1_rs::p1::telegram::Reading;
use proptest::prelude::*;

/// 2013-11-18 was a Monday.
fn monday(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2013, 11, 18)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn reading(timestamp: NaiveDateTime, energy_now: i64, off_peak: i64, gas: Option<i64>) -> Reading {
    Reading {
        timestamp,
        energy_now,
        energy_total_off_peak: off_peak,
        energy_total_peak: 1_000,
        gas_total: gas,
    }
}

/// Tests the Monday 23:xx to Tuesday 00:xx rollover end to end.
#[test]
fn test_day_rollover_monday_to_tuesday() {
    let mut agg = Aggregator::new(AggregateState::new(monday(23, 0)), true);
    agg.fold(&reading(monday(23, 10), 400, 5_000, Some(700)));
    agg.fold(&reading(monday(23, 50), 900, 5_100, Some(710)));

    let tuesday = monday(23, 50) + Duration::minutes(20);
    let triggers = agg.fold(&reading(tuesday, 250, 5_200, Some(720)));
    assert_eq!(triggers.len(), 2);

    match &triggers[0] {
        SnapshotTrigger::Hourly { day, hour, state } => {
            assert_eq!((*day, *hour), (1, 24));
            // Day-end slot carries the totals as of the new reading
            assert_eq!(state.hourly_total[24], Some(6_200));
            assert_eq!(state.gas_hourly_total.unwrap()[24], Some(720));
            assert_eq!(state.hourly_max[23], Some(900));
        }
        other => panic!("expected hourly trigger, got {other:?}"),
    }
    match &triggers[1] {
        SnapshotTrigger::Daily { date, state } => {
            assert_eq!(*date, NaiveDate::from_ymd_opt(2013, 11, 18).unwrap());
            let document = state.to_document(false).unwrap();
            assert!(!document.contains_key("eLastHourList"));
            assert_eq!(document["eDayMin"], 400);
            assert_eq!(document["eDayMax"], 900);
        }
        other => panic!("expected daily trigger, got {other:?}"),
    }

    let state = agg.state();
    assert_eq!((state.current_day, state.current_hour), (2, 0));
    assert_eq!(state.day_min, Some(250));
    assert_eq!(state.day_max, Some(250));
    assert_eq!(state.hourly_min[0], Some(250));
    assert_eq!(state.hourly_total[0], Some(6_200));
    assert_eq!(state.hourly_total[24], None);
    assert_eq!(state.hourly_max.populated(), 1);
    assert_eq!(state.gas_hourly_total.unwrap()[0], Some(720));
    assert_eq!(state.timestamp, Some(tuesday));
}

/// Tests that a restart after a skipped day turns the day over once.
#[test]
fn test_skipped_day_is_not_caught_up() {
    let mut agg = Aggregator::new(AggregateState::new(monday(10, 0)), false);
    agg.fold(&reading(monday(10, 5), 100, 10, None));

    let wednesday = monday(11, 5) + Duration::days(2);
    let triggers = agg.fold(&reading(wednesday, 200, 20, None));
    assert_eq!(triggers.len(), 1);
    assert!(matches!(triggers[0], SnapshotTrigger::Hourly { day: 1, hour: 11, .. }));
    assert_eq!(agg.state().current_day, 3);
}

/// Tests that a gas-absent run never writes gas keys.
#[test]
fn test_gas_absent_run_has_no_gas_keys() {
    let mut agg = Aggregator::new(AggregateState::new(monday(23, 0)), false);
    agg.fold(&reading(monday(23, 1), 100, 10, Some(55)));
    let triggers = agg.fold(&reading(monday(23, 1) + Duration::hours(1), 100, 10, None));

    let mut documents = vec![agg.state().to_document(true).unwrap()];
    for trigger in &triggers {
        let document = match trigger {
            SnapshotTrigger::Hourly { state, .. } => state.to_document(true),
            SnapshotTrigger::Daily { state, .. } => state.to_document(false),
        };
        documents.push(document.unwrap());
    }
    assert_eq!(documents.len(), 3);
    for document in documents {
        assert!(!document.contains_key("gasTotal"));
        assert!(!document.contains_key("gasHourlyTotalList"));
    }
}

/// Tests that a saved state reloads field for field.
#[test]
fn test_state_survives_save_and_reload() {
    let mut agg = Aggregator::new(AggregateState::new(monday(8, 0)), true);
    for (i, minute) in (0..50).step_by(10).enumerate() {
        let i = i as i64;
        agg.fold(&reading(monday(8, minute), 300 + i, 2_000 + i, Some(40 + i)));
    }
    agg.fold(&reading(monday(9, 1), 10, 2_100, None));

    let json = serde_json::to_string(&agg.state().to_document(true).unwrap()).unwrap();
    let reloaded = AggregateState::from_json(&json, monday(12, 0)).unwrap();
    assert_eq!(&reloaded, agg.state());
}

fn timeline() -> impl Strategy<Value = Vec<(i64, i64)>> {
    // (minutes since start, energyNow)
    proptest::collection::vec((1i64..180, 0i64..20_000), 1..200)
}

proptest! {
    #[test]
    fn prop_hourly_min_never_exceeds_max(steps in timeline()) {
        let start = monday(20, 0);
        let mut agg = Aggregator::new(AggregateState::new(start), false);
        let mut at = start;
        let mut total = 0;
        for (gap, now) in steps {
            at += Duration::minutes(gap);
            total += 1;
            agg.fold(&reading(at, now, total, None));

            let state = agg.state();
            for hour in 0..24 {
                if let (Some(min), Some(max)) = (state.hourly_min[hour], state.hourly_max[hour]) {
                    prop_assert!(min <= max);
                }
            }
            let day_min = state.day_min.unwrap();
            let day_max = state.day_max.unwrap();
            prop_assert!(day_min <= now && now <= day_max);
        }
    }
}
