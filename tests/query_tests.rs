mod helpers;

use helpers::*;
use serde_json::json;

use chatlab_core::query::{aggregates, session_index};
use chatlab_core::types::QueryFilter;

// 2023-11-14 12:00:00 UTC — midday, so the ±14h zoo of local zones
// keeps the seeded messages on one calendar day
const BASE: i64 = 1_699_963_200;

fn seeded_session(dirs: &chatlab_core::AppDirs) -> String {
    // two humans and the system author, across two days
    let export = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A"), member("11", "B"), member("sys", "系统消息")]),
        json!([
            msg("10", "A", BASE, "one"),
            msg("10", "A", BASE + 60, "two"),
            msg("11", "B", BASE + 120, "three"),
            msg("sys", "系统消息", BASE + 180, "joined the group"),
            msg("11", "B", BASE + 86_400, "next day"),
        ]),
    );
    let path = write_json(&dirs.temp(), "seed.json", &export);
    import_file(dirs, &path).session_id
}

#[test]
fn member_activity_excludes_system_author_and_sums_to_100() {
    let (_tmp, dirs) = test_dirs();
    let store = open_session(&dirs, &seeded_session(&dirs));

    let rows = aggregates::member_activity(&store, &QueryFilter::default()).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.account_name != "系统消息"));
    assert_eq!(rows[0].count, 2);
    assert_eq!(rows[0].percentage, 50.0);
    let pct_sum: f64 = rows.iter().map(|r| r.percentage).sum();
    assert!((pct_sum - 100.0).abs() < 0.01);
}

#[test]
fn bucket_sums_match_filtered_count() {
    let (_tmp, dirs) = test_dirs();
    let store = open_session(&dirs, &seeded_session(&dirs));
    let filter = QueryFilter::default();

    let expected = aggregates::count(&store, &filter).unwrap();
    assert_eq!(expected, 4); // system author excluded

    for buckets in [
        aggregates::hourly(&store, &filter).unwrap(),
        aggregates::weekday(&store, &filter).unwrap(),
        aggregates::monthly(&store, &filter).unwrap(),
    ] {
        let total: u64 = buckets.iter().map(|b| b.count).sum();
        assert_eq!(total, expected);
    }
    let yearly_total: u64 = aggregates::yearly(&store, &filter)
        .unwrap()
        .iter()
        .map(|y| y.count)
        .sum();
    assert_eq!(yearly_total, expected);
}

#[test]
fn fixed_distributions_materialize_all_buckets() {
    let (_tmp, dirs) = test_dirs();
    let store = open_session(&dirs, &seeded_session(&dirs));
    let filter = QueryFilter::default();

    let hourly = aggregates::hourly(&store, &filter).unwrap();
    assert_eq!(hourly.len(), 24);
    assert_eq!(hourly[0].bucket, 0);
    assert_eq!(hourly[23].bucket, 23);

    let weekday = aggregates::weekday(&store, &filter).unwrap();
    assert_eq!(weekday.len(), 7);
    assert_eq!(weekday[0].bucket, 1);
    assert_eq!(weekday[6].bucket, 7);

    let monthly = aggregates::monthly(&store, &filter).unwrap();
    assert_eq!(monthly.len(), 12);
}

#[test]
fn yearly_reports_only_years_with_messages() {
    let (_tmp, dirs) = test_dirs();
    let store = open_session(&dirs, &seeded_session(&dirs));
    let years = aggregates::yearly(&store, &QueryFilter::default()).unwrap();
    assert_eq!(years.len(), 1);
    assert_eq!(
        aggregates::available_years(&store, &QueryFilter::default()).unwrap(),
        vec![years[0].year]
    );
}

#[test]
fn filter_boundaries_are_inclusive() {
    let (_tmp, dirs) = test_dirs();
    let store = open_session(&dirs, &seeded_session(&dirs));

    let filter = QueryFilter {
        start_ts: Some(BASE),
        end_ts: Some(BASE + 120),
        member_id: None,
    };
    assert_eq!(aggregates::count(&store, &filter).unwrap(), 3);

    let member_filter = QueryFilter {
        start_ts: None,
        end_ts: None,
        member_id: store.member_id("11").unwrap(),
    };
    assert_eq!(aggregates::count(&store, &member_filter).unwrap(), 2);
}

#[test]
fn time_range_covers_all_rows_and_nulls_when_empty() {
    let (_tmp, dirs) = test_dirs();
    let store = open_session(&dirs, &seeded_session(&dirs));

    let range = aggregates::time_range(&store, &QueryFilter::default())
        .unwrap()
        .unwrap();
    assert_eq!(range.min_ts, BASE);
    assert_eq!(range.max_ts, BASE + 86_400);

    let empty = QueryFilter {
        start_ts: Some(BASE + 1_000_000),
        end_ts: None,
        member_id: None,
    };
    assert!(aggregates::time_range(&store, &empty).unwrap().is_none());
    assert!(aggregates::daily(&store, &empty).unwrap().is_empty());
}

#[test]
fn daily_trend_has_one_row_per_present_day() {
    let (_tmp, dirs) = test_dirs();
    let store = open_session(&dirs, &seeded_session(&dirs));
    let days = aggregates::daily(&store, &QueryFilter::default()).unwrap();
    assert_eq!(days.len(), 2);
    let total: u64 = days.iter().map(|d| d.count).sum();
    assert_eq!(total, 4);
}

#[test]
fn length_distribution_groups_ranges_over_detail() {
    let (_tmp, dirs) = test_dirs();
    let export = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A")]),
        json!([
            msg("10", "A", BASE, "abc"),
            msg("10", "A", BASE + 1, "abc"),
            msg("10", "A", BASE + 2, "abcdefgh"),
        ]),
    );
    let path = write_json(&dirs.temp(), "len.json", &export);
    let store = open_session(&dirs, &import_file(&dirs, &path).session_id);

    let dist = aggregates::length_distribution(&store, &QueryFilter::default()).unwrap();
    let three = dist.detail.iter().find(|d| d.length == 3).unwrap();
    assert_eq!(three.count, 2);
    let short_range = dist.ranges.iter().find(|r| r.label == "1-5").unwrap();
    assert_eq!(short_range.count, 2);
    let mid_range = dist.ranges.iter().find(|r| r.label == "6-10").unwrap();
    assert_eq!(mid_range.count, 1);
}

#[test]
fn type_distribution_counts_per_wire_type() {
    let (_tmp, dirs) = test_dirs();
    let export = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A")]),
        json!([
            typed_msg("10", "A", BASE, 0, "text"),
            typed_msg("10", "A", BASE + 1, 1, "[图片]"),
            typed_msg("10", "A", BASE + 2, 1, "[图片]"),
            typed_msg("10", "A", BASE + 3, 20, "红包"),
        ]),
    );
    let path = write_json(&dirs.temp(), "types.json", &export);
    let store = open_session(&dirs, &import_file(&dirs, &path).session_id);

    let dist = aggregates::type_distribution(&store, &QueryFilter::default()).unwrap();
    let image = dist.iter().find(|t| t.msg_type == 1).unwrap();
    assert_eq!(image.count, 2);
    assert!(dist.iter().any(|t| t.msg_type == 20 && t.count == 1));
}

#[test]
fn session_index_splits_on_gap_threshold() {
    let (_tmp, dirs) = test_dirs();
    let export = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A")]),
        json!([
            msg("10", "A", BASE, "a"),
            msg("10", "A", BASE + 100, "b"),
            msg("10", "A", BASE + 5_000, "c"),
            msg("10", "A", BASE + 5_100, "d"),
            msg("10", "A", BASE + 5_200, "e"),
        ]),
    );
    let path = write_json(&dirs.temp(), "gaps.json", &export);
    let session_id = import_file(&dirs, &path).session_id;
    let store = chatlab_core::store::SessionStore::open(&dirs.session_db(&session_id)).unwrap();

    assert!(!session_index::has_index(&store).unwrap());
    let stats = session_index::generate(&store, 1800).unwrap();
    assert_eq!(stats.entry_count, 2);
    assert_eq!(stats.total_messages, 5);
    assert_eq!(stats.longest, 3);

    let entries = session_index::entries(&store).unwrap();
    assert_eq!(entries[0].start_ts, BASE);
    assert_eq!(entries[0].end_ts, BASE + 100);
    assert_eq!(entries[0].message_count, 2);
    assert_eq!(entries[1].message_count, 3);

    // a coarser threshold rebuilds into a single run
    let stats = session_index::generate(&store, 10_000).unwrap();
    assert_eq!(stats.entry_count, 1);

    store.clear_session_index().unwrap();
    assert!(!session_index::has_index(&store).unwrap());
    assert!(session_index::stats(&store).unwrap().is_none());
}
