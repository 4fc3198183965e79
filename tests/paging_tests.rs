mod helpers;

use helpers::*;
use serde_json::json;

use chatlab_core::query::messages::{self, Cursor, SearchSpec};
use chatlab_core::types::QueryFilter;

const BASE: i64 = 1_699_963_200;

fn seeded(dirs: &chatlab_core::AppDirs, n: i64) -> String {
    let rows: Vec<serde_json::Value> = (0..n)
        .map(|i| {
            let sender = if i % 2 == 0 { ("10", "A") } else { ("11", "B") };
            msg(sender.0, sender.1, BASE + i, &format!("message {i}"))
        })
        .collect();
    let export = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A"), member("11", "B")]),
        json!(rows),
    );
    let path = write_json(&dirs.temp(), "paging.json", &export);
    import_file(dirs, &path).session_id
}

#[test]
fn before_and_after_page_strictly_around_the_cursor() {
    let (_tmp, dirs) = test_dirs();
    let store = open_session(&dirs, &seeded(&dirs, 10));
    let spec = SearchSpec::default();

    let recent = messages::recent(&store, &spec, 4).unwrap();
    assert_eq!(recent.messages.len(), 4);
    assert!(recent.has_more);
    // ascending ids, ending at the newest
    let ids: Vec<i64> = recent.messages.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![7, 8, 9, 10]);

    let before = messages::page(&store, &spec, Cursor::Before(Some(7)), 3).unwrap();
    let ids: Vec<i64> = before.messages.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![4, 5, 6]);
    assert!(before.has_more);

    let after = messages::page(&store, &spec, Cursor::After(8), 5).unwrap();
    let ids: Vec<i64> = after.messages.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![9, 10]);
    assert!(!after.has_more);
}

#[test]
fn has_more_growth_is_monotone() {
    let (_tmp, dirs) = test_dirs();
    let store = open_session(&dirs, &seeded(&dirs, 8));
    let spec = SearchSpec::default();

    for n in 1..7 {
        let page_n = messages::page(&store, &spec, Cursor::Before(Some(8)), n).unwrap();
        if page_n.has_more {
            let page_n1 = messages::page(&store, &spec, Cursor::Before(Some(8)), n + 1).unwrap();
            assert!(page_n1.messages.len() >= n + 1);
        }
    }
}

#[test]
fn keyword_or_group_matches_any_keyword() {
    let (_tmp, dirs) = test_dirs();
    let export = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A")]),
        json!([
            msg("10", "A", BASE, "apples are fine"),
            msg("10", "A", BASE + 1, "bananas too"),
            msg("10", "A", BASE + 2, "cherries neither"),
            msg("10", "A", BASE + 3, "100% guaranteed"),
        ]),
    );
    let path = write_json(&dirs.temp(), "kw.json", &export);
    let store = open_session(&dirs, &import_file(&dirs, &path).session_id);

    let spec = SearchSpec {
        keywords: vec!["apples".into(), "bananas".into()],
        ..Default::default()
    };
    let found = messages::search(&store, &spec).unwrap();
    assert_eq!(found.messages.len(), 2);

    // LIKE wildcards in keywords are literals
    let spec = SearchSpec {
        keywords: vec!["100%".into()],
        ..Default::default()
    };
    let found = messages::search(&store, &spec).unwrap();
    assert_eq!(found.messages.len(), 1);
    assert_eq!(found.messages[0].content.as_deref(), Some("100% guaranteed"));
}

#[test]
fn sender_filter_composes_with_keywords() {
    let (_tmp, dirs) = test_dirs();
    let store = open_session(&dirs, &seeded(&dirs, 10));
    let sender_b = store.member_id("11").unwrap().unwrap();

    let spec = SearchSpec {
        sender_id: Some(sender_b),
        keywords: vec!["message".into()],
        ..Default::default()
    };
    let found = messages::search(&store, &spec).unwrap();
    assert_eq!(found.messages.len(), 5);
    assert!(found.messages.iter().all(|m| m.sender_id == sender_b));
}

#[test]
fn context_unions_and_deduplicates_windows() {
    let (_tmp, dirs) = test_dirs();
    let store = open_session(&dirs, &seeded(&dirs, 10));

    // overlapping windows around 4 and 6 collapse into one run
    let rows = messages::context(&store, &[4, 6], 2).unwrap();
    let ids: Vec<i64> = rows.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![2, 3, 4, 5, 6, 7, 8]);

    // disjoint windows stay separate but ordered
    let rows = messages::context(&store, &[9, 2], 0).unwrap();
    let ids: Vec<i64> = rows.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![2, 9]);
}

#[test]
fn between_respects_filter_and_bounds() {
    let (_tmp, dirs) = test_dirs();
    let store = open_session(&dirs, &seeded(&dirs, 10));

    let rows = messages::between(&store, &QueryFilter::default(), BASE + 2, BASE + 5, 100).unwrap();
    assert_eq!(rows.len(), 4); // inclusive bounds
    assert!(rows.iter().all(|m| m.timestamp >= BASE + 2 && m.timestamp <= BASE + 5));
}

#[test]
fn filter_with_context_wraps_each_match() {
    let (_tmp, dirs) = test_dirs();
    let store = open_session(&dirs, &seeded(&dirs, 10));

    let spec = SearchSpec {
        keywords: vec!["message 4".into()],
        ..Default::default()
    };
    let matches = messages::filter_with_context(&store, &spec, 1).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].matched_id, 5); // ids are 1-based
    let ids: Vec<i64> = matches[0].messages.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![4, 5, 6]);
}
