mod helpers;

use helpers::*;
use serde_json::json;

#[test]
fn name_changes_produce_interval_history() {
    let (_tmp, dirs) = test_dirs();
    let base = 1_700_000_000i64;
    let export = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A")]),
        json!([
            msg("10", "A", base + 1, "m1"),
            msg("10", "B", base + 2, "m2"),
            msg("10", "B", base + 3, "m3"),
            msg("10", "A", base + 4, "m4"),
        ]),
    );
    let path = write_json(&dirs.temp(), "names.json", &export);

    let outcome = import_file(&dirs, &path);
    let store = open_session(&dirs, &outcome.session_id);
    let member_id = store.member_id("10").unwrap().unwrap();

    // most recent first
    let history = store.name_history(member_id).unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|h| h.name_type == "account_name"));

    let mut ordered = history.clone();
    ordered.sort_by_key(|h| h.start_ts);
    assert_eq!(ordered[0].name, "A");
    assert_eq!(ordered[0].start_ts, base + 1);
    assert_eq!(ordered[0].end_ts, Some(base + 2));
    assert_eq!(ordered[1].name, "B");
    assert_eq!(ordered[1].start_ts, base + 2);
    assert_eq!(ordered[1].end_ts, Some(base + 4));
    assert_eq!(ordered[2].name, "A");
    assert_eq!(ordered[2].start_ts, base + 4);
    assert_eq!(ordered[2].end_ts, None);

    // member row shows the latest name
    let members = store.list_members().unwrap();
    assert_eq!(members[0].account_name, "A");
}

#[test]
fn stable_names_persist_no_history() {
    let (_tmp, dirs) = test_dirs();
    let base = 1_700_000_000i64;
    let export = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A")]),
        json!([
            msg("10", "A", base + 1, "m1"),
            msg("10", "A", base + 500, "m2"),
        ]),
    );
    let path = write_json(&dirs.temp(), "stable.json", &export);

    let outcome = import_file(&dirs, &path);
    let store = open_session(&dirs, &outcome.session_id);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM member_name_history"), 0);
}

#[test]
fn at_most_one_open_interval_per_member_and_kind() {
    let (_tmp, dirs) = test_dirs();
    let base = 1_700_000_000i64;
    let export = chatlab_export(
        "G",
        "qq",
        json!([]),
        json!([
            {"sender": "10", "accountName": "A", "groupNickname": "x", "timestamp": base + 1, "type": 0, "content": "m"},
            {"sender": "10", "accountName": "B", "groupNickname": "y", "timestamp": base + 2, "type": 0, "content": "m"},
            {"sender": "10", "accountName": "A", "groupNickname": "x", "timestamp": base + 3, "type": 0, "content": "m"},
        ]),
    );
    let path = write_json(&dirs.temp(), "open.json", &export);

    let outcome = import_file(&dirs, &path);
    let store = open_session(&dirs, &outcome.session_id);
    let open_per_kind: i64 = count(
        &store,
        "SELECT COALESCE(MAX(open_count), 0) FROM (
             SELECT member_id, name_type, COUNT(*) AS open_count
             FROM member_name_history WHERE end_ts IS NULL
             GROUP BY member_id, name_type)",
    );
    assert_eq!(open_per_kind, 1);

    // nickname history tracked independently of account names
    assert_eq!(
        count(&store, "SELECT COUNT(*) FROM member_name_history WHERE name_type = 'group_nickname'"),
        3
    );
}
