mod helpers;

use helpers::*;
use serde_json::json;

use chatlab_core::import::{incremental, ImportOptions};
use chatlab_core::query::session_index;

const BASE: i64 = 1_699_963_200;

#[test]
fn analyze_reports_counts_without_writing() {
    let (_tmp, dirs) = test_dirs();
    let first = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A")]),
        json!([msg("10", "A", BASE, "one"), msg("10", "A", BASE + 10, "two")]),
    );
    let path = write_json(&dirs.temp(), "first.json", &first);
    let session_id = import_file(&dirs, &path).session_id;

    let second = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A"), member("11", "B")]),
        json!([
            msg("10", "A", BASE, "one"),
            msg("11", "B", BASE + 20, "new sender"),
        ]),
    );
    let second_path = write_json(&dirs.temp(), "second.json", &second);

    let analysis = incremental::analyze(
        &dirs,
        &session_id,
        &second_path,
        &ImportOptions::default(),
    )
    .unwrap();
    assert_eq!(analysis.new, 1);
    assert_eq!(analysis.duplicate, 1);
    assert_eq!(analysis.total, 2);

    let store = open_session(&dirs, &session_id);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM message"), 2);
}

#[test]
fn incremental_import_appends_only_new_messages() {
    let (_tmp, dirs) = test_dirs();
    let first = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A")]),
        json!([msg("10", "A", BASE, "one"), msg("10", "A", BASE + 10, "two")]),
    );
    let path = write_json(&dirs.temp(), "first.json", &first);
    let session_id = import_file(&dirs, &path).session_id;

    let second = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A"), member("11", "B")]),
        json!([
            msg("10", "A", BASE + 10, "two"),
            msg("11", "B", BASE + 20, "three"),
        ]),
    );
    let second_path = write_json(&dirs.temp(), "second.json", &second);

    let outcome = incremental::import(
        &dirs,
        &session_id,
        &second_path,
        &ImportOptions::default(),
        &mut |_| {},
    )
    .unwrap();
    assert_eq!(outcome.added, 1);
    assert_eq!(outcome.duplicate, 1);

    let store = open_session(&dirs, &session_id);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM message"), 3);
    // monotone ids: the appended message has the highest id
    assert_eq!(
        count(&store, "SELECT ts FROM message ORDER BY id DESC LIMIT 1"),
        BASE + 20
    );
}

#[test]
fn incremental_import_is_idempotent() {
    let (_tmp, dirs) = test_dirs();
    let export = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A")]),
        json!([msg("10", "A", BASE, "one"), msg("10", "A", BASE + 10, "two")]),
    );
    let path = write_json(&dirs.temp(), "idem.json", &export);
    let session_id = import_file(&dirs, &path).session_id;

    let first = incremental::import(
        &dirs,
        &session_id,
        &path,
        &ImportOptions::default(),
        &mut |_| {},
    )
    .unwrap();
    assert_eq!(first.added, 0);
    assert_eq!(first.duplicate, 2);

    let second = incremental::import(
        &dirs,
        &session_id,
        &path,
        &ImportOptions::default(),
        &mut |_| {},
    )
    .unwrap();
    assert_eq!(second.added, 0);

    let store = open_session(&dirs, &session_id);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM message"), 2);
}

#[test]
fn session_index_regenerates_after_incremental_import() {
    let (_tmp, dirs) = test_dirs();
    let export = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A")]),
        json!([msg("10", "A", BASE, "one")]),
    );
    let path = write_json(&dirs.temp(), "reindex.json", &export);
    let session_id = import_file(&dirs, &path).session_id;

    {
        let store =
            chatlab_core::store::SessionStore::open(&dirs.session_db(&session_id)).unwrap();
        session_index::generate(&store, 1800).unwrap();
    }

    let more = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A")]),
        json!([msg("10", "A", BASE + 10_000, "far later")]),
    );
    let more_path = write_json(&dirs.temp(), "more.json", &more);
    incremental::import(
        &dirs,
        &session_id,
        &more_path,
        &ImportOptions::default(),
        &mut |_| {},
    )
    .unwrap();

    let store = open_session(&dirs, &session_id);
    let stats = session_index::stats(&store).unwrap().unwrap();
    assert_eq!(stats.entry_count, 2);
    assert_eq!(stats.total_messages, 2);
}
