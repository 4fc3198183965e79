mod helpers;

use helpers::*;
use serde_json::json;

use chatlab_core::worker::{AbortToken, Request, Worker};
use chatlab_core::Settings;

const BASE: i64 = 1_699_963_200;

fn request(op: &str, payload: serde_json::Value) -> Request {
    serde_json::from_value(json!({"id": format!("t-{op}"), "op": op, "payload": payload})).unwrap()
}

fn request_bare(op: &str) -> Request {
    serde_json::from_value(json!({"id": format!("t-{op}"), "op": op})).unwrap()
}

fn spawn_worker(dirs: &chatlab_core::AppDirs) -> Worker {
    Worker::spawn(dirs.clone(), Settings::default()).unwrap()
}

fn import_via_worker(dirs: &chatlab_core::AppDirs, worker: &Worker) -> String {
    let export = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A"), member("11", "B")]),
        json!([
            msg("10", "A", BASE, "one"),
            msg("11", "B", BASE + 60, "two"),
            msg("10", "A", BASE + 120, "three"),
        ]),
    );
    let path = write_json(&dirs.temp(), "worker_import.json", &export);
    let response = worker.submit(request(
        "import.stream",
        json!({"path": path.to_string_lossy()}),
    ));
    assert!(response.ok, "import failed: {:?}", response.error);
    response.result.unwrap()["sessionId"]
        .as_str()
        .unwrap()
        .to_string()
}

#[test]
fn import_then_query_through_the_request_surface() {
    let (_tmp, dirs) = test_dirs();
    let worker = spawn_worker(&dirs);
    let session_id = import_via_worker(&dirs, &worker);

    let sessions = worker.submit(request_bare("session.getAll"));
    assert!(sessions.ok);
    let list = sessions.result.unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["id"], session_id.as_str());
    assert_eq!(list[0]["messageCount"], 3);

    let activity = worker.submit(request(
        "query.memberActivity",
        json!({"sessionId": session_id}),
    ));
    assert!(activity.ok);
    let rows = activity.result.unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 2);

    let hourly = worker.submit(request(
        "query.hourly",
        json!({"sessionId": session_id, "filter": {"startTs": BASE, "endTs": BASE + 60}}),
    ));
    assert!(hourly.ok);
    let buckets = hourly.result.unwrap();
    assert_eq!(buckets.as_array().unwrap().len(), 24);
    let total: u64 = buckets
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["count"].as_u64().unwrap())
        .sum();
    assert_eq!(total, 2); // boundary-inclusive window keeps two rows
}

#[test]
fn progress_events_stream_for_imports() {
    let (_tmp, dirs) = test_dirs();
    let worker = spawn_worker(&dirs);

    let export = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A")]),
        json!([msg("10", "A", BASE, "only")]),
    );
    let path = write_json(&dirs.temp(), "progress.json", &export);

    let (tx, rx) = crossbeam_channel::unbounded();
    let response = worker.submit_with(
        request("import.stream", json!({"path": path.to_string_lossy()})),
        Some(tx),
        AbortToken::new(),
    );
    assert!(response.ok);

    let events: Vec<_> = rx.try_iter().collect();
    assert!(!events.is_empty());
    let stages: Vec<String> = events
        .iter()
        .map(|e| {
            serde_json::to_value(&e.progress).unwrap()["stage"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(stages.first().map(String::as_str), Some("detect"));
    assert_eq!(stages.last().map(String::as_str), Some("done"));
    // bytes are monotone across parse progress
    let bytes: Vec<u64> = events
        .iter()
        .map(|e| {
            serde_json::to_value(&e.progress).unwrap()["bytesRead"]
                .as_u64()
                .unwrap()
        })
        .collect();
    let parse_bytes: Vec<u64> = bytes.iter().copied().filter(|b| *b > 0).collect();
    assert!(parse_bytes.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn rename_owner_and_delete_lifecycle() {
    let (_tmp, dirs) = test_dirs();
    let worker = spawn_worker(&dirs);
    let session_id = import_via_worker(&dirs, &worker);

    let renamed = worker.submit(request(
        "session.rename",
        json!({"sessionId": session_id, "name": "renamed"}),
    ));
    assert!(renamed.ok);

    let owner = worker.submit(request(
        "session.updateOwnerId",
        json!({"sessionId": session_id, "ownerId": 1}),
    ));
    assert!(owner.ok);

    let info = worker.submit(request("session.get", json!({"sessionId": session_id})));
    assert!(info.ok);
    let info = info.result.unwrap();
    assert_eq!(info["name"], "renamed");
    assert_eq!(info["ownerId"], 1);

    let deleted = worker.submit(request(
        "session.delete",
        json!({"sessionId": session_id}),
    ));
    assert!(deleted.ok);
    assert!(dirs.list_sessions().unwrap().is_empty());

    let gone = worker.submit(request("session.get", json!({"sessionId": session_id})));
    assert!(!gone.ok);
    assert_eq!(gone.error.unwrap().code, "not_found");
}

#[test]
fn member_aliases_and_name_history_ops() {
    let (_tmp, dirs) = test_dirs();
    let worker = spawn_worker(&dirs);
    let session_id = import_via_worker(&dirs, &worker);

    let members = worker.submit(request("member.list", json!({"sessionId": session_id})));
    assert!(members.ok);
    let members = members.result.unwrap();
    let member_id = members[0]["id"].as_i64().unwrap();

    let updated = worker.submit(request(
        "member.updateAliases",
        json!({"sessionId": session_id, "memberId": member_id, "aliases": ["老大", "boss"]}),
    ));
    assert!(updated.ok);

    let members = worker.submit(request("member.list", json!({"sessionId": session_id})));
    let listed = members.result.unwrap();
    let row = listed
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["id"].as_i64() == Some(member_id))
        .unwrap();
    assert_eq!(row["aliases"], json!(["老大", "boss"]));

    let history = worker.submit(request(
        "member.nameHistory",
        json!({"sessionId": session_id, "memberId": member_id}),
    ));
    assert!(history.ok);
}

#[test]
fn member_delete_clears_messages_and_index() {
    let (_tmp, dirs) = test_dirs();
    let worker = spawn_worker(&dirs);
    let session_id = import_via_worker(&dirs, &worker);

    let generated = worker.submit(request(
        "session.generateIndex",
        json!({"sessionId": session_id}),
    ));
    assert!(generated.ok);

    let store = open_session(&dirs, &session_id);
    let member_id = store.member_id("10").unwrap().unwrap();
    drop(store);

    let deleted = worker.submit(request(
        "member.delete",
        json!({"sessionId": session_id, "memberId": member_id}),
    ));
    assert!(deleted.ok);

    let has_index = worker.submit(request(
        "session.hasIndex",
        json!({"sessionId": session_id}),
    ));
    assert_eq!(has_index.result.unwrap()["hasIndex"], false);

    let store = open_session(&dirs, &session_id);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM message"), 1);
}

#[test]
fn sql_execute_is_read_only_and_bounded() {
    let (_tmp, dirs) = test_dirs();
    let worker = spawn_worker(&dirs);
    let session_id = import_via_worker(&dirs, &worker);

    let ok = worker.submit(request(
        "sql.execute",
        json!({"sessionId": session_id, "sql": "SELECT COUNT(*) AS n FROM message"}),
    ));
    assert!(ok.ok);
    assert_eq!(ok.result.unwrap()["rows"][0]["n"], 3);

    let rejected = worker.submit(request(
        "sql.execute",
        json!({"sessionId": session_id, "sql": "DELETE FROM message"}),
    ));
    assert!(!rejected.ok);
    assert_eq!(rejected.error.unwrap().code, "sql_error");

    let schema = worker.submit(request("sql.schema", json!({"sessionId": session_id})));
    assert!(schema.ok);
    let tables: Vec<String> = schema.result.unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert!(tables.contains(&"message".to_string()));
    assert!(tables.contains(&"member".to_string()));
}

#[test]
fn merge_ops_round_trip_through_worker() {
    let (_tmp, dirs) = test_dirs();
    let worker = spawn_worker(&dirs);

    let s1 = write_json(
        &dirs.temp(),
        "m1.json",
        &chatlab_export("G", "qq", json!([member("10", "A")]), json!([msg("10", "A", BASE + 100, "x")])),
    );
    let s2 = write_json(
        &dirs.temp(),
        "m2.json",
        &chatlab_export("G", "qq", json!([member("10", "A")]), json!([msg("10", "A", BASE + 100, "y")])),
    );

    let check = worker.submit(request(
        "merge.checkConflicts",
        json!({"paths": [s1.to_string_lossy(), s2.to_string_lossy()]}),
    ));
    assert!(check.ok);
    let report = check.result.unwrap();
    assert_eq!(report["conflicts"].as_array().unwrap().len(), 1);
    assert_eq!(report["conflicts"][0]["contentLength1"], 1);

    let merged = worker.submit(request(
        "merge.mergeFiles",
        json!({"paths": [s1.to_string_lossy(), s2.to_string_lossy()], "reimport": true}),
    ));
    assert!(merged.ok, "merge failed: {:?}", merged.error);
    let outcome = merged.result.unwrap();
    assert_eq!(outcome["messageCount"], 1);
    assert!(outcome["sessionId"].is_string());
}

#[test]
fn unknown_session_yields_not_found() {
    let (_tmp, dirs) = test_dirs();
    let worker = spawn_worker(&dirs);
    let response = worker.submit(request(
        "query.memberActivity",
        json!({"sessionId": "chat_0_nothere"}),
    ));
    assert!(!response.ok);
    assert_eq!(response.error.unwrap().code, "not_found");
}

#[test]
fn migration_check_reports_clean_on_fresh_stores() {
    let (_tmp, dirs) = test_dirs();
    let worker = spawn_worker(&dirs);
    import_via_worker(&dirs, &worker);

    let check = worker.submit(request_bare("migration.check"));
    assert!(check.ok);
    let report = check.result.unwrap();
    assert_eq!(report["storesBehind"], 0);
    assert_eq!(report["storeCount"], 1);

    let run = worker.submit(request_bare("migration.run"));
    assert!(run.ok);
    assert_eq!(run.result.unwrap()["storesMigrated"], 0);
}
