mod helpers;

use helpers::*;
use serde_json::json;

use chatlab_core::query::behavior;
use chatlab_core::types::QueryFilter;

// midday UTC anchor, see query_tests
const BASE: i64 = 1_699_963_200;
const DAY: i64 = 86_400;

fn session_from(dirs: &chatlab_core::AppDirs, name: &str, messages: serde_json::Value) -> String {
    let export = chatlab_export(
        "G",
        "qq",
        json!([member("10", "A"), member("11", "B"), member("12", "C")]),
        messages,
    );
    let path = write_json(&dirs.temp(), name, &export);
    import_file(dirs, &path).session_id
}

#[test]
fn repeat_chains_require_multiple_senders() {
    let (_tmp, dirs) = test_dirs();
    let session = session_from(
        &dirs,
        "repeat.json",
        json!([
            msg("10", "A", BASE, "好活"),
            msg("11", "B", BASE + 1, "好活"),
            msg("12", "C", BASE + 2, "好活"),
            msg("10", "A", BASE + 10, "solo"),
            msg("10", "A", BASE + 11, "solo"),
            msg("11", "B", BASE + 20, "unrelated"),
        ]),
    );
    let store = open_session(&dirs, &session);

    let analysis = behavior::repeat(&store, &QueryFilter::default()).unwrap();
    assert_eq!(analysis.chains.len(), 1);
    assert_eq!(analysis.chains[0].content, "好活");
    assert_eq!(analysis.chains[0].count, 3);
    assert_eq!(analysis.chains[0].participant_count, 3);

    // B and C joined a chain started by A
    assert_eq!(analysis.top_repeaters.len(), 2);
    let repeater_names: Vec<&str> = analysis
        .top_repeaters
        .iter()
        .map(|r| r.account_name.as_str())
        .collect();
    assert!(repeater_names.contains(&"B") && repeater_names.contains(&"C"));
}

#[test]
fn catchphrase_needs_three_occurrences() {
    let (_tmp, dirs) = test_dirs();
    let session = session_from(
        &dirs,
        "catch.json",
        json!([
            msg("10", "A", BASE, "妙啊"),
            msg("10", "A", BASE + 10, "妙啊"),
            msg("10", "A", BASE + 20, "妙啊"),
            msg("10", "A", BASE + 30, "只说一次"),
            msg("11", "B", BASE + 40, "[图片]"),
            msg("11", "B", BASE + 50, "[图片]"),
            msg("11", "B", BASE + 60, "[图片]"),
        ]),
    );
    let store = open_session(&dirs, &session);

    let analysis = behavior::catchphrase(&store, &QueryFilter::default()).unwrap();
    assert_eq!(analysis.members.len(), 1);
    assert_eq!(analysis.members[0].account_name, "A");
    assert_eq!(analysis.members[0].phrases[0].phrase, "妙啊");
    assert_eq!(analysis.members[0].phrases[0].count, 3);
}

#[test]
fn dragon_king_counts_days_won() {
    let (_tmp, dirs) = test_dirs();
    let session = session_from(
        &dirs,
        "dragon.json",
        json!([
            // day 1: A wins 2:1
            msg("10", "A", BASE, "a1"),
            msg("10", "A", BASE + 10, "a2"),
            msg("11", "B", BASE + 20, "b1"),
            // day 2: B wins 2:0
            msg("11", "B", BASE + DAY, "b2"),
            msg("11", "B", BASE + DAY + 10, "b3"),
            // day 3: A wins 1:0
            msg("10", "A", BASE + 2 * DAY, "a3"),
        ]),
    );
    let store = open_session(&dirs, &session);

    let analysis = behavior::dragon_king(&store, &QueryFilter::default()).unwrap();
    assert_eq!(analysis.members[0].account_name, "A");
    assert_eq!(analysis.members[0].days_won, 2);
    let b = analysis
        .members
        .iter()
        .find(|m| m.account_name == "B")
        .unwrap();
    assert_eq!(b.days_won, 1);
}

#[test]
fn diving_ranks_longest_silence() {
    let (_tmp, dirs) = test_dirs();
    let session = session_from(
        &dirs,
        "diving.json",
        json!([
            msg("10", "A", BASE, "early then gone"),
            msg("11", "B", BASE + DAY, "still around"),
        ]),
    );
    let store = open_session(&dirs, &session);

    let analysis = behavior::diving(&store, &QueryFilter::default()).unwrap();
    assert_eq!(analysis.members[0].account_name, "A");
    assert_eq!(analysis.members[0].silent_seconds, DAY);
    assert_eq!(analysis.members[1].silent_seconds, 0);
}

#[test]
fn monologue_detects_runs_of_five() {
    let (_tmp, dirs) = test_dirs();
    let session = session_from(
        &dirs,
        "mono.json",
        json!([
            msg("10", "A", BASE, "1"),
            msg("10", "A", BASE + 1, "2"),
            msg("10", "A", BASE + 2, "3"),
            msg("10", "A", BASE + 3, "4"),
            msg("10", "A", BASE + 4, "5"),
            msg("10", "A", BASE + 5, "6"),
            msg("11", "B", BASE + 6, "interrupt"),
            msg("10", "A", BASE + 7, "short"),
            msg("10", "A", BASE + 8, "run"),
        ]),
    );
    let store = open_session(&dirs, &session);

    let analysis = behavior::monologue(&store, &QueryFilter::default()).unwrap();
    assert_eq!(analysis.members.len(), 1);
    assert_eq!(analysis.members[0].account_name, "A");
    assert_eq!(analysis.members[0].runs, 1);
    assert_eq!(analysis.members[0].longest_run, 6);
}

#[test]
fn mentions_resolve_names_nicknames_and_count_edges() {
    let (_tmp, dirs) = test_dirs();
    let session = session_from(
        &dirs,
        "mention.json",
        json!([
            msg("10", "A", BASE, "@B 在吗"),
            msg("10", "A", BASE + 1, "@B 看一下"),
            msg("11", "B", BASE + 2, "@A 来了"),
            msg("12", "C", BASE + 3, "no mention here"),
        ]),
    );
    let store = open_session(&dirs, &session);

    let analysis = behavior::mention(&store, &QueryFilter::default()).unwrap();
    assert_eq!(analysis.most_mentioned[0].account_name, "B");
    assert_eq!(analysis.most_mentioned[0].count, 2);
    assert_eq!(analysis.most_mentioning[0].account_name, "A");
    assert_eq!(analysis.most_mentioning[0].count, 2);

    let graph = behavior::mention_graph(&store, &QueryFilter::default()).unwrap();
    assert_eq!(graph.edges.len(), 2);
    assert_eq!(graph.edges[0].count, 2);
}

#[test]
fn laugh_counts_patterns_per_member() {
    let (_tmp, dirs) = test_dirs();
    let session = session_from(
        &dirs,
        "laugh.json",
        json!([
            msg("10", "A", BASE, "哈哈哈哈"),
            msg("10", "A", BASE + 1, "23333"),
            msg("10", "A", BASE + 2, "正经发言"),
            msg("11", "B", BASE + 3, "笑死我了"),
            msg("12", "C", BASE + 4, "nothing funny"),
        ]),
    );
    let store = open_session(&dirs, &session);

    let analysis = behavior::laugh(&store, &QueryFilter::default()).unwrap();
    let a = &analysis.members[0];
    assert_eq!(a.account_name, "A");
    assert_eq!(a.laugh_count, 2);
    assert_eq!(a.total_count, 3);
    assert!(analysis.members.iter().all(|m| m.account_name != "C"));
}

#[test]
fn meme_battle_needs_three_images_and_two_senders() {
    let (_tmp, dirs) = test_dirs();
    let session = session_from(
        &dirs,
        "meme.json",
        json!([
            typed_msg("10", "A", BASE, 1, "[图片]"),
            typed_msg("11", "B", BASE + 1, 1, "[图片]"),
            typed_msg("10", "A", BASE + 2, 5, "[表情]"),
            msg("12", "C", BASE + 3, "text breaks the run"),
            typed_msg("10", "A", BASE + 4, 1, "[图片]"),
            typed_msg("10", "A", BASE + 5, 1, "[图片]"),
            typed_msg("10", "A", BASE + 6, 1, "[图片]"),
        ]),
    );
    let store = open_session(&dirs, &session);

    let analysis = behavior::meme_battle(&store, &QueryFilter::default()).unwrap();
    // the second run is single-sender, so only one battle counts
    assert_eq!(analysis.battle_count, 1);
    assert_eq!(analysis.longest_battle, 3);
    assert_eq!(analysis.participants.len(), 2);
}

#[test]
fn check_in_tracks_streaks_across_days() {
    let (_tmp, dirs) = test_dirs();
    let session = session_from(
        &dirs,
        "checkin.json",
        json!([
            msg("10", "A", BASE, "d1"),
            msg("10", "A", BASE + 10, "d1 again"),
            msg("10", "A", BASE + DAY, "d2"),
            msg("10", "A", BASE + 2 * DAY, "d3"),
            msg("10", "A", BASE + 4 * DAY, "d5, streak broken"),
            msg("11", "B", BASE, "only once"),
        ]),
    );
    let store = open_session(&dirs, &session);

    let analysis = behavior::check_in(&store, &QueryFilter::default()).unwrap();
    let a = &analysis.members[0];
    assert_eq!(a.account_name, "A");
    assert_eq!(a.active_days, 4);
    assert_eq!(a.longest_streak, 3);
}

#[test]
fn night_owl_is_empty_for_daytime_corpus() {
    let (_tmp, dirs) = test_dirs();
    // local hour of BASE varies by zone, so only assert the invariant:
    // counts never exceed totals and ratios stay in (0, 1]
    let session = session_from(
        &dirs,
        "owl.json",
        json!([
            msg("10", "A", BASE, "x"),
            msg("10", "A", BASE + 3 * 3600, "y"),
            msg("11", "B", BASE + 6 * 3600, "z"),
        ]),
    );
    let store = open_session(&dirs, &session);

    let analysis = behavior::night_owl(&store, &QueryFilter::default()).unwrap();
    for row in &analysis.members {
        assert!(row.night_count >= 1);
        assert!(row.night_count <= row.total_count);
        assert!(row.ratio > 0.0 && row.ratio <= 1.0);
    }
}
