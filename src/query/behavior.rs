//! Behavioral analyses over the filtered message set.
//!
//! Each analysis is a single ordered pass: the filtered, system-author
//! excluded messages stream out of SQLite in `(ts, id)` order and fold
//! into per-member state. Memory stays proportional to the member
//! count, not the message count.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{Datelike, TimeZone, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::params_from_iter;
use serde::Serialize;

use crate::parse::heuristics;
use crate::query::{filter_sql, FilterSql};
use crate::store::SessionStore;
use crate::types::{MessageType, QueryFilter};

const TOP_N: usize = 20;
/// Minimum run length for a monologue.
const MONOLOGUE_MIN: usize = 5;
/// Minimum run length for a meme battle.
const MEME_BATTLE_MIN: usize = 3;
/// Minimum occurrences for a catchphrase.
const CATCHPHRASE_MIN: u64 = 3;

struct MsgRow {
    sender_id: i64,
    account_name: String,
    ts: i64,
    msg_type: i64,
    content: Option<String>,
}

/// Stream the filtered set in `(ts, id)` order.
fn for_each_message(
    store: &SessionStore,
    filter: &QueryFilter,
    mut f: impl FnMut(&MsgRow),
) -> Result<()> {
    let FilterSql { clause, params } = filter_sql(filter, true);
    let sql = format!(
        "SELECT m.sender_id, m.sender_account_name, m.ts, m.type, m.content
         FROM message m {clause} ORDER BY m.ts, m.id"
    );
    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        Ok(MsgRow {
            sender_id: row.get(0)?,
            account_name: row.get(1)?,
            ts: row.get(2)?,
            msg_type: row.get(3)?,
            content: row.get(4)?,
        })
    })?;
    for row in rows {
        f(&row?);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberCount {
    pub member_id: i64,
    pub account_name: String,
    pub count: u64,
}

fn top_member_counts(map: HashMap<i64, (String, u64)>, limit: usize) -> Vec<MemberCount> {
    let mut rows: Vec<MemberCount> = map
        .into_iter()
        .map(|(member_id, (account_name, count))| MemberCount {
            member_id,
            account_name,
            count,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then(a.member_id.cmp(&b.member_id)));
    rows.truncate(limit);
    rows
}

fn local_day(ts: i64) -> Option<(i32, u32, u32)> {
    let dt = chrono::Local.timestamp_opt(ts, 0).single()?;
    Some((dt.year(), dt.month(), dt.day()))
}

fn local_day_number(ts: i64) -> i64 {
    // days since epoch in local time, for streak arithmetic
    chrono::Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.date_naive().num_days_from_ce() as i64)
        .unwrap_or(0)
}

// ─── repeat (复读) ───

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatChain {
    pub content: String,
    pub count: u64,
    pub participant_count: u64,
    pub start_ts: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatAnalysis {
    pub chains: Vec<RepeatChain>,
    /// Members ranked by how often they joined a chain someone else
    /// started.
    pub top_repeaters: Vec<MemberCount>,
}

/// Runs of identical non-empty text from ≥2 senders.
pub fn repeat(store: &SessionStore, filter: &QueryFilter) -> Result<RepeatAnalysis> {
    struct Chain {
        content: String,
        count: u64,
        senders: Vec<i64>,
        start_ts: i64,
    }
    let mut chains: Vec<RepeatChain> = Vec::new();
    let mut repeaters: HashMap<i64, (String, u64)> = HashMap::new();
    let mut current: Option<Chain> = None;

    for_each_message(store, filter, |msg| {
        let text = match (&msg.content, msg.msg_type) {
            (Some(c), t) if t == MessageType::Text.as_wire() && !c.is_empty() => c.clone(),
            _ => {
                flush_chain(&mut current, &mut chains);
                return;
            }
        };
        match current.as_mut() {
            Some(chain) if chain.content == text => {
                chain.count += 1;
                if !chain.senders.contains(&msg.sender_id) {
                    chain.senders.push(msg.sender_id);
                    let entry = repeaters
                        .entry(msg.sender_id)
                        .or_insert_with(|| (msg.account_name.clone(), 0));
                    entry.1 += 1;
                }
            }
            _ => {
                flush_chain(&mut current, &mut chains);
                current = Some(Chain {
                    content: text,
                    count: 1,
                    senders: vec![msg.sender_id],
                    start_ts: msg.ts,
                });
            }
        }
    })?;
    flush_chain(&mut current, &mut chains);

    fn flush_chain(current: &mut Option<Chain>, chains: &mut Vec<RepeatChain>) {
        if let Some(chain) = current.take() {
            if chain.count >= 2 && chain.senders.len() >= 2 {
                chains.push(RepeatChain {
                    content: chain.content,
                    count: chain.count,
                    participant_count: chain.senders.len() as u64,
                    start_ts: chain.start_ts,
                });
            }
        }
    }

    chains.sort_by(|a, b| b.count.cmp(&a.count).then(a.start_ts.cmp(&b.start_ts)));
    chains.truncate(TOP_N);
    Ok(RepeatAnalysis {
        chains,
        top_repeaters: top_member_counts(repeaters, TOP_N),
    })
}

// ─── catchphrase ───

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhraseCount {
    pub phrase: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberCatchphrases {
    pub member_id: i64,
    pub account_name: String,
    pub phrases: Vec<PhraseCount>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchphraseAnalysis {
    pub members: Vec<MemberCatchphrases>,
}

/// Per member: short text contents (2..=20 chars) posted ≥3 times,
/// bracket markers excluded.
pub fn catchphrase(store: &SessionStore, filter: &QueryFilter) -> Result<CatchphraseAnalysis> {
    let mut per_member: HashMap<i64, (String, HashMap<String, u64>)> = HashMap::new();
    for_each_message(store, filter, |msg| {
        if msg.msg_type != MessageType::Text.as_wire() {
            return;
        }
        let text = match &msg.content {
            Some(c) => c.trim(),
            None => return,
        };
        let chars = text.chars().count();
        if !(2..=20).contains(&chars) || heuristics::is_pure_marker(text) {
            return;
        }
        let entry = per_member
            .entry(msg.sender_id)
            .or_insert_with(|| (msg.account_name.clone(), HashMap::new()));
        *entry.1.entry(text.to_string()).or_insert(0) += 1;
    })?;

    let mut members: Vec<MemberCatchphrases> = per_member
        .into_iter()
        .filter_map(|(member_id, (account_name, phrases))| {
            let mut phrases: Vec<PhraseCount> = phrases
                .into_iter()
                .filter(|(_, count)| *count >= CATCHPHRASE_MIN)
                .map(|(phrase, count)| PhraseCount { phrase, count })
                .collect();
            if phrases.is_empty() {
                return None;
            }
            phrases.sort_by(|a, b| b.count.cmp(&a.count).then(a.phrase.cmp(&b.phrase)));
            phrases.truncate(5);
            Some(MemberCatchphrases {
                member_id,
                account_name,
                phrases,
            })
        })
        .collect();
    members.sort_by(|a, b| {
        b.phrases[0]
            .count
            .cmp(&a.phrases[0].count)
            .then(a.member_id.cmp(&b.member_id))
    });
    members.truncate(TOP_N);
    Ok(CatchphraseAnalysis { members })
}

// ─── night owl ───

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NightOwlRow {
    pub member_id: i64,
    pub account_name: String,
    pub night_count: u64,
    pub total_count: u64,
    pub ratio: f64,
    /// Timestamp of the member's deepest-night message.
    pub latest_ts: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NightOwlAnalysis {
    pub members: Vec<NightOwlRow>,
}

/// Activity between 00:00 and 05:59 local.
pub fn night_owl(store: &SessionStore, filter: &QueryFilter) -> Result<NightOwlAnalysis> {
    struct State {
        account_name: String,
        night: u64,
        total: u64,
        latest_key: (u32, u32, i64), // (hour, minute, ts) of deepest night message
    }
    let mut per_member: HashMap<i64, State> = HashMap::new();

    for_each_message(store, filter, |msg| {
        let dt = match chrono::Local.timestamp_opt(msg.ts, 0).single() {
            Some(dt) => dt,
            None => return,
        };
        let state = per_member.entry(msg.sender_id).or_insert_with(|| State {
            account_name: msg.account_name.clone(),
            night: 0,
            total: 0,
            latest_key: (0, 0, 0),
        });
        state.total += 1;
        let hour = dt.hour();
        if hour <= 5 {
            state.night += 1;
            let key = (hour, dt.minute(), msg.ts);
            if key > state.latest_key {
                state.latest_key = key;
            }
        }
    })?;

    let mut members: Vec<NightOwlRow> = per_member
        .into_iter()
        .filter(|(_, s)| s.night > 0)
        .map(|(member_id, s)| NightOwlRow {
            member_id,
            account_name: s.account_name,
            night_count: s.night,
            total_count: s.total,
            ratio: (s.night as f64 / s.total as f64 * 10000.0).round() / 10000.0,
            latest_ts: s.latest_key.2,
        })
        .collect();
    members.sort_by(|a, b| {
        b.night_count
            .cmp(&a.night_count)
            .then(a.member_id.cmp(&b.member_id))
    });
    members.truncate(TOP_N);
    Ok(NightOwlAnalysis { members })
}

// ─── dragon king (龙王) ───

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DragonKingRow {
    pub member_id: i64,
    pub account_name: String,
    pub days_won: u64,
    pub message_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DragonKingAnalysis {
    pub members: Vec<DragonKingRow>,
}

/// Who tops the daily message count, ranked by days won.
pub fn dragon_king(store: &SessionStore, filter: &QueryFilter) -> Result<DragonKingAnalysis> {
    let mut day: Option<(i32, u32, u32)> = None;
    let mut day_counts: HashMap<i64, (String, u64)> = HashMap::new();
    let mut wins: HashMap<i64, (String, u64)> = HashMap::new();
    let mut totals: HashMap<i64, u64> = HashMap::new();

    fn close_day(
        day_counts: &mut HashMap<i64, (String, u64)>,
        wins: &mut HashMap<i64, (String, u64)>,
    ) {
        // lowest member id wins ties so re-runs stay deterministic
        if let Some((&winner, (name, _))) = day_counts
            .iter()
            .max_by(|a, b| a.1 .1.cmp(&b.1 .1).then(b.0.cmp(a.0)))
        {
            let entry = wins
                .entry(winner)
                .or_insert_with(|| (name.clone(), 0));
            entry.1 += 1;
        }
        day_counts.clear();
    }

    for_each_message(store, filter, |msg| {
        let msg_day = local_day(msg.ts);
        if msg_day != day {
            if day.is_some() {
                close_day(&mut day_counts, &mut wins);
            }
            day = msg_day;
        }
        let entry = day_counts
            .entry(msg.sender_id)
            .or_insert_with(|| (msg.account_name.clone(), 0));
        entry.1 += 1;
        *totals.entry(msg.sender_id).or_insert(0) += 1;
    })?;
    if day.is_some() {
        close_day(&mut day_counts, &mut wins);
    }

    let mut members: Vec<DragonKingRow> = wins
        .into_iter()
        .map(|(member_id, (account_name, days_won))| DragonKingRow {
            member_id,
            account_name,
            days_won,
            message_count: totals.get(&member_id).copied().unwrap_or(0),
        })
        .collect();
    members.sort_by(|a, b| {
        b.days_won
            .cmp(&a.days_won)
            .then(b.message_count.cmp(&a.message_count))
            .then(a.member_id.cmp(&b.member_id))
    });
    members.truncate(TOP_N);
    Ok(DragonKingAnalysis { members })
}

// ─── diving (潜水) ───

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DivingRow {
    pub member_id: i64,
    pub account_name: String,
    pub last_ts: i64,
    pub silent_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DivingAnalysis {
    pub members: Vec<DivingRow>,
}

/// Longest silences relative to the corpus end (or the filter end).
pub fn diving(store: &SessionStore, filter: &QueryFilter) -> Result<DivingAnalysis> {
    let mut last_seen: HashMap<i64, (String, i64)> = HashMap::new();
    let mut corpus_end = filter.end_ts.unwrap_or(0);

    for_each_message(store, filter, |msg| {
        corpus_end = corpus_end.max(msg.ts);
        let entry = last_seen
            .entry(msg.sender_id)
            .or_insert_with(|| (msg.account_name.clone(), msg.ts));
        entry.1 = entry.1.max(msg.ts);
    })?;

    let mut members: Vec<DivingRow> = last_seen
        .into_iter()
        .map(|(member_id, (account_name, last_ts))| DivingRow {
            member_id,
            account_name,
            last_ts,
            silent_seconds: (corpus_end - last_ts).max(0),
        })
        .collect();
    members.sort_by(|a, b| {
        b.silent_seconds
            .cmp(&a.silent_seconds)
            .then(a.member_id.cmp(&b.member_id))
    });
    members.truncate(TOP_N);
    Ok(DivingAnalysis { members })
}

// ─── monologue ───

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonologueRow {
    pub member_id: i64,
    pub account_name: String,
    pub runs: u64,
    pub longest_run: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonologueAnalysis {
    pub members: Vec<MonologueRow>,
}

/// Runs of ≥5 consecutive messages by one sender.
pub fn monologue(store: &SessionStore, filter: &QueryFilter) -> Result<MonologueAnalysis> {
    let mut per_member: HashMap<i64, (String, u64, u64)> = HashMap::new(); // (name, runs, longest)
    let mut current: Option<(i64, String, u64)> = None;

    fn close_run(
        current: &mut Option<(i64, String, u64)>,
        per_member: &mut HashMap<i64, (String, u64, u64)>,
    ) {
        if let Some((sender, name, len)) = current.take() {
            if len as usize >= MONOLOGUE_MIN {
                let entry = per_member
                    .entry(sender)
                    .or_insert_with(|| (name, 0, 0));
                entry.1 += 1;
                entry.2 = entry.2.max(len);
            }
        }
    }

    for_each_message(store, filter, |msg| {
        match current.as_mut() {
            Some((sender, _, len)) if *sender == msg.sender_id => *len += 1,
            _ => {
                close_run(&mut current, &mut per_member);
                current = Some((msg.sender_id, msg.account_name.clone(), 1));
            }
        }
    })?;
    close_run(&mut current, &mut per_member);

    let mut members: Vec<MonologueRow> = per_member
        .into_iter()
        .map(|(member_id, (account_name, runs, longest_run))| MonologueRow {
            member_id,
            account_name,
            runs,
            longest_run,
        })
        .collect();
    members.sort_by(|a, b| b.runs.cmp(&a.runs).then(b.longest_run.cmp(&a.longest_run)));
    members.truncate(TOP_N);
    Ok(MonologueAnalysis { members })
}

// ─── mentions ───

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionEdge {
    pub from_id: i64,
    pub to_id: i64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionAnalysis {
    pub most_mentioned: Vec<MemberCount>,
    pub most_mentioning: Vec<MemberCount>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionGraph {
    pub edges: Vec<MentionEdge>,
}

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([^\s@，。,.!?！？]{1,32})").expect("valid mention regex"));

/// `@name` hits resolved against account names, nicknames, and aliases.
fn mention_edges(store: &SessionStore, filter: &QueryFilter) -> Result<HashMap<(i64, i64), u64>> {
    // name → member id; longer names registered later win nothing, the
    // regex match is resolved by exact lookup
    let mut name_index: HashMap<String, i64> = HashMap::new();
    let mut account_names: HashMap<i64, String> = HashMap::new();
    for member in store.list_members()? {
        account_names.insert(member.id, member.account_name.clone());
        if !member.account_name.is_empty() {
            name_index.entry(member.account_name.clone()).or_insert(member.id);
        }
        if let Some(nick) = &member.group_nickname {
            if !nick.is_empty() {
                name_index.entry(nick.clone()).or_insert(member.id);
            }
        }
        for alias in &member.aliases {
            if !alias.is_empty() {
                name_index.entry(alias.clone()).or_insert(member.id);
            }
        }
    }

    let mut edges: HashMap<(i64, i64), u64> = HashMap::new();
    for_each_message(store, filter, |msg| {
        let text = match &msg.content {
            Some(c) if c.contains('@') => c,
            _ => return,
        };
        for caps in MENTION_RE.captures_iter(text) {
            let candidate = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            // try progressively shorter prefixes: "@阿明 在吗" captures
            // "阿明" only when the name is known
            let target = lookup_prefix(&name_index, candidate);
            if let Some(to_id) = target {
                if to_id != msg.sender_id {
                    *edges.entry((msg.sender_id, to_id)).or_insert(0) += 1;
                }
            }
        }
    })?;
    Ok(edges)
}

fn lookup_prefix(index: &HashMap<String, i64>, candidate: &str) -> Option<i64> {
    if let Some(&id) = index.get(candidate) {
        return Some(id);
    }
    let chars: Vec<char> = candidate.chars().collect();
    for take in (1..chars.len()).rev() {
        let prefix: String = chars[..take].iter().collect();
        if let Some(&id) = index.get(&prefix) {
            return Some(id);
        }
    }
    None
}

pub fn mention(store: &SessionStore, filter: &QueryFilter) -> Result<MentionAnalysis> {
    let edges = mention_edges(store, filter)?;
    let names: HashMap<i64, String> = store
        .list_members()?
        .into_iter()
        .map(|m| (m.id, m.account_name))
        .collect();

    let mut mentioned: HashMap<i64, (String, u64)> = HashMap::new();
    let mut mentioning: HashMap<i64, (String, u64)> = HashMap::new();
    for ((from, to), count) in &edges {
        let to_name = names.get(to).cloned().unwrap_or_default();
        let from_name = names.get(from).cloned().unwrap_or_default();
        mentioned.entry(*to).or_insert_with(|| (to_name, 0)).1 += count;
        mentioning.entry(*from).or_insert_with(|| (from_name, 0)).1 += count;
    }
    Ok(MentionAnalysis {
        most_mentioned: top_member_counts(mentioned, TOP_N),
        most_mentioning: top_member_counts(mentioning, TOP_N),
    })
}

pub fn mention_graph(store: &SessionStore, filter: &QueryFilter) -> Result<MentionGraph> {
    let mut edges: Vec<MentionEdge> = mention_edges(store, filter)?
        .into_iter()
        .map(|((from_id, to_id), count)| MentionEdge {
            from_id,
            to_id,
            count,
        })
        .collect();
    edges.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then(a.from_id.cmp(&b.from_id))
            .then(a.to_id.cmp(&b.to_id))
    });
    Ok(MentionGraph { edges })
}

// ─── laugh ───

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaughRow {
    pub member_id: i64,
    pub account_name: String,
    pub laugh_count: u64,
    pub total_count: u64,
    pub ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaughAnalysis {
    pub members: Vec<LaughRow>,
}

static LAUGH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)哈{2,}|233+|(?:^|[^a-z])h{3,}(?:$|[^a-z])|lol|lmao|笑死|😂|🤣")
        .expect("valid laugh regex")
});

pub fn laugh(store: &SessionStore, filter: &QueryFilter) -> Result<LaughAnalysis> {
    let mut per_member: HashMap<i64, (String, u64, u64)> = HashMap::new(); // (name, laughs, total)
    for_each_message(store, filter, |msg| {
        let entry = per_member
            .entry(msg.sender_id)
            .or_insert_with(|| (msg.account_name.clone(), 0, 0));
        entry.2 += 1;
        if let Some(text) = &msg.content {
            if LAUGH_RE.is_match(text) {
                entry.1 += 1;
            }
        }
    })?;

    let mut members: Vec<LaughRow> = per_member
        .into_iter()
        .filter(|(_, (_, laughs, _))| *laughs > 0)
        .map(|(member_id, (account_name, laughs, total))| LaughRow {
            member_id,
            account_name,
            laugh_count: laughs,
            total_count: total,
            ratio: (laughs as f64 / total as f64 * 10000.0).round() / 10000.0,
        })
        .collect();
    members.sort_by(|a, b| {
        b.laugh_count
            .cmp(&a.laugh_count)
            .then(a.member_id.cmp(&b.member_id))
    });
    members.truncate(TOP_N);
    Ok(LaughAnalysis { members })
}

// ─── meme battle (斗图) ───

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemeBattleAnalysis {
    pub battle_count: u64,
    pub longest_battle: u64,
    pub participants: Vec<MemberCount>,
}

/// Runs of ≥3 consecutive image/emoji messages involving ≥2 senders.
pub fn meme_battle(store: &SessionStore, filter: &QueryFilter) -> Result<MemeBattleAnalysis> {
    struct Run {
        len: u64,
        senders: Vec<(i64, String)>,
    }
    let mut battles = 0u64;
    let mut longest = 0u64;
    let mut participation: HashMap<i64, (String, u64)> = HashMap::new();
    let mut current: Option<Run> = None;

    let mut close = |current: &mut Option<Run>,
                     battles: &mut u64,
                     longest: &mut u64,
                     participation: &mut HashMap<i64, (String, u64)>| {
        if let Some(run) = current.take() {
            if run.len as usize >= MEME_BATTLE_MIN && run.senders.len() >= 2 {
                *battles += 1;
                *longest = (*longest).max(run.len);
                for (id, name) in run.senders {
                    let entry = participation.entry(id).or_insert_with(|| (name, 0));
                    entry.1 += 1;
                }
            }
        }
    };

    for_each_message(store, filter, |msg| {
        let is_meme = msg.msg_type == MessageType::Image.as_wire()
            || msg.msg_type == MessageType::Emoji.as_wire();
        if !is_meme {
            close(&mut current, &mut battles, &mut longest, &mut participation);
            return;
        }
        let run = current.get_or_insert(Run {
            len: 0,
            senders: Vec::new(),
        });
        run.len += 1;
        if !run.senders.iter().any(|(id, _)| *id == msg.sender_id) {
            run.senders.push((msg.sender_id, msg.account_name.clone()));
        }
    })?;
    close(&mut current, &mut battles, &mut longest, &mut participation);

    Ok(MemeBattleAnalysis {
        battle_count: battles,
        longest_battle: longest,
        participants: top_member_counts(participation, TOP_N),
    })
}

// ─── check-in (打卡) ───

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRow {
    pub member_id: i64,
    pub account_name: String,
    pub active_days: u64,
    pub longest_streak: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInAnalysis {
    pub members: Vec<CheckInRow>,
}

/// Distinct active local days and the longest consecutive-day streak.
pub fn check_in(store: &SessionStore, filter: &QueryFilter) -> Result<CheckInAnalysis> {
    struct State {
        account_name: String,
        active_days: u64,
        last_day: i64,
        streak: u64,
        longest: u64,
    }
    let mut per_member: HashMap<i64, State> = HashMap::new();

    for_each_message(store, filter, |msg| {
        let day = local_day_number(msg.ts);
        let state = per_member.entry(msg.sender_id).or_insert_with(|| State {
            account_name: msg.account_name.clone(),
            active_days: 0,
            last_day: i64::MIN,
            streak: 0,
            longest: 0,
        });
        if day == state.last_day {
            return;
        }
        state.active_days += 1;
        state.streak = if day == state.last_day + 1 {
            state.streak + 1
        } else {
            1
        };
        state.longest = state.longest.max(state.streak);
        state.last_day = day;
    })?;

    let mut members: Vec<CheckInRow> = per_member
        .into_iter()
        .map(|(member_id, s)| CheckInRow {
            member_id,
            account_name: s.account_name,
            active_days: s.active_days,
            longest_streak: s.longest,
        })
        .collect();
    members.sort_by(|a, b| {
        b.longest_streak
            .cmp(&a.longest_streak)
            .then(b.active_days.cmp(&a.active_days))
            .then(a.member_id.cmp(&b.member_id))
    });
    members.truncate(TOP_N);
    Ok(CheckInAnalysis { members })
}
