//! Typed worker request surface.
//!
//! Wire envelope: requests are `{id, op, payload}`, responses
//! `{id, ok, result | error}`, progress posts `{id, progress}`. The op
//! set is a tagged sum; payload structs deserialize camelCase and
//! default their optional fields, so the transport can omit them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorBody;
use crate::import::ImportProgress;
use crate::types::QueryFilter;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub id: String,
    #[serde(flatten)]
    pub op: Op,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(id: String, result: Value) -> Self {
        Response {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: String, error: ErrorBody) -> Self {
        Response {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub id: String,
    pub progress: ImportProgress,
}

// ─── Payloads ───

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathPayload {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPathPayload {
    pub session_id: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamePayload {
    pub session_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerPayload {
    pub session_id: String,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapPayload {
    pub session_id: String,
    pub gap_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateIndexPayload {
    pub session_id: String,
    pub gap_seconds: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPayload {
    pub session_id: String,
    pub member_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasesPayload {
    pub session_id: String,
    pub member_id: i64,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPayload {
    pub session_id: String,
    #[serde(default)]
    pub filter: QueryFilter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPayload {
    pub session_id: String,
    #[serde(default)]
    pub filter: QueryFilter,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sender_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPayload {
    pub session_id: String,
    pub id: i64,
    #[serde(default)]
    pub filter: QueryFilter,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sender_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPayload {
    pub session_id: String,
    pub ids: Vec<i64>,
    #[serde(default = "default_context_k")]
    pub k: i64,
}

fn default_context_k() -> i64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterContextPayload {
    pub session_id: String,
    #[serde(default)]
    pub filter: QueryFilter,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sender_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_context_k")]
    pub k: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentPayload {
    pub session_id: String,
    #[serde(default)]
    pub filter: QueryFilter,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllRecentPayload {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetweenPayload {
    pub session_id: String,
    #[serde(default)]
    pub filter: QueryFilter,
    pub start_ts: i64,
    pub end_ts: i64,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FromSessionsPayload {
    pub session_ids: Vec<String>,
    #[serde(default)]
    pub filter: QueryFilter,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlPayload {
    pub session_id: String,
    pub sql: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePathsPayload {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeFilesPayload {
    pub paths: Vec<String>,
    #[serde(default)]
    pub reimport: bool,
}

// ─── Operations ───

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", content = "payload")]
pub enum Op {
    #[serde(rename = "import.stream")]
    ImportStream(PathPayload),
    #[serde(rename = "import.analyzeIncremental")]
    ImportAnalyzeIncremental(SessionPathPayload),
    #[serde(rename = "import.incremental")]
    ImportIncremental(SessionPathPayload),
    #[serde(rename = "import.parseFileInfo")]
    ImportParseFileInfo(PathPayload),

    #[serde(rename = "session.getAll")]
    SessionGetAll,
    #[serde(rename = "session.get")]
    SessionGet(SessionPayload),
    #[serde(rename = "session.rename")]
    SessionRename(RenamePayload),
    #[serde(rename = "session.delete")]
    SessionDelete(SessionPayload),
    #[serde(rename = "session.updateOwnerId")]
    SessionUpdateOwnerId(OwnerPayload),
    #[serde(rename = "session.updateGapThreshold")]
    SessionUpdateGapThreshold(GapPayload),

    #[serde(rename = "session.generateIndex")]
    SessionGenerateIndex(GenerateIndexPayload),
    #[serde(rename = "session.hasIndex")]
    SessionHasIndex(SessionPayload),
    #[serde(rename = "session.indexStats")]
    SessionIndexStats(SessionPayload),
    #[serde(rename = "session.clearIndex")]
    SessionClearIndex(SessionPayload),
    #[serde(rename = "session.list")]
    SessionListIndex(SessionPayload),

    #[serde(rename = "member.list")]
    MemberList(SessionPayload),
    #[serde(rename = "member.updateAliases")]
    MemberUpdateAliases(AliasesPayload),
    #[serde(rename = "member.delete")]
    MemberDelete(MemberPayload),
    #[serde(rename = "member.nameHistory")]
    MemberNameHistory(MemberPayload),

    #[serde(rename = "query.availableYears")]
    QueryAvailableYears(FilterPayload),
    #[serde(rename = "query.memberActivity")]
    QueryMemberActivity(FilterPayload),
    #[serde(rename = "query.hourly")]
    QueryHourly(FilterPayload),
    #[serde(rename = "query.daily")]
    QueryDaily(FilterPayload),
    #[serde(rename = "query.weekday")]
    QueryWeekday(FilterPayload),
    #[serde(rename = "query.monthly")]
    QueryMonthly(FilterPayload),
    #[serde(rename = "query.yearly")]
    QueryYearly(FilterPayload),
    #[serde(rename = "query.lengthDistribution")]
    QueryLengthDistribution(FilterPayload),
    #[serde(rename = "query.typeDistribution")]
    QueryTypeDistribution(FilterPayload),
    #[serde(rename = "query.timeRange")]
    QueryTimeRange(FilterPayload),

    #[serde(rename = "query.repeat")]
    QueryRepeat(FilterPayload),
    #[serde(rename = "query.catchphrase")]
    QueryCatchphrase(FilterPayload),
    #[serde(rename = "query.nightOwl")]
    QueryNightOwl(FilterPayload),
    #[serde(rename = "query.dragonKing")]
    QueryDragonKing(FilterPayload),
    #[serde(rename = "query.diving")]
    QueryDiving(FilterPayload),
    #[serde(rename = "query.monologue")]
    QueryMonologue(FilterPayload),
    #[serde(rename = "query.mention")]
    QueryMention(FilterPayload),
    #[serde(rename = "query.mentionGraph")]
    QueryMentionGraph(FilterPayload),
    #[serde(rename = "query.laugh")]
    QueryLaugh(FilterPayload),
    #[serde(rename = "query.memeBattle")]
    QueryMemeBattle(FilterPayload),
    #[serde(rename = "query.checkIn")]
    QueryCheckIn(FilterPayload),

    #[serde(rename = "msg.search")]
    MsgSearch(SearchPayload),
    #[serde(rename = "msg.context")]
    MsgContext(ContextPayload),
    #[serde(rename = "msg.recent")]
    MsgRecent(RecentPayload),
    #[serde(rename = "msg.allRecent")]
    MsgAllRecent(AllRecentPayload),
    #[serde(rename = "msg.between")]
    MsgBetween(BetweenPayload),
    #[serde(rename = "msg.before")]
    MsgBefore(CursorPayload),
    #[serde(rename = "msg.after")]
    MsgAfter(CursorPayload),
    #[serde(rename = "msg.filterWithContext")]
    MsgFilterWithContext(FilterContextPayload),
    #[serde(rename = "msg.fromSessions")]
    MsgFromSessions(FromSessionsPayload),

    #[serde(rename = "sql.execute")]
    SqlExecute(SqlPayload),
    #[serde(rename = "sql.schema")]
    SqlSchema(SessionPayload),

    #[serde(rename = "merge.parseFileInfo")]
    MergeParseFileInfo(PathPayload),
    #[serde(rename = "merge.checkConflicts")]
    MergeCheckConflicts(MergePathsPayload),
    #[serde(rename = "merge.mergeFiles")]
    MergeMergeFiles(MergeFilesPayload),
    #[serde(rename = "merge.clearCache")]
    MergeClearCache,

    #[serde(rename = "migration.check")]
    MigrationCheck,
    #[serde(rename = "migration.run")]
    MigrationRun,
}

impl Op {
    /// Long-running operations get the 10-minute default timeout;
    /// everything else gets 30 seconds.
    pub fn is_long_running(&self) -> bool {
        matches!(
            self,
            Op::ImportStream(_)
                | Op::ImportAnalyzeIncremental(_)
                | Op::ImportIncremental(_)
                | Op::ImportParseFileInfo(_)
                | Op::MergeParseFileInfo(_)
                | Op::MergeCheckConflicts(_)
                | Op::MergeMergeFiles(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_deserializes() {
        let raw = r#"{"id":"r1","op":"query.hourly","payload":{"sessionId":"chat_1_abc","filter":{"startTs":10}}}"#;
        let req: Request = serde_json::from_str(raw).unwrap();
        assert_eq!(req.id, "r1");
        match req.op {
            Op::QueryHourly(p) => {
                assert_eq!(p.session_id, "chat_1_abc");
                assert_eq!(p.filter.start_ts, Some(10));
                assert_eq!(p.filter.end_ts, None);
            }
            other => panic!("wrong op: {other:?}"),
        }
    }

    #[test]
    fn payloadless_ops_deserialize() {
        let req: Request =
            serde_json::from_str(r#"{"id":"r2","op":"migration.check"}"#).unwrap();
        assert!(matches!(req.op, Op::MigrationCheck));
    }

    #[test]
    fn long_running_classification() {
        let import: Request = serde_json::from_str(
            r#"{"id":"a","op":"import.stream","payload":{"path":"/tmp/x.json"}}"#,
        )
        .unwrap();
        assert!(import.op.is_long_running());
        let quick: Request = serde_json::from_str(
            r#"{"id":"b","op":"session.getAll"}"#,
        )
        .unwrap();
        assert!(!quick.op.is_long_running());
    }
}
