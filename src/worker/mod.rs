//! Worker host: a dedicated thread that owns every store handle.
//!
//! SQLite connections never cross threads. Callers submit typed
//! requests over a channel and block on a per-request response channel
//! (with the op-class timeout); long-running requests additionally
//! stream progress events. The worker processes one request at a time,
//! which gives the single-writer discipline per session for free;
//! reads against disjoint sessions interleave across requests through
//! the bounded read-handle cache.

pub mod abort;
pub mod request;

use std::collections::HashSet;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info};

pub use abort::AbortToken;
pub use request::{Op, ProgressEvent, Request, Response};

use crate::error::{CoreError, ErrorBody};
use crate::import::{self, incremental, ImportOptions, ImportProgress};
use crate::merge::{self, MergeCache, MergeRequest};
use crate::parse::{self, AbortOption, ParseOptions};
use crate::paths::{remove_store_files, AppDirs};
use crate::query::{aggregates, behavior, messages, rawsql, session_index};
use crate::settings::Settings;
use crate::store::{migrate, SessionStore, StoreCache};
use crate::types::{MessageRow, QueryFilter, SessionInfo};

pub const SHORT_TIMEOUT: Duration = Duration::from_secs(30);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(600);
const READ_CACHE_CAPACITY: usize = 8;

enum Job {
    Request {
        request: Request,
        respond: Sender<Response>,
        progress: Option<Sender<ProgressEvent>>,
        abort: AbortToken,
    },
    Shutdown,
}

pub struct Worker {
    tx: Sender<Job>,
    join: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker thread. Leftover staging stores from earlier
    /// runs are swept before the first request.
    pub fn spawn(dirs: AppDirs, settings: Settings) -> Result<Worker> {
        if let Ok(swept) = dirs.sweep_staging() {
            if swept > 0 {
                info!(swept, "removed leftover staging stores");
            }
        }
        let (tx, rx) = unbounded::<Job>();
        let join = std::thread::Builder::new()
            .name("chatlab-worker".into())
            .spawn(move || run_loop(rx, dirs, settings))?;
        Ok(Worker {
            tx,
            join: Some(join),
        })
    }

    /// Submit a request and block until completion or timeout. On
    /// timeout the request's abort token is raised so the worker backs
    /// out at the next batch boundary.
    pub fn submit(&self, request: Request) -> Response {
        self.submit_with(request, None, AbortToken::new())
    }

    pub fn submit_with(
        &self,
        request: Request,
        progress: Option<Sender<ProgressEvent>>,
        abort: AbortToken,
    ) -> Response {
        let id = request.id.clone();
        let timeout = if request.op.is_long_running() {
            LONG_TIMEOUT
        } else {
            SHORT_TIMEOUT
        };
        let (respond_tx, respond_rx) = bounded::<Response>(1);
        let job = Job::Request {
            request,
            respond: respond_tx,
            progress,
            abort: abort.clone(),
        };
        if self.tx.send(job).is_err() {
            return Response::failure(
                id,
                ErrorBody {
                    code: "io_error".into(),
                    message: "worker is gone".into(),
                    diagnosis: None,
                },
            );
        }
        match respond_rx.recv_timeout(timeout) {
            Ok(response) => response,
            Err(_) => {
                abort.abort();
                Response::failure(
                    id,
                    ErrorBody {
                        code: "io_error".into(),
                        message: format!("request timed out after {}s", timeout.as_secs()),
                        diagnosis: None,
                    },
                )
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.tx.send(Job::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

struct WorkerState {
    dirs: AppDirs,
    settings: Settings,
    read_cache: StoreCache,
    merge_cache: MergeCache,
    /// Session ids whose lazy soft-migration already ran this process.
    soft_migrated: HashSet<String>,
}

fn run_loop(rx: Receiver<Job>, dirs: AppDirs, settings: Settings) {
    let mut state = WorkerState {
        dirs,
        settings,
        read_cache: StoreCache::new(READ_CACHE_CAPACITY),
        merge_cache: MergeCache::new(),
        soft_migrated: HashSet::new(),
    };

    while let Ok(job) = rx.recv() {
        match job {
            Job::Shutdown => break,
            Job::Request {
                request,
                respond,
                progress,
                abort,
            } => {
                let id = request.id.clone();
                debug!(id = %id, "handling request");
                let mut emit = |p: ImportProgress| {
                    if let Some(tx) = &progress {
                        let _ = tx.send(ProgressEvent {
                            id: id.clone(),
                            progress: p,
                        });
                    }
                };
                let result = dispatch(&mut state, &request.op, &mut emit, &abort);
                let response = match result {
                    Ok(value) => Response::success(id, value),
                    Err(e) => {
                        error!(id = %request.id, error = %format!("{e:#}"), "request failed");
                        Response::failure(request.id, ErrorBody::from_anyhow(&e))
                    }
                };
                let _ = respond.send(response);
            }
        }
    }
    state.merge_cache.clear();
}

fn to_value<T: Serialize>(value: T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn dispatch(
    state: &mut WorkerState,
    op: &Op,
    progress: &mut dyn FnMut(ImportProgress),
    abort: &AbortToken,
) -> Result<serde_json::Value> {
    let abort_opt = AbortOption::token(abort.clone());
    match op {
        // ─── import ───
        Op::ImportStream(p) => {
            let opts = ImportOptions::from_settings(&state.settings, abort_opt);
            let outcome =
                import::import_file(&state.dirs, &PathBuf::from(&p.path), &opts, progress)?;
            to_value(outcome)
        }
        Op::ImportAnalyzeIncremental(p) => {
            let opts = ImportOptions::from_settings(&state.settings, abort_opt);
            let analysis =
                incremental::analyze(&state.dirs, &p.session_id, &PathBuf::from(&p.path), &opts)?;
            to_value(analysis)
        }
        Op::ImportIncremental(p) => {
            state.read_cache.evict(&p.session_id);
            let opts = ImportOptions::from_settings(&state.settings, abort_opt);
            let outcome = incremental::import(
                &state.dirs,
                &p.session_id,
                &PathBuf::from(&p.path),
                &opts,
                progress,
            )?;
            to_value(outcome)
        }
        Op::ImportParseFileInfo(p) | Op::MergeParseFileInfo(p) => {
            let opts = ParseOptions {
                batch_size: state.settings.message_batch_size,
                abort: abort_opt,
            };
            to_value(parse::collect_file_info(&PathBuf::from(&p.path), &opts)?)
        }

        // ─── sessions ───
        Op::SessionGetAll => {
            let mut sessions = Vec::new();
            for id in state.dirs.list_sessions()? {
                match session_info(state, &id) {
                    Ok(info) => sessions.push(info),
                    Err(e) => error!(session = %id, error = %format!("{e:#}"), "skipping unreadable store"),
                }
            }
            to_value(sessions)
        }
        Op::SessionGet(p) => to_value(session_info(state, &p.session_id)?),
        Op::SessionRename(p) => {
            let store = open_write(state, &p.session_id)?;
            store.rename(&p.name)?;
            state.read_cache.evict(&p.session_id);
            to_value(json!({"renamed": true}))
        }
        Op::SessionDelete(p) => {
            // evict first so no cached handle outlives the files
            state.read_cache.evict(&p.session_id);
            state.soft_migrated.remove(&p.session_id);
            let db_path = state.dirs.session_db(&p.session_id);
            if !db_path.exists() {
                return Err(CoreError::NotFound(p.session_id.clone()).into());
            }
            remove_store_files(&db_path)?;
            to_value(json!({"deleted": true}))
        }
        Op::SessionUpdateOwnerId(p) => {
            let store = open_write(state, &p.session_id)?;
            store.set_owner(p.owner_id)?;
            state.read_cache.evict(&p.session_id);
            to_value(json!({"updated": true}))
        }
        Op::SessionUpdateGapThreshold(p) => {
            let store = open_write(state, &p.session_id)?;
            session_index::set_threshold(&store, p.gap_seconds)?;
            to_value(json!({"updated": true}))
        }

        // ─── session index ───
        Op::SessionGenerateIndex(p) => {
            let store = open_write(state, &p.session_id)?;
            let gap = match p.gap_seconds {
                Some(gap) => gap,
                None => session_index::stored_threshold(&store)?,
            };
            to_value(session_index::generate(&store, gap)?)
        }
        Op::SessionHasIndex(p) => {
            let store = open_read(state, &p.session_id)?;
            to_value(json!({"hasIndex": session_index::has_index(store)?}))
        }
        Op::SessionIndexStats(p) => {
            let store = open_read(state, &p.session_id)?;
            to_value(session_index::stats(store)?)
        }
        Op::SessionClearIndex(p) => {
            let store = open_write(state, &p.session_id)?;
            store.clear_session_index()?;
            to_value(json!({"cleared": true}))
        }
        Op::SessionListIndex(p) => {
            let store = open_read(state, &p.session_id)?;
            to_value(session_index::entries(store)?)
        }

        // ─── members ───
        Op::MemberList(p) => {
            let store = open_read(state, &p.session_id)?;
            to_value(store.list_members()?)
        }
        Op::MemberUpdateAliases(p) => {
            let store = open_write(state, &p.session_id)?;
            store.update_aliases(p.member_id, &p.aliases)?;
            state.read_cache.evict(&p.session_id);
            to_value(json!({"updated": true}))
        }
        Op::MemberDelete(p) => {
            let store = open_write(state, &p.session_id)?;
            store.delete_member(p.member_id)?;
            state.read_cache.evict(&p.session_id);
            to_value(json!({"deleted": true}))
        }
        Op::MemberNameHistory(p) => {
            let store = open_read(state, &p.session_id)?;
            to_value(store.name_history(p.member_id)?)
        }

        // ─── aggregates ───
        Op::QueryAvailableYears(p) => {
            with_read(state, &p.session_id, |s| {
                aggregates::available_years(s, &p.filter).and_then(to_value)
            })
        }
        Op::QueryMemberActivity(p) => with_read(state, &p.session_id, |s| {
            aggregates::member_activity(s, &p.filter).and_then(to_value)
        }),
        Op::QueryHourly(p) => with_read(state, &p.session_id, |s| {
            aggregates::hourly(s, &p.filter).and_then(to_value)
        }),
        Op::QueryDaily(p) => with_read(state, &p.session_id, |s| {
            aggregates::daily(s, &p.filter).and_then(to_value)
        }),
        Op::QueryWeekday(p) => with_read(state, &p.session_id, |s| {
            aggregates::weekday(s, &p.filter).and_then(to_value)
        }),
        Op::QueryMonthly(p) => with_read(state, &p.session_id, |s| {
            aggregates::monthly(s, &p.filter).and_then(to_value)
        }),
        Op::QueryYearly(p) => with_read(state, &p.session_id, |s| {
            aggregates::yearly(s, &p.filter).and_then(to_value)
        }),
        Op::QueryLengthDistribution(p) => with_read(state, &p.session_id, |s| {
            aggregates::length_distribution(s, &p.filter).and_then(to_value)
        }),
        Op::QueryTypeDistribution(p) => with_read(state, &p.session_id, |s| {
            aggregates::type_distribution(s, &p.filter).and_then(to_value)
        }),
        Op::QueryTimeRange(p) => with_read(state, &p.session_id, |s| {
            aggregates::time_range(s, &p.filter).and_then(to_value)
        }),

        // ─── behavioral analyses ───
        Op::QueryRepeat(p) => with_read(state, &p.session_id, |s| {
            behavior::repeat(s, &p.filter).and_then(to_value)
        }),
        Op::QueryCatchphrase(p) => with_read(state, &p.session_id, |s| {
            behavior::catchphrase(s, &p.filter).and_then(to_value)
        }),
        Op::QueryNightOwl(p) => with_read(state, &p.session_id, |s| {
            behavior::night_owl(s, &p.filter).and_then(to_value)
        }),
        Op::QueryDragonKing(p) => with_read(state, &p.session_id, |s| {
            behavior::dragon_king(s, &p.filter).and_then(to_value)
        }),
        Op::QueryDiving(p) => with_read(state, &p.session_id, |s| {
            behavior::diving(s, &p.filter).and_then(to_value)
        }),
        Op::QueryMonologue(p) => with_read(state, &p.session_id, |s| {
            behavior::monologue(s, &p.filter).and_then(to_value)
        }),
        Op::QueryMention(p) => with_read(state, &p.session_id, |s| {
            behavior::mention(s, &p.filter).and_then(to_value)
        }),
        Op::QueryMentionGraph(p) => with_read(state, &p.session_id, |s| {
            behavior::mention_graph(s, &p.filter).and_then(to_value)
        }),
        Op::QueryLaugh(p) => with_read(state, &p.session_id, |s| {
            behavior::laugh(s, &p.filter).and_then(to_value)
        }),
        Op::QueryMemeBattle(p) => with_read(state, &p.session_id, |s| {
            behavior::meme_battle(s, &p.filter).and_then(to_value)
        }),
        Op::QueryCheckIn(p) => with_read(state, &p.session_id, |s| {
            behavior::check_in(s, &p.filter).and_then(to_value)
        }),

        // ─── messages ───
        Op::MsgSearch(p) => {
            let spec = search_spec(&p.filter, &p.keywords, p.sender_id, p.limit);
            with_read(state, &p.session_id, |s| {
                messages::search(s, &spec).and_then(to_value)
            })
        }
        Op::MsgContext(p) => with_read(state, &p.session_id, |s| {
            messages::context(s, &p.ids, p.k).and_then(to_value)
        }),
        Op::MsgRecent(p) => {
            let spec = search_spec(&p.filter, &[], None, p.limit);
            let limit = p.limit.unwrap_or(messages::DEFAULT_PAGE);
            with_read(state, &p.session_id, |s| {
                messages::recent(s, &spec, limit).and_then(to_value)
            })
        }
        Op::MsgAllRecent(p) => {
            let limit = p.limit.unwrap_or(messages::DEFAULT_PAGE);
            let ids = state.dirs.list_sessions()?;
            all_recent(state, &ids, &QueryFilter::default(), limit)
        }
        Op::MsgBetween(p) => {
            let limit = p.limit.unwrap_or(1000);
            with_read(state, &p.session_id, |s| {
                messages::between(s, &p.filter, p.start_ts, p.end_ts, limit).and_then(to_value)
            })
        }
        Op::MsgBefore(p) => {
            let spec = search_spec(&p.filter, &p.keywords, p.sender_id, p.limit);
            let limit = p.limit.unwrap_or(messages::DEFAULT_PAGE);
            with_read(state, &p.session_id, |s| {
                messages::page(s, &spec, messages::Cursor::Before(Some(p.id)), limit)
                    .and_then(to_value)
            })
        }
        Op::MsgAfter(p) => {
            let spec = search_spec(&p.filter, &p.keywords, p.sender_id, p.limit);
            let limit = p.limit.unwrap_or(messages::DEFAULT_PAGE);
            with_read(state, &p.session_id, |s| {
                messages::page(s, &spec, messages::Cursor::After(p.id), limit).and_then(to_value)
            })
        }
        Op::MsgFilterWithContext(p) => {
            let spec = search_spec(&p.filter, &p.keywords, p.sender_id, p.limit);
            with_read(state, &p.session_id, |s| {
                messages::filter_with_context(s, &spec, p.k).and_then(to_value)
            })
        }
        Op::MsgFromSessions(p) => {
            let limit = p.limit.unwrap_or(messages::DEFAULT_PAGE);
            all_recent(state, &p.session_ids, &p.filter, limit)
        }

        // ─── raw sql ───
        Op::SqlExecute(p) => {
            ensure_soft_migrated(state, &p.session_id)?;
            let db_path = state.dirs.session_db(&p.session_id);
            let result = rawsql::execute(
                &db_path,
                &p.sql,
                state.settings.sql_row_limit,
                Duration::from_millis(state.settings.sql_timeout_ms),
            )?;
            to_value(result)
        }
        Op::SqlSchema(p) => {
            let store = open_read(state, &p.session_id)?;
            to_value(rawsql::schema(store.conn())?)
        }

        // ─── merge ───
        Op::MergeCheckConflicts(p) => {
            let opts = ImportOptions::from_settings(&state.settings, abort_opt);
            let mut stores = Vec::new();
            for path in &p.paths {
                let store = state
                    .merge_cache
                    .staging_for(&state.dirs, &PathBuf::from(path), &opts)?;
                stores.push(store);
            }
            to_value(merge::check_conflicts(&stores, &opts.abort)?)
        }
        Op::MergeMergeFiles(p) => {
            let opts = ImportOptions::from_settings(&state.settings, abort_opt);
            let request = MergeRequest {
                sources: p.paths.iter().map(PathBuf::from).collect(),
                reimport: p.reimport,
            };
            let outcome = merge::merge_files(
                &state.dirs,
                &mut state.merge_cache,
                &request,
                &opts,
                progress,
            )?;
            to_value(outcome)
        }
        Op::MergeClearCache => {
            state.merge_cache.clear();
            state.dirs.sweep_staging()?;
            to_value(json!({"cleared": true}))
        }

        // ─── migration ───
        Op::MigrationCheck => to_value(migrate::check_all(&state.dirs)?),
        Op::MigrationRun => {
            state.read_cache.clear();
            to_value(migrate::run_all(&state.dirs)?)
        }
    }
}

fn search_spec(
    filter: &QueryFilter,
    keywords: &[String],
    sender_id: Option<i64>,
    limit: Option<usize>,
) -> messages::SearchSpec {
    messages::SearchSpec {
        filter: filter.clone(),
        keywords: keywords.to_vec(),
        sender_id,
        limit,
    }
}

/// Recent messages across several sessions, with the session id
/// attached per group.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionMessages {
    session_id: String,
    messages: Vec<MessageRow>,
}

fn all_recent(
    state: &mut WorkerState,
    session_ids: &[String],
    filter: &QueryFilter,
    limit: usize,
) -> Result<serde_json::Value> {
    let mut groups = Vec::new();
    for id in session_ids {
        let spec = messages::SearchSpec {
            filter: filter.clone(),
            ..Default::default()
        };
        let page = with_read(state, id, |s| messages::recent(s, &spec, limit))?;
        groups.push(SessionMessages {
            session_id: id.clone(),
            messages: page.messages,
        });
    }
    to_value(groups)
}

fn session_info(state: &mut WorkerState, session_id: &str) -> Result<SessionInfo> {
    ensure_soft_migrated(state, session_id)?;
    let store = state.read_cache.get(&state.dirs, session_id)?;
    let meta = store.read_meta()?;
    Ok(SessionInfo {
        id: session_id.to_string(),
        name: meta.name,
        platform: meta.platform,
        kind: meta.kind,
        imported_at: meta.imported_at,
        group_id: meta.group_id,
        group_avatar: meta.group_avatar,
        owner_id: meta.owner_id,
        message_count: store.message_count()?,
        member_count: store.member_count()?,
    })
}

fn open_read<'a>(state: &'a mut WorkerState, session_id: &str) -> Result<&'a SessionStore> {
    ensure_soft_migrated(state, session_id)?;
    state.read_cache.get(&state.dirs, session_id)
}

fn open_write(state: &mut WorkerState, session_id: &str) -> Result<SessionStore> {
    ensure_soft_migrated(state, session_id)?;
    SessionStore::open(&state.dirs.session_db(session_id))
}

fn with_read<T>(
    state: &mut WorkerState,
    session_id: &str,
    f: impl FnOnce(&SessionStore) -> Result<T>,
) -> Result<T> {
    let store = open_read(state, session_id)?;
    f(store)
}

/// Lazy v2 soft-migration, once per session per process.
fn ensure_soft_migrated(state: &mut WorkerState, session_id: &str) -> Result<()> {
    if state.soft_migrated.contains(session_id) {
        return Ok(());
    }
    let db_path = state.dirs.session_db(session_id);
    if !db_path.exists() {
        return Err(CoreError::NotFound(session_id.to_string()).into());
    }
    let needs_columns = {
        let probe = SessionStore::open_read(&db_path)?;
        migrate::store_version(probe.conn())? < 2
    };
    if needs_columns {
        let store = SessionStore::open(&db_path)?;
        migrate::ensure_member_columns(store.conn())?;
        state.read_cache.evict(session_id);
    }
    state.soft_migrated.insert(session_id.to_string());
    Ok(())
}
