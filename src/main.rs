//! `chatlab` — command-line host for the ingestion/query core.
//!
//! Every subcommand goes through the worker request surface, so the CLI
//! doubles as an end-to-end exercise of the same protocol the desktop
//! shell speaks. `chatlab serve` exposes that protocol directly as an
//! NDJSON loop on stdin/stdout.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use chatlab_core::worker::{ProgressEvent, Request, Response, Worker};
use chatlab_core::{AppDirs, Settings};

#[derive(Parser)]
#[command(name = "chatlab")]
#[command(version)]
#[command(about = "Chat-export ingestion, merge, and analytics")]
struct Cli {
    /// Application data root (default: ~/Documents/ChatLab, or $CHATLAB_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import an export file as a new session
    Import {
        file: PathBuf,
    },
    /// Show what a file would import, without writing
    Info {
        file: PathBuf,
    },
    /// List sessions
    Sessions,
    /// Rename a session
    Rename {
        session: String,
        name: String,
    },
    /// Delete a session and its store
    Delete {
        session: String,
    },
    /// List members of a session
    Members {
        session: String,
    },
    /// Run a query operation (e.g. memberActivity, hourly, laugh)
    Query {
        session: String,
        operation: String,
        #[arg(long)]
        start_ts: Option<i64>,
        #[arg(long)]
        end_ts: Option<i64>,
        #[arg(long)]
        member_id: Option<i64>,
    },
    /// Search messages by keyword OR-group
    Search {
        session: String,
        keywords: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Execute a read-only SQL statement against a session store
    Sql {
        session: String,
        query: String,
    },
    /// Build (or rebuild) the session index
    Index {
        session: String,
        #[arg(long)]
        gap: Option<i64>,
    },
    /// Check sources for merge conflicts
    MergeCheck {
        files: Vec<PathBuf>,
    },
    /// Merge sources into a canonical export
    Merge {
        files: Vec<PathBuf>,
        /// Import the merged export as a new session
        #[arg(long)]
        reimport: bool,
    },
    /// Check or run schema migrations
    Migrate {
        #[arg(long)]
        check: bool,
    },
    /// Serve the worker protocol as NDJSON on stdin/stdout
    Serve,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli
        .root
        .or_else(|| std::env::var("CHATLAB_ROOT").ok().map(PathBuf::from))
        .unwrap_or_else(AppDirs::default_root);
    let dirs = AppDirs::new(root)?;
    let settings = Settings::load(&dirs);
    let worker = Worker::spawn(dirs, settings)?;

    match cli.command {
        Command::Import { file } => submit_with_progress(
            &worker,
            request("import.stream", json!({"path": path_str(&file)?}))?,
        ),
        Command::Info { file } => submit(
            &worker,
            request("import.parseFileInfo", json!({"path": path_str(&file)?}))?,
        ),
        Command::Sessions => submit(&worker, request_bare("session.getAll")?),
        Command::Rename { session, name } => submit(
            &worker,
            request("session.rename", json!({"sessionId": session, "name": name}))?,
        ),
        Command::Delete { session } => submit(
            &worker,
            request("session.delete", json!({"sessionId": session}))?,
        ),
        Command::Members { session } => submit(
            &worker,
            request("member.list", json!({"sessionId": session}))?,
        ),
        Command::Query {
            session,
            operation,
            start_ts,
            end_ts,
            member_id,
        } => {
            let filter = json!({"startTs": start_ts, "endTs": end_ts, "memberId": member_id});
            submit(
                &worker,
                request(
                    &format!("query.{operation}"),
                    json!({"sessionId": session, "filter": filter}),
                )?,
            )
        }
        Command::Search {
            session,
            keywords,
            limit,
        } => submit(
            &worker,
            request(
                "msg.search",
                json!({"sessionId": session, "keywords": keywords, "limit": limit}),
            )?,
        ),
        Command::Sql { session, query } => submit(
            &worker,
            request("sql.execute", json!({"sessionId": session, "sql": query}))?,
        ),
        Command::Index { session, gap } => submit(
            &worker,
            request(
                "session.generateIndex",
                json!({"sessionId": session, "gapSeconds": gap}),
            )?,
        ),
        Command::MergeCheck { files } => submit(
            &worker,
            request("merge.checkConflicts", json!({"paths": paths(&files)?}))?,
        ),
        Command::Merge { files, reimport } => submit_with_progress(
            &worker,
            request(
                "merge.mergeFiles",
                json!({"paths": paths(&files)?, "reimport": reimport}),
            )?,
        ),
        Command::Migrate { check } => {
            let op = if check { "migration.check" } else { "migration.run" };
            submit(&worker, request_bare(op)?)
        }
        Command::Serve => serve(&worker),
    }
}

fn path_str(path: &PathBuf) -> Result<String> {
    Ok(path
        .canonicalize()
        .with_context(|| format!("no such file: {}", path.display()))?
        .to_string_lossy()
        .into_owned())
}

fn paths(files: &[PathBuf]) -> Result<Vec<String>> {
    files.iter().map(path_str).collect()
}

fn request(op: &str, payload: serde_json::Value) -> Result<Request> {
    let id = uuid::Uuid::new_v4().simple().to_string();
    Ok(serde_json::from_value(
        json!({"id": id, "op": op, "payload": payload}),
    )?)
}

fn request_bare(op: &str) -> Result<Request> {
    let id = uuid::Uuid::new_v4().simple().to_string();
    Ok(serde_json::from_value(json!({"id": id, "op": op}))?)
}

fn print_response(response: &Response) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    if response.ok {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn submit(worker: &Worker, request: Request) -> Result<()> {
    let response = worker.submit(request);
    print_response(&response)
}

fn submit_with_progress(worker: &Worker, request: Request) -> Result<()> {
    let (tx, rx) = crossbeam_channel::unbounded::<ProgressEvent>();
    let drain = std::thread::spawn(move || {
        for event in rx {
            eprintln!(
                "[{}] {:?} {}% ({} messages)",
                event.id,
                event.progress.stage,
                event.progress.percentage,
                event.progress.messages_processed
            );
        }
    });
    let response = worker.submit_with(request, Some(tx), chatlab_core::AbortToken::new());
    let _ = drain.join();
    print_response(&response)
}

/// NDJSON protocol loop: one request per stdin line, responses and
/// progress events on stdout.
fn serve(worker: &Worker) -> Result<()> {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                println!(
                    "{}",
                    json!({"id": null, "ok": false, "error": {"code": "parse_error", "message": e.to_string()}})
                );
                continue;
            }
        };

        let (tx, rx) = crossbeam_channel::unbounded::<ProgressEvent>();
        let printer = std::thread::spawn(move || {
            for event in rx {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(_) => {}
                }
            }
        });
        let response = worker.submit_with(request, Some(tx), chatlab_core::AbortToken::new());
        let _ = printer.join();
        println!("{}", serde_json::to_string(&response)?);
    }
    Ok(())
}
