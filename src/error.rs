//! Typed errors surfaced across the worker boundary.
//!
//! Internal plumbing uses `anyhow` with context; operations that must
//! reach the caller with a stable code raise a `CoreError`, which the
//! worker downcasts when building the error body of a response.

use serde::Serialize;
use thiserror::Error;

/// Why detection failed, returned alongside `unrecognized_format`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub suggestion: String,
    pub partial_matches: Vec<PartialMatch>,
}

/// A format that satisfied at least one signature but not all of them.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartialMatch {
    pub format_name: String,
    pub missing_fields: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no known format matched the input")]
    UnrecognizedFormat { diagnosis: Diagnosis },

    #[error("sources report more than one platform: {platforms:?}")]
    MixedPlatforms { platforms: Vec<String> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("sql rejected: {0}")]
    Sql(String),

    #[error("{behind} store(s) behind schema version {latest}")]
    MigrationRequired { behind: usize, latest: u32 },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("i/o error: {0}")]
    Io(String),
}

impl CoreError {
    /// Stable wire code for the error surface.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::UnrecognizedFormat { .. } => "unrecognized_format",
            CoreError::MixedPlatforms { .. } => "mixed_platforms",
            CoreError::NotFound(_) => "not_found",
            CoreError::Cancelled => "cancelled",
            CoreError::Sql(_) => "sql_error",
            CoreError::MigrationRequired { .. } => "migration_required",
            CoreError::Parse(_) => "parse_error",
            CoreError::Io(_) => "io_error",
        }
    }

    pub fn diagnosis(&self) -> Option<&Diagnosis> {
        match self {
            CoreError::UnrecognizedFormat { diagnosis } => Some(diagnosis),
            _ => None,
        }
    }
}

/// Serialized error body of a worker response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
}

impl ErrorBody {
    /// Map an error chain to its wire representation. Typed core errors
    /// keep their code; everything else is classified by source.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        if let Some(core) = err.downcast_ref::<CoreError>() {
            return ErrorBody {
                code: core.code().to_string(),
                message: core.to_string(),
                diagnosis: core.diagnosis().cloned(),
            };
        }
        let code = if err.downcast_ref::<rusqlite::Error>().is_some() {
            "sql_error"
        } else if err.downcast_ref::<serde_json::Error>().is_some() {
            "parse_error"
        } else {
            "io_error"
        };
        ErrorBody {
            code: code.to_string(),
            message: format!("{err:#}"),
            diagnosis: None,
        }
    }
}
