pub mod error;
pub mod formats;
pub mod import;
pub mod merge;
pub mod parse;
pub mod paths;
pub mod query;
pub mod settings;
pub mod store;
pub mod types;
pub mod worker;

pub use error::{CoreError, Diagnosis};
pub use paths::AppDirs;
pub use settings::Settings;
pub use types::{MessageType, Platform, QueryFilter, SessionKind};
pub use worker::{AbortToken, Worker};
