//! Stage execution contract and built-in stage handlers (`spec.md` §4.1,
//! §4.3). The Pipeline Orchestrator drives builds; this module supplies the
//! per-stage work each [`handler::StageHandler`] does once invoked.

mod artifact_parser;
mod builtins;
mod context;
mod errors;
mod handler;

pub use artifact_parser::{parse_named_files, parse_unified_diff, DiffFile, NamedFile, ParseError};
pub use builtins::builtin_handlers;
pub use context::StageContext;
pub use errors::StageError;
pub use handler::{StageHandler, StageOutcome};
