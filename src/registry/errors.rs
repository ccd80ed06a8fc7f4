use thiserror::Error;

use crate::types::StageId;

#[cfg(feature = "diagnostics")]
use miette::Diagnostic;

/// Stage Registry failure modes (`SPEC_FULL.md` §4.1, §7).
///
/// `register` is the only fallible lookup; every other accessor returns
/// absence (`None`/`false`/empty) rather than an error.
#[derive(Debug, Error)]
#[cfg_attr(feature = "diagnostics", derive(Diagnostic))]
pub enum RegistryError {
    #[error("invalid stage definition '{id}': {errors:?}")]
    #[cfg_attr(
        feature = "diagnostics",
        diagnostic(code(buildforge::registry::invalid_definition))
    )]
    InvalidDefinition { id: StageId, errors: Vec<String> },

    #[error("stage id '{0}' is already registered")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(buildforge::registry::duplicate)))]
    DuplicateId(StageId),

    #[error("dependency cycle detected: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(buildforge::registry::cycle)))]
    CycleDetected(String),

    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    #[cfg_attr(
        feature = "diagnostics",
        diagnostic(code(buildforge::registry::unknown_dependency))
    )]
    UnknownDependency { stage: StageId, dependency: StageId },
}

impl RegistryError {
    /// Client-side errors under `SPEC_FULL.md` §7's taxonomy — never retried.
    pub fn retryable(&self) -> bool {
        false
    }
}
