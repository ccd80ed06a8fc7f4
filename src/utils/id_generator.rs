//! Identifier generation for builds, stage instances, and idempotency keys.

use uuid::Uuid;

/// Generates a build id of the form `build_<uuid>`.
#[must_use]
pub fn generate_build_id() -> String {
    format!("build_{}", Uuid::new_v4().simple())
}

/// Generates a stage-instance id scoped to a build, e.g. `b-1/coding_file#1`
/// where the trailing number is the attempt count.
#[must_use]
pub fn generate_stage_instance_id(build_id: &str, stage: &str, attempt: u32) -> String {
    format!("{build_id}/{stage}#{attempt}")
}

/// Generates an idempotency-safe correlation id for outbound provider calls.
#[must_use]
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}
