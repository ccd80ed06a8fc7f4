//! The canonical 12-stage build plan (`spec.md` §4.1).

use crate::types::StageStatus;

use super::definition::StageDefinition;
use super::schema::{FieldConstraints, FieldSchema, FieldType, PayloadSchema};

/// Returns the built-in stage definitions in dependency order. Each is
/// immutable post-registration and shared by every build.
pub fn canonical_definitions() -> Vec<StageDefinition> {
    vec![
        StageDefinition::builder("creating_specs", "Creating Specs")
            .description("Turns the questionnaire answers into a structured project spec")
            .category("planning")
            .allowed_statuses([StageStatus::Done])
            .critical(true)
            .payload_schema(
                PayloadSchema::new().field("projectName", FieldSchema::required(FieldType::String)),
            )
            .build()
            .unwrap(),
        StageDefinition::builder("creating_docs", "Creating Docs")
            .description("Generates project documentation from the spec")
            .category("planning")
            .dependencies(&["creating_specs"])
            .allowed_statuses([StageStatus::Done])
            .build()
            .unwrap(),
        StageDefinition::builder("creating_schema", "Creating Schema")
            .description("Designs the data schema")
            .category("planning")
            .dependencies(&["creating_specs"])
            .allowed_statuses([StageStatus::Done])
            .critical(true)
            .build()
            .unwrap(),
        StageDefinition::builder("creating_workspace", "Creating Workspace")
            .description("Scaffolds the project workspace")
            .category("generation")
            .dependencies(&["creating_docs", "creating_schema"])
            .allowed_statuses([StageStatus::Created])
            .critical(true)
            .build()
            .unwrap(),
        StageDefinition::builder("creating_files", "Creating Files")
            .description("Generates source files, one sub-event per path")
            .category("generation")
            .dependencies(&["creating_workspace"])
            .multi_event(true)
            .allowed_statuses([StageStatus::Done, StageStatus::Partial])
            .timeout(std::time::Duration::from_secs(10 * 60))
            .build()
            .unwrap(),
        StageDefinition::builder("coding_file", "Coding File")
            .description("Fills in generated files with working code")
            .category("generation")
            .dependencies(&["creating_files"])
            .multi_event(true)
            .allowed_statuses([StageStatus::Done, StageStatus::Partial])
            .timeout(std::time::Duration::from_secs(15 * 60))
            .build()
            .unwrap(),
        StageDefinition::builder("running_tests", "Running Tests")
            .description("Runs the generated test suite, one sub-event per test")
            .category("verification")
            .dependencies(&["coding_file"])
            .multi_event(true)
            .allowed_statuses([StageStatus::Passed, StageStatus::Failed, StageStatus::Partial])
            .timeout(std::time::Duration::from_secs(10 * 60))
            .build()
            .unwrap(),
        StageDefinition::builder("creating_repo", "Creating Repo")
            .description("Creates the remote repository")
            .category("delivery")
            .dependencies(&["running_tests"])
            .allowed_statuses([StageStatus::Created])
            .critical(true)
            .payload_schema(PayloadSchema::new().field(
                "visibility",
                FieldSchema::optional(FieldType::String).with_constraints(FieldConstraints {
                    r#enum: Some(vec![
                        serde_json::json!("public"),
                        serde_json::json!("private"),
                    ]),
                    ..Default::default()
                }),
            ))
            .build()
            .unwrap(),
        StageDefinition::builder("repo_created", "Repo Created")
            .description("Confirms repository creation and records its URL")
            .category("delivery")
            .dependencies(&["creating_repo"])
            .allowed_statuses([StageStatus::Done])
            .retryable(false)
            .build()
            .unwrap(),
        StageDefinition::builder("pushing_files", "Pushing Files")
            .description("Pushes generated files to the repository")
            .category("delivery")
            .dependencies(&["repo_created"])
            .allowed_statuses([StageStatus::Pushed])
            .critical(true)
            .build()
            .unwrap(),
        StageDefinition::builder("deploying", "Deploying")
            .description("Provisions and deploys infrastructure, one sub-event per resource")
            .category("delivery")
            .dependencies(&["pushing_files"])
            .multi_event(true)
            .allowed_statuses([StageStatus::Deployed, StageStatus::Partial])
            .timeout(std::time::Duration::from_secs(20 * 60))
            .critical(true)
            .build()
            .unwrap(),
        StageDefinition::builder("deployment_complete", "Deployment Complete")
            .description("Finalizes the build and records deployment URLs")
            .category("delivery")
            .dependencies(&["deploying"])
            .allowed_statuses([StageStatus::Done])
            .retryable(false)
            .build()
            .unwrap(),
    ]
}
