//! Demo: rendering a stage-error ladder the way a build accumulates it —
//! an app-scoped bootstrap failure, a router fallback attempt, and a
//! critical stage's final failure — with both colored and plain rendering.
//!
//! ```bash
//! cargo run --example error_ladder
//! ```

use buildforge::errors::{pretty_print, pretty_print_with_mode, ErrorEvent, LadderError};
use buildforge::telemetry::FormatterMode;
use chrono::{TimeZone, Utc};
use serde_json::json;

fn main() {
    let t0 = Utc.with_ymd_and_hms(2026, 7, 26, 9, 0, 0).unwrap();
    let t1 = Utc.with_ymd_and_hms(2026, 7, 26, 9, 0, 4).unwrap();
    let t2 = Utc.with_ymd_and_hms(2026, 7, 26, 9, 0, 9).unwrap();

    let events = vec![
        {
            let mut e = ErrorEvent::router("acme-llm", LadderError::msg("provider unavailable: simulated outage").with_details(json!({"status": 503})))
                .with_tag("retryable")
                .with_context(json!({"build_id": "b-1", "role": "coder"}));
            e.when = t0;
            e
        },
        {
            let mut e = ErrorEvent::stage(
                "creating_schema",
                3,
                LadderError::msg("stage creating_schema failed after 3 attempts: all eligible providers failed").with_cause(LadderError::msg("FallbackExhausted")),
            )
            .with_tag("final_failure")
            .with_context(json!({"build_id": "b-1"}));
            e.when = t1;
            e
        },
        {
            let mut e = ErrorEvent::orchestrator("b-1", LadderError::msg("build failed: critical stage creating_schema could not complete")).with_tag("terminal");
            e.when = t2;
            e
        },
    ];

    println!("-- plain --");
    println!("{}", pretty_print_with_mode(&events, FormatterMode::Plain));
    println!("-- auto (colored if this is a tty) --");
    println!("{}", pretty_print(&events));
}
