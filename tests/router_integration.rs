//! Model Router integration scenarios (`spec.md` §8 scenarios 4, 5 and
//! invariants 6-8): rate-limit backpressure, cross-provider fallback, and
//! circuit breaker behavior, driven against the real `ModelRouter` rather
//! than its internal unit tests.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use buildforge::message::Message;
use buildforge::router::{AgentRole, DemoProvider, ModelRouter, Provider, ProviderSpec, RouterConfig, RouterError, RouterTask};
use common::{AlwaysDown, AlwaysRateLimited, FlakyProvider};

/// Scenario 5: primary fails, secondary (the always-succeeding demo
/// provider) picks up the call via fallback.
#[tokio::test]
async fn fallback_across_providers_uses_the_secondary() {
    let router = ModelRouter::new(RouterConfig::default());
    router
        .register(
            ProviderSpec::new("primary", [AgentRole::Coder]).with_base_reliability(0.99).with_cost_per_token(0.0001),
            Arc::new(AlwaysDown::new("primary")),
        )
        .await;
    router.register(DemoProvider::spec(), Arc::new(DemoProvider::new())).await;

    let task = RouterTask::new(AgentRole::Coder, vec![Message::user("write a handler")]);
    let response = router.route_task(task).await.expect("fallback to demo provider must succeed");
    assert_eq!(response.provider, "demo");
}

/// Invariant 6: with at least one healthy capable provider, `routeTask`
/// with fallback either succeeds or exhausts every eligible provider
/// exactly once before giving up.
#[tokio::test]
async fn fallback_exhausted_only_after_every_provider_tried() {
    let router = ModelRouter::new(RouterConfig::default());
    router.register(ProviderSpec::new("down-a", [AgentRole::Coder]), Arc::new(AlwaysDown::new("down-a"))).await;
    router.register(ProviderSpec::new("down-b", [AgentRole::Coder]), Arc::new(AlwaysDown::new("down-b"))).await;

    let task = RouterTask::new(AgentRole::Coder, vec![Message::user("write a handler")]);
    let err = router.route_task(task).await.unwrap_err();
    match err {
        RouterError::FallbackExhausted { attempts, .. } => {
            assert_eq!(attempts.len(), 2, "every eligible provider must be tried exactly once");
            let names: Vec<_> = attempts.iter().map(|a| a.provider.as_str()).collect();
            assert!(names.contains(&"down-a"));
            assert!(names.contains(&"down-b"));
        }
        other => panic!("expected FallbackExhausted, got {other:?}"),
    }
}

/// Retry/backoff: a flaky provider that fails its first two attempts but
/// succeeds on the third is retried in place rather than immediately
/// falling back.
#[tokio::test]
async fn retries_a_flaky_provider_before_giving_up() {
    let router = ModelRouter::new(RouterConfig::default());
    let flaky = Arc::new(FlakyProvider::new("flaky", 2));
    router.register(ProviderSpec::new("flaky", [AgentRole::Coder]), Arc::clone(&flaky) as Arc<dyn buildforge::router::Provider>).await;

    let task = RouterTask::new(AgentRole::Coder, vec![Message::user("write a handler")]);
    let response = router.route_task(task).await.expect("the third attempt must succeed");
    assert_eq!(response.provider, "flaky");
    assert_eq!(flaky.call_count(), 3);
}

/// Boundary: zero-length prompt never reaches a provider.
#[tokio::test]
async fn empty_prompt_is_a_client_error() {
    let router = ModelRouter::new(RouterConfig::default());
    router.register(DemoProvider::spec(), Arc::new(DemoProvider::new())).await;
    let task = RouterTask::new(AgentRole::Coder, vec![Message::user("")]);
    let err = router.route_task(task).await.unwrap_err();
    assert!(matches!(err, RouterError::EmptyPrompt));
}

/// Invariant 7 / scenario 4: over a sliding window, no more than
/// `maxRequests` dispatch to one provider; the request beyond the limit
/// queues rather than failing outright.
#[tokio::test]
async fn rate_limited_provider_serializes_dispatch_within_its_window() {
    let router = ModelRouter::new(RouterConfig::default());
    router
        .register(
            ProviderSpec::new("rate-limited", [AgentRole::Coder]),
            Arc::new(DemoProvider::new()),
        )
        .await;

    // The reservoir's default is generous; this test only asserts that
    // concurrent calls to the same provider complete serialized through the
    // limiter rather than raising an error when the demo provider always
    // succeeds — the hard 429 path is covered by `record_rate_limited`.
    let started = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..3 {
        let router = Arc::clone(&router);
        handles.push(tokio::spawn(async move {
            let task = RouterTask::new(AgentRole::Coder, vec![Message::user("ping")]);
            router.route_task(task).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().expect("demo provider always succeeds");
    }
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Scenario 4's 429 path: a provider that always returns `RateLimited` with
/// an explicit `retry-after` is recorded as a rate-limit hit rather than
/// treated as fast-fail — it is retried up to the configured attempt cap.
#[tokio::test]
async fn explicit_retry_after_is_retried_then_exhausted() {
    let router = ModelRouter::new(RouterConfig::default());
    let limited = Arc::new(AlwaysRateLimited::new("limited", 0));
    router.register(ProviderSpec::new("limited", [AgentRole::Coder]), Arc::clone(&limited) as Arc<dyn buildforge::router::Provider>).await;

    let task = RouterTask::new(AgentRole::Coder, vec![Message::user("ping")]);
    let err = router.route_task(task).await.unwrap_err();
    assert!(matches!(err, RouterError::FallbackExhausted { .. }));
    assert!(limited.call_count() >= 2, "a retryable error must be retried before giving up");
}

/// Invariant 8: after enough consecutive failures a provider's circuit
/// trips and stops receiving calls; a sibling capable provider still
/// serves the role.
#[tokio::test]
async fn circuit_breaker_stops_dispatch_after_consecutive_failures() {
    let router = ModelRouter::new(RouterConfig::default());
    // "down" has the default (lower) cost and so outweighs "backup" in
    // selection, meaning it is always tried first.
    router
        .register(
            ProviderSpec::new("down", [AgentRole::Coder]),
            Arc::new(AlwaysDown::new("down")) as Arc<dyn buildforge::router::Provider>,
        )
        .await;
    router
        .register(
            ProviderSpec::new("backup", [AgentRole::Coder]).with_cost_per_token(0.0001),
            Arc::new(FlakyProvider::new("backup", 0)) as Arc<dyn buildforge::router::Provider>,
        )
        .await;

    // One call against a consistently-failing top-weighted provider burns
    // through its internal retry budget (== the breaker's default
    // threshold), tripping the circuit before falling back to backup.
    let task = RouterTask::new(AgentRole::Coder, vec![Message::user("ping")]);
    let response = router.route_task(task).await.expect("fallback to backup succeeds");
    assert_eq!(response.provider, "backup");

    // With the breaker now open, a further call skips "down" outright
    // rather than burning its retry/backoff budget again.
    let started = Instant::now();
    let task = RouterTask::new(AgentRole::Coder, vec![Message::user("ping")]);
    let response = router.route_task(task).await.expect("backup is still healthy");
    assert_eq!(response.provider, "backup");
    assert!(started.elapsed() < Duration::from_millis(200), "an open circuit must skip the down provider with no retry delay");
}

/// `spec.md` §4.2: "Open skips the provider for a timeout window, after
/// which it enters Half-Open"; §8 invariant 8 implies recovery once the
/// timeout elapses. A provider that trips the breaker on its first call but
/// is healthy again afterward must become selectable — and succeed — once
/// its open-timeout has passed, rather than staying excluded forever.
#[tokio::test]
async fn circuit_breaker_recovers_after_open_timeout_elapses() {
    // max_retries = 1 so the first failure is final for that attempt rather
    // than being retried in place before the breaker even has a chance to
    // be observed as open by a later, separate `route_task` call.
    let config = RouterConfig { max_retries: 1, ..RouterConfig::default() };
    let router = ModelRouter::new(config);

    let flaky = Arc::new(FlakyProvider::new("flaky", 1));
    router
        .register(
            ProviderSpec::new("flaky", [AgentRole::Coder]).with_circuit_config(1, Duration::from_millis(30)),
            Arc::clone(&flaky) as Arc<dyn Provider>,
        )
        .await;
    router
        .register(
            ProviderSpec::new("backup", [AgentRole::Coder]).with_cost_per_token(0.01),
            Arc::new(FlakyProvider::new("backup", 0)) as Arc<dyn Provider>,
        )
        .await;

    // First call: "flaky" (lower cost, tried first) fails once, tripping
    // its breaker open; the call still succeeds overall via fallback.
    let task = RouterTask::new(AgentRole::Coder, vec![Message::user("ping")]);
    let response = router.route_task(task).await.expect("fallback to backup succeeds");
    assert_eq!(response.provider, "backup");

    // Immediately after, "flaky" is still within its open-timeout window
    // and must not be selected.
    let task = RouterTask::new(AgentRole::Coder, vec![Message::user("ping")]);
    let response = router.route_task(task).await.expect("backup still healthy");
    assert_eq!(response.provider, "backup", "flaky's breaker should still be open immediately after tripping");

    // Wait past the 30ms open-timeout, then try again: "flaky" has since
    // recovered (its second call onward always succeeds), so it must be
    // selectable again and serve this request directly.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let task = RouterTask::new(AgentRole::Coder, vec![Message::user("ping")]);
    let response = router.route_task(task).await.expect("flaky has recovered");
    assert_eq!(response.provider, "flaky", "a timed-out Open breaker must become selectable again (Half-Open)");
}
