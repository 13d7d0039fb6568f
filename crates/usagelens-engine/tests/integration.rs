//! Integration tests for the usagelens-engine crate.
//!
//! A scripted collaborator answers each call from a queue and records what
//! it was asked, so the tests can check both the summaries and the exact
//! number of outbound calls.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use usagelens_adapters::{Collaborator, TransportError};
use usagelens_engine::{CancelToken, EngineConfig, EngineError, Orchestrator, SummaryStatus};
use usagelens_intent::{IntentRegistry, PipelineSpec, Query, ResourceLookup, Source};

// ═══════════════════════════════════════════════════════════════════════
//  Scripted collaborator
// ═══════════════════════════════════════════════════════════════════════

type Reply = Result<Value, TransportError>;

#[derive(Default)]
struct Scripted {
    replies: Mutex<VecDeque<Reply>>,
    seen: Mutex<Vec<Query>>,
    delay: Duration,
}

impl Scripted {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn seen(&self) -> Vec<Query> {
        self.seen.lock().unwrap().clone()
    }

    /// Next scripted reply; an exhausted script answers with no data.
    async fn reply(&self, query: Query) -> Reply {
        self.seen.lock().unwrap().push(query);
        tokio::time::sleep(self.delay).await;
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!([])))
    }
}

#[async_trait]
impl Collaborator for Scripted {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn execute_pipeline(&self, spec: &PipelineSpec) -> usagelens_adapters::Result<Vec<Value>> {
        let reply = self.reply(Query::Pipeline(spec.clone())).await?;
        Ok(reply.as_array().cloned().unwrap_or_default())
    }

    async fn lookup_resource(&self, lookup: &ResourceLookup) -> usagelens_adapters::Result<Value> {
        self.reply(Query::Lookup(lookup.clone())).await
    }
}

fn orchestrator(collaborator: Arc<Scripted>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(IntentRegistry::new()),
        collaborator,
        EngineConfig::default(),
    )
}

fn empty() -> Reply {
    Ok(json!([]))
}

fn rows(rows: Value) -> Reply {
    Ok(rows)
}

fn rate_limited() -> Reply {
    Err(TransportError::RateLimited {
        retry_after_secs: Some(1),
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  Scenarios
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn empty_usage_falls_back_to_feature_adoption() {
    let collaborator = Scripted::new(vec![
        empty(),
        rows(json!([{"featureId": "export", "visitors": 12, "accounts": 3, "events": 40}])),
    ]);
    let orchestrator = orchestrator(collaborator.clone());

    let summary = orchestrator
        .invoke("analyze_usage", &json!({"days_back": 30, "group_by": "week"}))
        .await
        .unwrap();

    assert_eq!(summary.status, SummaryStatus::Complete);
    assert_eq!(summary.source_strategy_level, 1);
    assert!(summary.narrative_hints[0].contains("FeatureAdoption"));
    assert_eq!(summary.answered_by.as_deref(), Some("analyze_feature_adoption"));
    assert_eq!(collaborator.calls(), 2);

    let seen = collaborator.seen();
    assert_eq!(seen[1].pipeline().unwrap().source(), Some(Source::FeatureEvents));
}

#[tokio::test]
async fn primary_success_has_no_hints() {
    let collaborator = Scripted::new(vec![rows(json!([
        {"day": 1_709_251_200_000_i64, "uniqueVisitors": 5, "totalEvents": 50, "totalMinutes": 3}
    ]))]);
    let orchestrator = orchestrator(collaborator.clone());

    let summary = orchestrator
        .invoke("analyze_usage", &json!({"days_back": 7, "group_by": "day"}))
        .await
        .unwrap();

    assert_eq!(summary.source_strategy_level, 0);
    assert!(summary.narrative_hints.is_empty());
    assert!(summary.answered_by.is_none());
    assert_eq!(summary.primary_metric_count, 50.0);
    assert_eq!(summary.attempts.len(), 1);
    assert_eq!(collaborator.calls(), 1);
}

#[tokio::test]
async fn over_limit_search_is_rejected_without_calls() {
    let collaborator = Scripted::new(vec![]);
    let orchestrator = orchestrator(collaborator.clone());

    let err = orchestrator
        .invoke("search_pages", &json!({"days_back": null, "limit": 200}))
        .await
        .unwrap_err();

    assert!(matches!(&err, EngineError::Validation { field, .. } if field == "limit"));
    assert_eq!(collaborator.calls(), 0);
}

#[tokio::test]
async fn two_rate_limits_then_success_answers_at_level_two() {
    let collaborator = Scripted::new(vec![
        rate_limited(),
        rate_limited(),
        rows(json!([{"id": "home", "name": "Home"}])),
    ]);
    let orchestrator = orchestrator(collaborator.clone());

    let summary = orchestrator
        .invoke("analyze_usage", &json!({"days_back": 7}))
        .await
        .unwrap();

    assert_eq!(summary.source_strategy_level, 2);
    assert_eq!(summary.answered_by.as_deref(), Some("search_pages"));
    assert_eq!(summary.attempts[0].outcome, "rate limited");
    assert_eq!(collaborator.calls(), 3);
}

// ═══════════════════════════════════════════════════════════════════════
//  Cascade properties
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn all_empty_exhausts_after_exactly_plan_len_attempts() {
    let registry = IntentRegistry::new();
    for entry in registry.entries() {
        let args = match entry.tool_name.as_str() {
            "analyze_funnels" => json!({"steps": ["a", "b"]}),
            "analyze_user_paths" => json!({"start_page_id": "home"}),
            name if name.starts_with("get_") => json!({"id": "x"}),
            _ => json!({}),
        };
        let collaborator = Scripted::new(vec![]);
        let orchestrator = orchestrator(collaborator.clone());

        let summary = orchestrator.invoke(&entry.tool_name, &args).await.unwrap();

        assert_eq!(summary.status, SummaryStatus::Exhausted, "{}", entry.tool_name);
        assert_eq!(summary.attempts.len(), entry.plan.len(), "{}", entry.tool_name);
        assert!(collaborator.calls() <= entry.plan.len(), "{}", entry.tool_name);
        assert_no_repeats(&collaborator.seen(), &entry.tool_name);
        assert!(summary.narrative_hints.iter().any(|h| h.starts_with("Try ")));
    }
}

fn assert_no_repeats(seen: &[Query], tool: &str) {
    for (i, query) in seen.iter().enumerate() {
        assert!(
            !seen[..i].contains(query),
            "{tool} sent the same query twice: {query:?}"
        );
    }
}

#[tokio::test]
async fn repeated_fallback_queries_are_not_resent() {
    let cases = [
        ("search_pages", json!({}), 1),
        ("analyze_segments", json!({}), 2),
        ("analyze_nps_feedback", json!({"days_back": 90}), 2),
    ];
    for (tool, args, calls) in cases {
        let collaborator = Scripted::new(vec![]);
        let orchestrator = orchestrator(collaborator.clone());

        let summary = orchestrator.invoke(tool, &args).await.unwrap();

        assert_eq!(summary.status, SummaryStatus::Exhausted, "{tool}");
        assert_eq!(collaborator.calls(), calls, "{tool}");
        assert_no_repeats(&collaborator.seen(), tool);
        assert_eq!(summary.attempts[1].outcome, "skipped (same query)", "{tool}");
        assert_eq!(summary.attempts[1].elapsed, Duration::ZERO);
    }
}

#[tokio::test]
async fn rate_limited_search_is_not_resent_as_its_own_fallback() {
    let collaborator = Scripted::new(vec![rate_limited()]);
    let orchestrator = orchestrator(collaborator.clone());

    let summary = orchestrator.invoke("search_pages", &json!({})).await.unwrap();

    assert_eq!(summary.status, SummaryStatus::Exhausted);
    assert_eq!(collaborator.calls(), 1);
    let outcomes: Vec<&str> = summary.attempts.iter().map(|a| a.outcome.as_str()).collect();
    assert_eq!(outcomes, ["rate limited", "skipped (same query)"]);
}

#[tokio::test]
async fn search_with_filters_still_falls_back_to_a_listing() {
    let collaborator = Scripted::new(vec![empty(), rows(json!([{"id": "home"}]))]);
    let orchestrator = orchestrator(collaborator.clone());

    let summary = orchestrator
        .invoke("search_pages", &json!({"query": "checkout"}))
        .await
        .unwrap();

    assert_eq!(summary.status, SummaryStatus::Complete);
    assert_eq!(summary.source_strategy_level, 1);
    assert_eq!(collaborator.calls(), 2);
    assert_no_repeats(&collaborator.seen(), "search_pages");
}

#[tokio::test]
async fn auth_failure_short_circuits() {
    let collaborator = Scripted::new(vec![Err(TransportError::AuthFailed { status: 401 })]);
    let orchestrator = orchestrator(collaborator.clone());

    let err = orchestrator
        .invoke("analyze_usage", &json!({}))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        EngineError::AuthFailed {
            status: 401,
            attempts: 1
        }
    );
    assert!(err.remediation().contains("PENDO_INTEGRATION_KEY"));
    assert_eq!(collaborator.calls(), 1);
}

#[tokio::test]
async fn auth_failure_after_fallback_stops_there() {
    let collaborator = Scripted::new(vec![
        empty(),
        Err(TransportError::AuthFailed { status: 403 }),
    ]);
    let orchestrator = orchestrator(collaborator.clone());

    let err = orchestrator
        .invoke("analyze_usage", &json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::AuthFailed { status: 403, attempts: 2 }));
    assert_eq!(collaborator.calls(), 2);
}

#[tokio::test]
async fn invalid_parameters_never_reach_the_collaborator() {
    let collaborator = Scripted::new(vec![]);
    let orchestrator = orchestrator(collaborator.clone());

    for (tool, args) in [
        ("analyze_usage", json!({"days_back": 0})),
        ("analyze_usage", json!({"group_by": "year"})),
        ("analyze_usage", json!({"unexpected": true})),
        ("analyze_funnels", json!({"steps": ["only-one"]})),
        ("analyze_retention", json!({"period": "month", "periods": 6})),
        ("get_visitor_details", json!({})),
    ] {
        let err = orchestrator.invoke(tool, &args).await.unwrap_err();
        assert!(err.is_caller_error(), "{tool} {args}: {err}");
    }
    assert_eq!(collaborator.calls(), 0);
}

#[tokio::test]
async fn unknown_tool_names_suggestions() {
    let collaborator = Scripted::new(vec![]);
    let orchestrator = orchestrator(collaborator.clone());

    let err = orchestrator
        .invoke("analyze_everything", &json!({}))
        .await
        .unwrap_err();

    match err {
        EngineError::UnknownIntent { suggestions, .. } => {
            assert!(suggestions.iter().all(|s| s.starts_with("analyze_")));
            assert!(!suggestions.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(collaborator.calls(), 0);
}

#[tokio::test]
async fn collaborator_rejection_of_primary_is_validation() {
    let collaborator = Scripted::new(vec![Err(TransportError::BadRequest {
        message: "bad pipeline".into(),
    })]);
    let orchestrator = orchestrator(collaborator.clone());

    let err = orchestrator
        .invoke("analyze_usage", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(&err, EngineError::Validation { field, .. } if field == "query"));
    assert_eq!(collaborator.calls(), 1);
}

#[tokio::test]
async fn collaborator_rejection_of_fallback_is_a_defect() {
    let collaborator = Scripted::new(vec![
        empty(),
        Err(TransportError::BadRequest {
            message: "bad pipeline".into(),
        }),
    ]);
    let orchestrator = orchestrator(collaborator.clone());

    let err = orchestrator
        .invoke("analyze_usage", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InternalDefect { level: 1, .. }));
    assert_eq!(collaborator.calls(), 2);
}

#[tokio::test]
async fn missing_visitor_falls_back_to_partial_search() {
    let collaborator = Scripted::new(vec![
        Err(TransportError::NotFound {
            resource: "/api/v1/visitor/jo".into(),
        }),
        rows(json!([{"visitorId": "joanna", "accountId": "acme"}])),
    ]);
    let orchestrator = orchestrator(collaborator.clone());

    let summary = orchestrator
        .invoke("get_visitor_details", &json!({"id": "jo"}))
        .await
        .unwrap();

    assert_eq!(summary.source_strategy_level, 1);
    assert_eq!(summary.grouped_series[0].key, "joanna");
    let seen = collaborator.seen();
    assert!(seen[0].is_lookup());
    assert_eq!(seen[1].pipeline().unwrap().source(), Some(Source::Visitors));
}

// ═══════════════════════════════════════════════════════════════════════
//  Time budget and cancellation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn cascade_budget_caps_total_time() {
    let collaborator = Scripted::slow(Duration::from_secs(600));
    let orchestrator = Orchestrator::new(
        Arc::new(IntentRegistry::new()),
        collaborator.clone(),
        EngineConfig::default()
            .with_call_timeout(Duration::from_secs(30))
            .with_cascade_budget(Duration::from_secs(45)),
    );

    let summary = orchestrator
        .invoke("analyze_usage", &json!({}))
        .await
        .unwrap();

    assert_eq!(summary.status, SummaryStatus::Exhausted);
    assert_eq!(collaborator.calls(), 2);
    assert!(summary.attempts.iter().all(|a| a.outcome == "timeout"));
    assert!(
        summary
            .narrative_hints
            .iter()
            .any(|h| h.contains("time budget"))
    );
}

#[tokio::test]
async fn cancelled_invocation_starts_no_level() {
    let collaborator = Scripted::new(vec![]);
    let orchestrator = orchestrator(collaborator.clone());
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = orchestrator
        .invoke_with_cancel("analyze_usage", &json!({}), &cancel)
        .await
        .unwrap_err();

    assert_eq!(err, EngineError::Cancelled);
    assert_eq!(collaborator.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_call_stops_the_cascade() {
    let collaborator = Scripted::slow(Duration::from_secs(20));
    let orchestrator = Arc::new(orchestrator(collaborator.clone()));
    let cancel = CancelToken::new();

    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            orchestrator
                .invoke_with_cancel("analyze_usage", &json!({}), &cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err, EngineError::Cancelled);
    assert_eq!(collaborator.calls(), 1);
}
