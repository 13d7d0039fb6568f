//! Integration tests for the usagelens-intent crate.
//!
//! These tests drive the registry, validator, and builders together the way
//! the engine does: resolve a tool name, validate raw arguments, build the
//! query, then walk the fallback plan.

use serde_json::json;
use usagelens_intent::{
    EntityKind, Intent, IntentError, IntentRegistry, Period, Query, Source, Stage, WindowAnchor,
};

// ═══════════════════════════════════════════════════════════════════════
//  Resolve → validate → build
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn usage_request_builds_a_daily_event_pipeline() {
    let registry = IntentRegistry::new();
    let entry = registry.resolve("analyze_usage").unwrap();
    let params = entry
        .schema
        .validate(&json!({"days_back": 7, "group_by": "day"}))
        .unwrap();

    let query = (entry.build)(entry.intent, &params).unwrap();
    let spec = query.pipeline().unwrap();

    assert_eq!(spec.source(), Some(Source::Events));
    let window = spec.window().unwrap();
    assert_eq!(window.period, Period::Day);
    assert_eq!(window.count, 7);
    assert_eq!(window.start, WindowAnchor::PeriodsAgo(7));
    assert_eq!(spec.group_keys(), ["day"]);
    assert!(spec.is_canonically_ordered());
}

#[test]
fn validation_failure_names_the_field() {
    let registry = IntentRegistry::new();
    let entry = registry.resolve("analyze_usage").unwrap();
    let err = entry.schema.validate(&json!({"days_back": 120})).unwrap_err();
    assert!(matches!(&err, IntentError::Validation { field, .. } if field == "days_back"));
    assert!(err.to_string().contains("days_back"));
}

#[test]
fn funnel_requires_steps() {
    let registry = IntentRegistry::new();
    let entry = registry.resolve("analyze_funnels").unwrap();
    let err = entry.schema.validate(&json!({})).unwrap_err();
    assert_eq!(err.field(), Some("steps"));
}

#[test]
fn lookup_builds_a_resource_query() {
    let registry = IntentRegistry::new();
    let entry = registry.resolve("get_visitor_details").unwrap();
    let params = entry.schema.validate(&json!({"id": "v-42"})).unwrap();
    let query = (entry.build)(entry.intent, &params).unwrap();
    assert!(query.is_lookup());
    match query {
        Query::Lookup(lookup) => {
            assert_eq!(lookup.path, "/api/v1/visitor");
            assert_eq!(lookup.id, "v-42");
        }
        Query::Pipeline(_) => unreachable!(),
    }
}

#[test]
fn unknown_tool_is_rejected_with_suggestions() {
    let registry = IntentRegistry::new();
    let err = registry.resolve("search_widgets").unwrap_err();
    let text = err.to_string();
    assert!(text.contains("search_widgets"));
    assert!(text.contains("search_pages"));
}

// ═══════════════════════════════════════════════════════════════════════
//  Fallback plans
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn usage_plan_walks_to_feature_adoption_then_searches() {
    let registry = IntentRegistry::new();
    let entry = registry.entry(Intent::UsageAnalysis).unwrap();
    let params = entry
        .schema
        .validate(&json!({"days_back": 7, "app_id": "web"}))
        .unwrap();

    let targets: Vec<Intent> = (0..entry.plan.len())
        .map(|level| registry.rebind(entry, level, &params).unwrap().0)
        .collect();
    assert_eq!(
        targets,
        vec![
            Intent::UsageAnalysis,
            Intent::FeatureAdoption,
            Intent::EntitySearch(EntityKind::Pages),
            Intent::EntitySearch(EntityKind::Visitors),
        ]
    );

    let (_, rebound) = registry.rebind(entry, 1, &params).unwrap();
    assert_eq!(rebound.int("days_back"), Some(7));
    assert_eq!(rebound.text("app_id"), Some("web"));
}

#[test]
fn lookup_plan_degrades_to_partial_match_then_listing() {
    let registry = IntentRegistry::new();
    let entry = registry.resolve("get_account_details").unwrap();
    let params = entry.schema.validate(&json!({"id": "acme"})).unwrap();

    let (intent, partial) = registry.rebind(entry, 1, &params).unwrap();
    assert_eq!(intent, Intent::EntitySearch(EntityKind::Accounts));
    assert_eq!(partial.text("query"), Some("acme"));

    let (_, listing) = registry.rebind(entry, 2, &params).unwrap();
    assert!(listing.text("query").is_none());
    let query = (registry.entry(intent).unwrap().build)(intent, &listing).unwrap();
    assert_eq!(
        query.pipeline().unwrap().stages(),
        &[Stage::Source(Source::Accounts), Stage::Limit(10)]
    );
}

#[test]
fn retention_fallback_keeps_the_same_span() {
    let registry = IntentRegistry::new();
    let entry = registry.entry(Intent::Retention).unwrap();
    let params = entry
        .schema
        .validate(&json!({"period": "week", "periods": 8}))
        .unwrap();
    let (intent, rebound) = registry.rebind(entry, 1, &params).unwrap();
    assert_eq!(intent, Intent::UsageAnalysis);
    assert_eq!(rebound.int("days_back"), Some(56));
    assert_eq!(rebound.text("group_by"), Some("week"));
}

#[test]
fn levels_past_the_plan_are_defects() {
    let registry = IntentRegistry::new();
    let entry = registry.entry(Intent::Engagement).unwrap();
    let params = entry.schema.validate(&json!({})).unwrap();
    let err = registry
        .rebind(entry, entry.plan.len(), &params)
        .unwrap_err();
    assert!(matches!(err, IntentError::InternalDefect { .. }));
}

#[test]
fn tool_schemas_are_closed_objects() {
    let registry = IntentRegistry::new();
    for entry in registry.entries() {
        let schema = entry.schema.to_json_schema();
        assert_eq!(schema["type"], "object", "{}", entry.tool_name);
        assert_eq!(schema["additionalProperties"], false);
    }
}
