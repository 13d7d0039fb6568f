//! Query builder: maps a validated intent onto a [`Query`].
//!
//! Builders are pure and deterministic: the same intent and parameters always
//! yield the same pipeline.  Relative time windows are expressed as anchors
//! (`PeriodsAgo`) rather than timestamps, so no builder reads the clock.

use crate::error::Result;
use crate::intent::{EntityKind, Intent};
use crate::params::ValidatedParams;
use crate::pipeline::{
    AggregateFn, Metric, Period, PipelineBuilder, PipelineSpec, Predicate, Query,
    ResourceLookup, SortDirection, Source, TimeWindow, WindowAnchor,
};

/// Signature shared by every intent-specific builder.
pub type BuildFn = fn(Intent, &ValidatedParams) -> Result<Query>;

/// Default lookback when an intent declares no `days_back` default.
const DEFAULT_DAYS_BACK: i64 = 30;

/// Pages reported per path step in user-path analysis.
const PAGES_PER_PATH_STEP: u32 = 5;

/// Select the builder for `intent`.
pub fn for_intent(intent: Intent) -> BuildFn {
    match intent {
        Intent::UsageAnalysis => build_usage,
        Intent::FeatureAdoption => build_feature_adoption,
        Intent::Retention => build_retention,
        Intent::Funnel => build_funnel,
        Intent::UserPath => build_user_path,
        Intent::Engagement => build_engagement,
        Intent::NpsFeedback => build_nps,
        Intent::EntitySearch(_) => build_entity_search,
        Intent::EntityLookup(_) => build_entity_lookup,
        Intent::SegmentOp => build_segment,
    }
}

/// Build the query for `intent`.
pub fn build(intent: Intent, params: &ValidatedParams) -> Result<Query> {
    for_intent(intent)(intent, params)
}

// ---------------------------------------------------------------------------
// Shared shaping helpers
// ---------------------------------------------------------------------------

fn days_back(params: &ValidatedParams) -> i64 {
    params.int("days_back").unwrap_or(DEFAULT_DAYS_BACK)
}

fn daily_window(params: &ValidatedParams) -> Result<TimeWindow> {
    TimeWindow::lookback("days_back", days_back(params), Period::Day)
}

fn with_app(builder: PipelineBuilder, params: &ValidatedParams) -> PipelineBuilder {
    match params.text("app_id") {
        Some(app) => builder.filter(eq("appId", app)),
        None => builder,
    }
}

fn eq(field: &str, value: &str) -> Predicate {
    Predicate::Eq {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn limit_param(params: &ValidatedParams, default: u32) -> u32 {
    params
        .int("limit")
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Behavioural analytics
// ---------------------------------------------------------------------------

/// Broad event aggregation bucketed by day, week, or month.
fn build_usage(_intent: Intent, params: &ValidatedParams) -> Result<Query> {
    let period = params
        .text("group_by")
        .and_then(Period::parse)
        .unwrap_or(Period::Day);
    let window = TimeWindow::lookback("days_back", days_back(params), period)?;

    let spec = with_app(PipelineSpec::builder(Source::Events).window(window), params)
        .group(
            &[period.field()],
            vec![
                Metric::new("uniqueVisitors", AggregateFn::CountDistinct, "visitorId"),
                Metric::new("totalEvents", AggregateFn::Sum, "numEvents"),
                Metric::new("totalMinutes", AggregateFn::Sum, "numMinutes"),
            ],
        )
        .sort(period.field(), SortDirection::Ascending)
        .build();
    Ok(Query::Pipeline(spec))
}

/// Per-feature usage, most-used first.
fn build_feature_adoption(_intent: Intent, params: &ValidatedParams) -> Result<Query> {
    let mut builder = PipelineSpec::builder(Source::FeatureEvents).window(daily_window(params)?);
    if let Some(feature) = params.text("feature_id") {
        builder = builder.filter(eq("featureId", feature));
    }
    let spec = with_app(builder, params)
        .group(
            &["featureId"],
            vec![
                Metric::new("visitors", AggregateFn::CountDistinct, "visitorId"),
                Metric::new("accounts", AggregateFn::CountDistinct, "accountId"),
                Metric::new("events", AggregateFn::Sum, "numEvents"),
            ],
        )
        .sort("events", SortDirection::Descending)
        .limit(limit_param(params, 10))
        .build();
    Ok(Query::Pipeline(spec))
}

/// Cohort retention keyed by period offset from the cohort anchor.
///
/// Without an explicit `cohort_start` the cohort is anchored `periods`
/// periods before now, so the analysis window ends at the present.
fn build_retention(_intent: Intent, params: &ValidatedParams) -> Result<Query> {
    let period = params
        .text("period")
        .and_then(Period::parse)
        .unwrap_or(Period::Week);
    let periods = params
        .int("periods")
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(4);
    let anchor = match params.text("cohort_start") {
        Some(date) => WindowAnchor::Date(date.to_string()),
        None => WindowAnchor::PeriodsAgo(periods),
    };
    let window = TimeWindow::from_anchor("periods", anchor.clone(), period, periods)?;
    let cohort = TimeWindow::from_anchor("periods", anchor, period, 1)?;

    let spec = with_app(PipelineSpec::builder(Source::Events).window(window), params)
        .filter(Predicate::Within {
            field: "firstVisit".into(),
            window: cohort,
        })
        .group(
            &["cohortOffset"],
            vec![Metric::new(
                "retainedVisitors",
                AggregateFn::CountDistinct,
                "visitorId",
            )],
        )
        .sort("cohortOffset", SortDirection::Ascending)
        .build();
    Ok(Query::Pipeline(spec))
}

/// One step stage per funnel step plus a single sequencing filter.
fn build_funnel(_intent: Intent, params: &ValidatedParams) -> Result<Query> {
    let steps: Vec<String> = params.list("steps").unwrap_or_default().to_vec();
    let within = params.int("within_days").unwrap_or(DEFAULT_DAYS_BACK);
    let window = TimeWindow::lookback("within_days", within, Period::Day)?;

    let mut builder = PipelineSpec::builder(Source::Events).window(window.clone());
    for step in &steps {
        builder = builder.step(step.as_str());
    }
    let spec = with_app(builder, params)
        .filter(Predicate::Sequence {
            field: "stepId".into(),
            steps,
            within_days: window.days(),
        })
        .group(
            &["stepIndex"],
            vec![Metric::new("visitors", AggregateFn::CountDistinct, "visitorId")],
        )
        .sort("stepIndex", SortDirection::Ascending)
        .build();
    Ok(Query::Pipeline(spec))
}

/// Pages visited after a starting page, step by step.
fn build_user_path(_intent: Intent, params: &ValidatedParams) -> Result<Query> {
    let start = params.text("start_page_id").unwrap_or_default();
    let max_steps = params
        .int("max_steps")
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(5);

    let spec = with_app(
        PipelineSpec::builder(Source::PageEvents).window(daily_window(params)?),
        params,
    )
    .filter(eq("pathStart", start))
    .group(
        &["pathStep", "pageId"],
        vec![Metric::new("visitors", AggregateFn::CountDistinct, "visitorId")],
    )
    .sort("pathStep", SortDirection::Ascending)
    .limit(max_steps * PAGES_PER_PATH_STEP)
    .build();
    Ok(Query::Pipeline(spec))
}

/// Single-row engagement totals for the window.
fn build_engagement(_intent: Intent, params: &ValidatedParams) -> Result<Query> {
    let spec = with_app(
        PipelineSpec::builder(Source::Events).window(daily_window(params)?),
        params,
    )
    .group(
        &[],
        vec![
            Metric::new("activeVisitors", AggregateFn::CountDistinct, "visitorId"),
            Metric::new("activeAccounts", AggregateFn::CountDistinct, "accountId"),
            Metric::new("activeDays", AggregateFn::CountDistinct, "day"),
            Metric::new("totalEvents", AggregateFn::Sum, "numEvents"),
            Metric::new("totalMinutes", AggregateFn::Sum, "numMinutes"),
        ],
    )
    .build();
    Ok(Query::Pipeline(spec))
}

/// NPS poll responses grouped by score, account, or day.
fn build_nps(_intent: Intent, params: &ValidatedParams) -> Result<Query> {
    let key = match params.text("group_by") {
        Some("account") => "accountId",
        Some("day") => "day",
        _ => "score",
    };
    let mut builder = PipelineSpec::builder(Source::Polls)
        .window(daily_window(params)?)
        .filter(eq("pollType", "NPSRating"));
    if let Some(poll) = params.text("poll_id") {
        builder = builder.filter(eq("pollId", poll));
    }
    let spec = builder
        .group(
            &[key],
            vec![Metric::new("responses", AggregateFn::Count, "visitorId")],
        )
        .sort(key, SortDirection::Ascending)
        .build();
    Ok(Query::Pipeline(spec))
}

// ---------------------------------------------------------------------------
// Entities and segments
// ---------------------------------------------------------------------------

fn entity_source(kind: EntityKind) -> Source {
    match kind {
        EntityKind::Pages => Source::Pages,
        EntityKind::Features => Source::Features,
        EntityKind::Visitors => Source::Visitors,
        EntityKind::Accounts => Source::Accounts,
        EntityKind::TrackEvents => Source::TrackTypes,
    }
}

fn entity_search_field(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Visitors => "visitorId",
        EntityKind::Accounts => "accountId",
        EntityKind::Pages | EntityKind::Features | EntityKind::TrackEvents => "name",
    }
}

/// Entity listing.  With no filters this is a limit-only pipeline.
fn build_entity_search(intent: Intent, params: &ValidatedParams) -> Result<Query> {
    let kind = match intent {
        Intent::EntitySearch(kind) => kind,
        _ => EntityKind::Pages,
    };
    let mut builder = PipelineSpec::builder(entity_source(kind));
    if let Some(days) = params.int("days_back") {
        builder = builder.window(TimeWindow::lookback("days_back", days, Period::Day)?);
    }
    if let Some(query) = params.text("query") {
        builder = builder.filter(Predicate::Contains {
            field: entity_search_field(kind).to_string(),
            value: query.to_string(),
        });
    }
    let spec = with_app(builder, params).limit(limit_param(params, 10)).build();
    Ok(Query::Pipeline(spec))
}

/// Direct lookup of one entity by id.
fn build_entity_lookup(intent: Intent, params: &ValidatedParams) -> Result<Query> {
    let kind = match intent {
        Intent::EntityLookup(kind) => kind,
        _ => EntityKind::Visitors,
    };
    Ok(Query::Lookup(ResourceLookup {
        path: format!("/api/v1/{}", kind.resource_segment()),
        id: params.text("id").unwrap_or_default().to_string(),
    }))
}

/// Segment membership totals, or a segment listing when no segment is named.
fn build_segment(_intent: Intent, params: &ValidatedParams) -> Result<Query> {
    let spec = match params.text("segment_id") {
        Some(segment) => PipelineSpec::builder(Source::Visitors)
            .window(daily_window(params)?)
            .filter(eq("segmentId", segment))
            .group(
                &[],
                vec![
                    Metric::new("visitors", AggregateFn::CountDistinct, "visitorId"),
                    Metric::new("accounts", AggregateFn::CountDistinct, "accountId"),
                ],
            )
            .build(),
        None => PipelineSpec::builder(Source::Segments)
            .limit(limit_param(params, 10))
            .build(),
    };
    Ok(Query::Pipeline(spec))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pipeline::Stage;
    use crate::registry::IntentRegistry;

    fn validated(intent: Intent, raw: serde_json::Value) -> ValidatedParams {
        IntentRegistry::new()
            .entry(intent)
            .unwrap()
            .schema
            .validate(&raw)
            .unwrap()
    }

    fn pipeline(intent: Intent, raw: serde_json::Value) -> PipelineSpec {
        match build(intent, &validated(intent, raw)).unwrap() {
            Query::Pipeline(spec) => spec,
            Query::Lookup(l) => panic!("expected pipeline, got lookup {l:?}"),
        }
    }

    #[test]
    fn every_intent_builds_with_defaults_deterministically() {
        let registry = IntentRegistry::new();
        for intent in Intent::all() {
            let raw = match intent {
                Intent::Funnel => json!({"steps": ["a", "b"]}),
                Intent::UserPath => json!({"start_page_id": "home"}),
                Intent::EntityLookup(_) => json!({"id": "x"}),
                _ => json!({}),
            };
            let params = registry.entry(intent).unwrap().schema.validate(&raw).unwrap();
            let a = build(intent, &params).unwrap();
            let b = build(intent, &params).unwrap();
            assert_eq!(a, b, "{intent}");
            if let Query::Pipeline(spec) = &a {
                assert!(spec.is_canonically_ordered(), "{intent}");
            }
        }
    }

    #[test]
    fn usage_groups_by_requested_period() {
        let spec = pipeline(
            Intent::UsageAnalysis,
            json!({"days_back": 30, "group_by": "week"}),
        );
        assert_eq!(spec.source(), Some(Source::Events));
        assert_eq!(spec.group_keys(), ["week"]);
        let window = spec.window().unwrap();
        assert_eq!(window.period, Period::Week);
        assert!(window.days() <= 30);
    }

    #[test]
    fn funnel_emits_one_stage_per_step_and_one_sequence_filter() {
        let spec = pipeline(Intent::Funnel, json!({"steps": ["p1", "p2", "p3"]}));
        let steps: Vec<&Stage> = spec
            .stages()
            .iter()
            .filter(|s| matches!(s, Stage::Step { .. }))
            .collect();
        assert_eq!(steps.len(), 3);
        assert_eq!(spec.steps().collect::<Vec<_>>(), vec!["p1", "p2", "p3"]);

        let sequences: Vec<&Predicate> = spec
            .filters()
            .filter(|p| matches!(p, Predicate::Sequence { .. }))
            .collect();
        assert_eq!(sequences.len(), 1);
    }

    #[test]
    fn removing_a_funnel_step_changes_only_steps_and_filter() {
        let full = pipeline(Intent::Funnel, json!({"steps": ["p1", "p2", "p3"]}));
        let short = pipeline(Intent::Funnel, json!({"steps": ["p1", "p3"]}));

        let non_step = |spec: &PipelineSpec| -> Vec<Stage> {
            spec.stages()
                .iter()
                .filter(|s| !matches!(s, Stage::Step { .. } | Stage::Filter(_)))
                .cloned()
                .collect()
        };
        assert_eq!(non_step(&full), non_step(&short));
        assert_ne!(
            full.filters().collect::<Vec<_>>(),
            short.filters().collect::<Vec<_>>()
        );
        assert!(short.is_canonically_ordered());
        assert_eq!(short.steps().collect::<Vec<_>>(), vec!["p1", "p3"]);
    }

    #[test]
    fn retention_defaults_to_relative_anchor() {
        let spec = pipeline(Intent::Retention, json!({}));
        let window = spec.window().unwrap();
        assert_eq!(window.period, Period::Week);
        assert_eq!(window.start, WindowAnchor::PeriodsAgo(4));
        assert_eq!(spec.group_keys(), ["cohortOffset"]);
    }

    #[test]
    fn retention_with_explicit_cohort_date() {
        let spec = pipeline(
            Intent::Retention,
            json!({"period": "day", "periods": 10, "cohort_start": "2024-03-01"}),
        );
        assert_eq!(
            spec.window().unwrap().start,
            WindowAnchor::Date("2024-03-01".into())
        );
    }

    #[test]
    fn retention_window_over_ninety_days_is_a_validation_error() {
        let params = validated(Intent::Retention, json!({"period": "month", "periods": 6}));
        let err = build(Intent::Retention, &params).unwrap_err();
        assert_eq!(err.field(), Some("periods"));
    }

    #[test]
    fn unfiltered_entity_search_is_limit_only() {
        let spec = pipeline(Intent::EntitySearch(EntityKind::Pages), json!({}));
        assert_eq!(
            spec.stages(),
            &[Stage::Source(Source::Pages), Stage::Limit(10)]
        );
    }

    #[test]
    fn entity_search_with_query_filters_by_name() {
        let spec = pipeline(
            Intent::EntitySearch(EntityKind::Features),
            json!({"query": "export", "limit": 25, "days_back": 14}),
        );
        assert_eq!(spec.limit(), Some(25));
        assert!(spec.window().is_some());
        assert_eq!(
            spec.filters().next(),
            Some(&Predicate::Contains {
                field: "name".into(),
                value: "export".into()
            })
        );
    }

    #[test]
    fn entity_lookup_targets_resource_path() {
        let intent = Intent::EntityLookup(EntityKind::Accounts);
        let query = build(intent, &validated(intent, json!({"id": "acme"}))).unwrap();
        assert_eq!(
            query,
            Query::Lookup(ResourceLookup {
                path: "/api/v1/account".into(),
                id: "acme".into()
            })
        );
    }

    #[test]
    fn engagement_is_ungrouped_totals() {
        let spec = pipeline(Intent::Engagement, json!({"app_id": "web"}));
        assert!(spec.group_keys().is_empty());
        assert_eq!(spec.metrics()[0].name, "activeVisitors");
        assert_eq!(spec.filters().count(), 1);
    }

    #[test]
    fn segment_without_id_lists_segments() {
        let spec = pipeline(Intent::SegmentOp, json!({}));
        assert_eq!(spec.source(), Some(Source::Segments));
        let spec = pipeline(Intent::SegmentOp, json!({"segment_id": "s1"}));
        assert_eq!(spec.source(), Some(Source::Visitors));
    }
}
