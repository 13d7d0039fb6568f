//! Lowering of [`PipelineSpec`] into the aggregation request body.
//!
//! The body has the shape
//! `{"response": {"mimeType": "application/json"}, "request": {"name", "pipeline"}}`.
//! Source and time window collapse into a single `source` stage carrying a
//! `timeSeries`; every other stage becomes one pipeline element.

use chrono::{Datelike, NaiveDate};
use serde_json::{Map, Value, json};
use usagelens_intent::{
    AggregateFn, Metric, Period, PipelineSpec, Predicate, SortDirection, Source, Stage,
    TimeWindow, WindowAnchor,
};

/// Path of the aggregation endpoint, relative to the API base.
pub const AGGREGATION_PATH: &str = "/api/v1/aggregation";

/// Complete request body for `spec`.
pub fn aggregation_request(spec: &PipelineSpec, name: &str) -> Value {
    json!({
        "response": { "mimeType": "application/json" },
        "request": {
            "name": name,
            "pipeline": lower(spec),
        }
    })
}

/// The `pipeline` array for `spec`.
pub fn lower(spec: &PipelineSpec) -> Vec<Value> {
    let mut pipeline = Vec::with_capacity(spec.stages().len());

    let mut source = Map::new();
    if let Some(src) = spec.source() {
        source.insert(source_name(src).to_string(), Value::Null);
    }
    if let Some(window) = spec.window() {
        source.insert("timeSeries".into(), time_series(window));
    }
    pipeline.push(json!({ "source": source }));

    for stage in spec.stages() {
        match stage {
            // Folded into the source stage above; funnel steps travel inside
            // the sequence filter.
            Stage::Source(_) | Stage::TimeWindow(_) | Stage::Step { .. } => {}
            Stage::Filter(predicate) => lower_predicate(predicate, &mut pipeline),
            Stage::Group { keys, metrics } => pipeline.push(group(keys, metrics)),
            Stage::Sort { field, direction } => {
                let key = match direction {
                    SortDirection::Ascending => field.clone(),
                    SortDirection::Descending => format!("-{field}"),
                };
                pipeline.push(json!({ "sort": [key] }));
            }
            Stage::Limit(n) => pipeline.push(json!({ "limit": n })),
        }
    }
    pipeline
}

fn source_name(source: Source) -> &'static str {
    match source {
        Source::Events => "events",
        Source::PageEvents => "pageEvents",
        Source::FeatureEvents => "featureEvents",
        Source::TrackEvents => "trackEvents",
        Source::Visitors => "visitors",
        Source::Accounts => "accounts",
        Source::Pages => "pages",
        Source::Features => "features",
        Source::TrackTypes => "trackTypes",
        Source::Polls => "pollEvents",
        Source::Segments => "segments",
    }
}

fn range_name(period: Period) -> &'static str {
    match period {
        Period::Day => "dayRange",
        Period::Week => "weekRange",
        Period::Month => "monthRange",
    }
}

/// A `timeSeries` object.  A window ending now counts backwards from
/// `now()`; any other anchor counts forwards from its start.
fn time_series(window: &TimeWindow) -> Value {
    let period = range_name(window.period);
    let count = i64::from(window.count);
    match &window.start {
        WindowAnchor::PeriodsAgo(n) if *n == window.count => {
            json!({ "period": period, "first": "now()", "count": -count })
        }
        WindowAnchor::PeriodsAgo(n) => json!({
            "period": period,
            "first": format!("dateAdd(now(), -{n}, \"{}s\")", window.period.field()),
            "count": count,
        }),
        WindowAnchor::Date(date) => json!({
            "period": period,
            "first": date_expr(date),
            "count": count,
        }),
    }
}

fn date_expr(date: &str) -> String {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(d) => format!("date({}, {}, {})", d.year(), d.month(), d.day()),
        Err(_) => format!("date({})", quote(date)),
    }
}

fn quote(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

/// A boolean filter expression, when the predicate has one.
fn expression(predicate: &Predicate) -> Option<String> {
    match predicate {
        Predicate::Eq { field, value } => Some(format!("{field} == {}", quote(value))),
        Predicate::Contains { field, value } => {
            Some(format!("contains({field}, {})", quote(value)))
        }
        Predicate::Sequence { .. } | Predicate::Within { .. } => None,
    }
}

fn lower_predicate(predicate: &Predicate, pipeline: &mut Vec<Value>) {
    if let Some(expr) = expression(predicate) {
        pipeline.push(json!({ "filter": expr }));
        return;
    }
    match predicate {
        Predicate::Sequence {
            field,
            steps,
            within_days,
        } => pipeline.push(json!({
            "funnel": { "field": field, "steps": steps, "withinDays": within_days }
        })),
        Predicate::Within { field, window } => pipeline.push(json!({
            "cohort": { "field": field, "timeSeries": time_series(window) }
        })),
        _ => {}
    }
}

fn group(keys: &[String], metrics: &[Metric]) -> Value {
    let fields: Map<String, Value> = metrics
        .iter()
        .map(|m| {
            let op = match m.function {
                AggregateFn::Count => json!({ "count": null }),
                AggregateFn::CountDistinct => json!({ "count": m.field }),
                AggregateFn::Sum => json!({ "sum": m.field }),
            };
            (m.name.clone(), op)
        })
        .collect();
    if keys.is_empty() {
        json!({ "reduce": fields })
    } else {
        json!({ "group": { "group": keys, "fields": fields } })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
