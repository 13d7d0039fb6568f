//! Result formatter.
//!
//! Turns cascade results into a [`ResultSummary`]: grouped series in the
//! pipeline's group-key order, the intent's primary metric, per-metric
//! peaks, and narrative hints.  Display truncation never hides the true
//! row count.  Rendering the summary as text is left to the caller-facing
//! surface.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use usagelens_intent::{AggregateFn, Intent, IntentEntry, IntentRegistry, PipelineSpec, Query};

use crate::cascade::{Attempt, ExhaustReason};

/// Group keys holding epoch-millisecond bucket starts.
const PERIOD_KEYS: [&str; 4] = ["day", "week", "month", "hour"];

/// Attributes kept per listed entity.
const MAX_ATTRIBUTES: usize = 12;

/// Fields that identify a listed entity, most specific first.
const IDENTITY_FIELDS: [&str; 4] = ["id", "visitorId", "accountId", "name"];

// ---------------------------------------------------------------------------
// Summary contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Complete,
    Exhausted,
}

/// One entry of a grouped series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    /// Group key values joined with ` / `, period keys rendered as dates.
    pub key: String,
    pub metrics: BTreeMap<String, f64>,
    /// Descriptive fields of listed entities.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// The maximum of one metric across the full result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Peak {
    pub metric: String,
    pub key: String,
    pub value: f64,
}

/// Structured, tool-agnostic answer to one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    /// Tool the caller invoked.
    pub tool: String,
    pub status: SummaryStatus,
    /// 0 for the primary attempt, otherwise the fallback depth that answered.
    pub source_strategy_level: usize,
    /// Tool whose strategy produced the rows, when it differs from `tool`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_by: Option<String>,
    pub primary_metric_name: String,
    pub primary_metric_count: f64,
    /// Rows that matched, before display truncation.
    pub total_rows: usize,
    pub grouped_series: Vec<SeriesPoint>,
    pub peaks: Vec<Peak>,
    pub narrative_hints: Vec<String>,
    pub attempts: Vec<Attempt>,
}

impl ResultSummary {
    /// Whether display truncation dropped rows.
    pub fn is_truncated(&self) -> bool {
        self.grouped_series.len() < self.total_rows
    }
}

// ---------------------------------------------------------------------------
// Answered cascades
// ---------------------------------------------------------------------------

/// Everything the formatter needs about an answered cascade.
#[derive(Debug, Clone, Copy)]
pub struct Answer<'a> {
    /// The entry the caller invoked.
    pub requested: &'a IntentEntry,
    /// The entry whose strategy answered.
    pub answering: &'a IntentEntry,
    pub level: usize,
    pub query: &'a Query,
    pub rows: &'a [Value],
}

/// Summarize an answered cascade.
pub fn format(answer: Answer<'_>, attempts: Vec<Attempt>) -> ResultSummary {
    let spec = answer.query.pipeline();
    let mut series: Vec<SeriesPoint> = answer
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| point(spec, i, row))
        .collect();

    let mut hints = Vec::new();
    if answer.level > 0
        && let Some(strategy) = answer.requested.plan.get(answer.level)
        && !strategy.hint.is_empty()
    {
        hints.push(strategy.hint.to_string());
    }

    let (metric_name, metric_value) =
        primary_metric(answer.answering.intent, spec, &mut series, &mut hints);
    let peaks = spec.map(|s| peaks(s, &series)).unwrap_or_default();

    let total_rows = answer.rows.len();
    let cap = answer.answering.display_cap;
    if total_rows > cap {
        series.truncate(cap);
        hints.push(format!("Showing first {cap} of {total_rows} results."));
    }

    ResultSummary {
        tool: answer.requested.tool_name.clone(),
        status: SummaryStatus::Complete,
        source_strategy_level: answer.level,
        answered_by: (answer.level > 0).then(|| answer.answering.tool_name.clone()),
        primary_metric_name: metric_name,
        primary_metric_count: metric_value,
        total_rows,
        grouped_series: series,
        peaks,
        narrative_hints: hints,
        attempts,
    }
}

fn point(spec: Option<&PipelineSpec>, index: usize, row: &Value) -> SeriesPoint {
    let empty = Map::new();
    let obj = row.as_object().unwrap_or(&empty);
    let keys = spec.map(PipelineSpec::group_keys).unwrap_or_default();
    let metrics = spec.map(PipelineSpec::metrics).unwrap_or_default();

    let key = if !keys.is_empty() {
        keys.iter()
            .map(|k| render_key(k, obj.get(k)))
            .collect::<Vec<_>>()
            .join(" / ")
    } else if !metrics.is_empty() {
        "total".to_string()
    } else {
        IDENTITY_FIELDS
            .iter()
            .find_map(|f| obj.get(*f).and_then(scalar))
            .unwrap_or_else(|| format!("#{}", index + 1))
    };

    let metric_values = metrics
        .iter()
        .map(|m| {
            let value = obj.get(&m.name).and_then(number).unwrap_or(0.0);
            (m.name.clone(), value)
        })
        .collect();

    let mut attributes = BTreeMap::new();
    if metrics.is_empty() {
        for (name, value) in obj {
            if attributes.len() >= MAX_ATTRIBUTES {
                break;
            }
            flatten(name, value, 0, &mut attributes);
        }
        attributes.retain(|_, v| *v != key);
    }

    SeriesPoint {
        key,
        metrics: metric_values,
        attributes,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Period keys holding epoch milliseconds render as calendar dates.
fn render_key(field: &str, value: Option<&Value>) -> String {
    let Some(value) = value else {
        return "unknown".into();
    };
    if PERIOD_KEYS.contains(&field)
        && let Some(ms) = value.as_i64()
        && let Some(date) = DateTime::<Utc>::from_timestamp_millis(ms)
    {
        let pattern = if field == "hour" { "%Y-%m-%d %H:00" } else { "%Y-%m-%d" };
        return date.format(pattern).to_string();
    }
    scalar(value).unwrap_or_else(|| value.to_string())
}

/// Whether `name` holds an epoch-millisecond timestamp.
fn is_timestamp_field(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with("at") || lower.contains("visit") || lower.ends_with("time")
}

fn flatten(name: &str, value: &Value, depth: usize, out: &mut BTreeMap<String, String>) {
    if out.len() >= MAX_ATTRIBUTES {
        return;
    }
    match value {
        Value::Object(map) if depth < 2 => {
            for (k, v) in map {
                flatten(&format!("{name}.{k}"), v, depth + 1, out);
            }
        }
        Value::Number(n)
            if is_timestamp_field(name) && n.as_i64().is_some_and(|ms| ms > 100_000_000_000) =>
        {
            let rendered = n
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| n.to_string());
            out.insert(name.to_string(), rendered);
        }
        other => {
            if let Some(text) = scalar(other) {
                out.insert(name.to_string(), text);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

fn metric_of(series: &[SeriesPoint], name: &str) -> Vec<f64> {
    series
        .iter()
        .map(|p| p.metrics.get(name).copied().unwrap_or(0.0))
        .collect()
}

fn sum_of(series: &[SeriesPoint], name: &str) -> f64 {
    metric_of(series, name).iter().sum()
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 { part / whole * 100.0 } else { 0.0 }
}

/// The headline number for `intent`, plus intent-specific hints.
fn primary_metric(
    intent: Intent,
    spec: Option<&PipelineSpec>,
    series: &mut [SeriesPoint],
    hints: &mut Vec<String>,
) -> (String, f64) {
    let Some(spec) = spec.filter(|s| !s.metrics().is_empty()) else {
        return ("results".into(), series.len() as f64);
    };
    match intent {
        Intent::UsageAnalysis => ("totalEvents".into(), sum_of(series, "totalEvents")),
        Intent::FeatureAdoption => ("events".into(), sum_of(series, "events")),
        Intent::Funnel => funnel_conversion(series, hints),
        Intent::Retention => retention(series, hints),
        Intent::NpsFeedback if spec.group_keys() == ["score"] => nps_score(series, hints),
        Intent::NpsFeedback => ("responses".into(), sum_of(series, "responses")),
        _ => {
            let first = &spec.metrics()[0];
            let value = match first.function {
                // Distinct counts over a single reduced row are already totals.
                AggregateFn::CountDistinct if series.len() == 1 => {
                    metric_of(series, &first.name)[0]
                }
                _ => sum_of(series, &first.name),
            };
            (first.name.clone(), value)
        }
    }
}

/// Overall conversion, per-step conversion and the worst drop-off.
fn funnel_conversion(series: &mut [SeriesPoint], hints: &mut Vec<String>) -> (String, f64) {
    let visitors = metric_of(series, "visitors");
    let start = visitors.first().copied().unwrap_or(0.0);
    for (point, v) in series.iter_mut().zip(&visitors) {
        point.metrics.insert("conversionPct".into(), percent(*v, start));
    }

    let worst = visitors
        .windows(2)
        .enumerate()
        .map(|(i, w)| (i, w[0] - w[1]))
        .filter(|(_, drop)| *drop > 0.0)
        .max_by(|a, b| a.1.total_cmp(&b.1));
    if let Some((i, drop)) = worst {
        hints.push(format!(
            "Largest drop-off: {} visitors between step {} and step {}.",
            format_number(drop),
            i + 1,
            i + 2
        ));
    }

    let end = visitors.last().copied().unwrap_or(0.0);
    ("conversionRate".into(), percent(end, start))
}

/// Cohort size and retention at the last observed offset.
fn retention(series: &mut [SeriesPoint], hints: &mut Vec<String>) -> (String, f64) {
    let retained = metric_of(series, "retainedVisitors");
    let cohort = retained.first().copied().unwrap_or(0.0);
    for (point, v) in series.iter_mut().zip(&retained) {
        point.metrics.insert("retentionPct".into(), percent(*v, cohort));
    }
    if let (Some(last), Some(point)) = (retained.last(), series.last())
        && series.len() > 1
    {
        hints.push(format!(
            "{:.1}% of the cohort was still active at offset {}.",
            percent(*last, cohort),
            point.key
        ));
    }
    ("cohortSize".into(), cohort)
}

/// Net promoter score from responses grouped by score.
fn nps_score(series: &mut [SeriesPoint], hints: &mut Vec<String>) -> (String, f64) {
    let (mut promoters, mut passives, mut detractors) = (0.0, 0.0, 0.0);
    for point in series.iter() {
        let responses = point.metrics.get("responses").copied().unwrap_or(0.0);
        match point.key.parse::<f64>() {
            Ok(score) if score >= 9.0 => promoters += responses,
            Ok(score) if score >= 7.0 => passives += responses,
            Ok(_) => detractors += responses,
            Err(_) => {}
        }
    }
    let total = promoters + passives + detractors;
    let score = percent(promoters, total) - percent(detractors, total);
    hints.push(format!(
        "NPS {:.0} from {} responses ({} promoters, {} passives, {} detractors).",
        score,
        format_number(total),
        format_number(promoters),
        format_number(passives),
        format_number(detractors)
    ));
    ("npsScore".into(), score)
}

/// Maximum of each metric, for series with more than one point.
fn peaks(spec: &PipelineSpec, series: &[SeriesPoint]) -> Vec<Peak> {
    if series.len() < 2 {
        return Vec::new();
    }
    spec.metrics()
        .iter()
        .filter_map(|m| {
            series
                .iter()
                .filter_map(|p| p.metrics.get(&m.name).map(|v| (p, *v)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(p, value)| Peak {
                    metric: m.name.clone(),
                    key: p.key.clone(),
                    value,
                })
        })
        .collect()
}

/// `1234567` → `1,234,567`; fractions keep one decimal.
pub fn format_number(value: f64) -> String {
    if value.fract() != 0.0 {
        return format!("{value:.1}");
    }
    let digits = format!("{:.0}", value.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if value < 0.0 {
        out.insert(0, '-');
    }
    out
}

// ---------------------------------------------------------------------------
// Exhausted cascades
// ---------------------------------------------------------------------------

/// Summarize a cascade that found nothing.
///
/// The hints always say what was tried and name at least one other tool with
/// example arguments.
pub fn format_exhausted(
    registry: &IntentRegistry,
    requested: &IntentEntry,
    reason: ExhaustReason,
    attempts: Vec<Attempt>,
) -> ResultSummary {
    let mut hints = Vec::new();
    let tried: Vec<String> = attempts
        .iter()
        .map(|a| format!("{} ({})", a.intent.tool_name(), a.outcome))
        .collect();
    hints.push(format!(
        "No data found for {} after {} attempt(s): {}.",
        requested.tool_name,
        attempts.len(),
        if tried.is_empty() { "none".into() } else { tried.join(", ") }
    ));
    if reason == ExhaustReason::BudgetExceeded {
        hints.push("The time budget ran out before every fallback was tried.".into());
    }

    for alternative in alternatives(registry, requested) {
        hints.push(format!(
            "Try {} ({}) with {}.",
            alternative.tool_name,
            alternative.intent.label(),
            alternative.example
        ));
    }
    hints.push(
        "Widen the time window (days_back up to 90) or confirm ids with a search_* tool.".into(),
    );

    ResultSummary {
        tool: requested.tool_name.clone(),
        status: SummaryStatus::Exhausted,
        source_strategy_level: attempts.last().map(|a| a.level).unwrap_or(0),
        answered_by: None,
        primary_metric_name: "results".into(),
        primary_metric_count: 0.0,
        total_rows: 0,
        grouped_series: Vec::new(),
        peaks: Vec::new(),
        narrative_hints: hints,
        attempts,
    }
}

/// Up to two other tools worth trying: the plan's own targets first, then
/// broad defaults.
fn alternatives<'a>(registry: &'a IntentRegistry, requested: &IntentEntry) -> Vec<&'a IntentEntry> {
    let mut picked: Vec<Intent> = Vec::new();
    let candidates = requested
        .plan
        .strategies()
        .iter()
        .map(|s| s.intent)
        .chain([Intent::UsageAnalysis, Intent::Engagement]);
    for intent in candidates {
        if intent != requested.intent && !picked.contains(&intent) {
            picked.push(intent);
        }
        if picked.len() == 2 {
            break;
        }
    }
    picked.into_iter().filter_map(|i| registry.entry(i)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
