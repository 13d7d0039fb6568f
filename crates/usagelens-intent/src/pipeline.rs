//! Abstract pipeline specification.
//!
//! A [`PipelineSpec`] is the intermediate representation the query builder
//! produces and the collaborator lowers into its own wire payload.  Stages are
//! assembled through [`PipelineBuilder`], which always emits them in the
//! canonical order: source, time window, steps, filters, group, sort, limit.

use serde::{Deserialize, Serialize};

use crate::error::{IntentError, Result};

/// Longest time window, in days, any pipeline may cover.
pub const MAX_WINDOW_DAYS: u32 = 90;

// ---------------------------------------------------------------------------
// Stage payloads
// ---------------------------------------------------------------------------

/// The data domain a pipeline reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    Events,
    PageEvents,
    FeatureEvents,
    TrackEvents,
    Visitors,
    Accounts,
    Pages,
    Features,
    TrackTypes,
    Polls,
    Segments,
}

/// Time bucket size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    /// Approximate length in days, used for window bounds.
    pub fn days(self) -> u32 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 30,
        }
    }

    /// Field name the collaborator uses for this bucket.
    pub fn field(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    pub fn parse(s: &str) -> Option<Period> {
        match s {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }
}

/// Where a time window starts.
///
/// Relative anchors are resolved by the collaborator at execution time, so a
/// pipeline never embeds the wall clock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAnchor {
    /// `n` periods before now.
    PeriodsAgo(u32),
    /// A fixed calendar date, `YYYY-MM-DD`.
    Date(String),
}

/// A bounded time range of `count` buckets starting at `start`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub period: Period,
    pub start: WindowAnchor,
    pub count: u32,
}

impl TimeWindow {
    /// The last `days` days, bucketed by `period`.  Partial buckets are
    /// dropped so the window never exceeds the requested length.
    ///
    /// `field` names the caller parameter the length came from, so a bad
    /// length is reported against it.
    pub fn lookback(field: &str, days: i64, period: Period) -> Result<Self> {
        let days = check_days(field, days)?;
        let count = (days / period.days()).max(1);
        Ok(Self {
            period,
            start: WindowAnchor::PeriodsAgo(count),
            count,
        })
    }

    /// `count` buckets of `period` starting at `start`.
    pub fn from_anchor(field: &str, start: WindowAnchor, period: Period, count: u32) -> Result<Self> {
        check_days(field, i64::from(count) * i64::from(period.days()))?;
        Ok(Self {
            period,
            start,
            count,
        })
    }

    /// Total length in days.
    pub fn days(&self) -> u32 {
        self.count * self.period.days()
    }
}

fn check_days(field: &str, days: i64) -> Result<u32> {
    if days < 1 || days > i64::from(MAX_WINDOW_DAYS) {
        return Err(IntentError::validation(
            field,
            format!("time window must cover 1 to {MAX_WINDOW_DAYS} days, got {days}"),
        ));
    }
    Ok(days as u32)
}

/// Boolean predicate over record fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Eq { field: String, value: String },
    Contains { field: String, value: String },
    /// Records whose `field` takes the values of `steps` in order, within
    /// `within_days` of the first step.
    Sequence {
        field: String,
        steps: Vec<String>,
        within_days: u32,
    },
    /// Records whose `field` timestamp falls inside `window`.
    Within { field: String, window: TimeWindow },
}

/// Aggregate function applied within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Count,
    CountDistinct,
    Sum,
}

/// A named aggregate output column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub function: AggregateFn,
    pub field: String,
}

impl Metric {
    pub fn new(name: &str, function: AggregateFn, field: &str) -> Self {
        Self {
            name: name.to_string(),
            function,
            field: field.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// One stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Source(Source),
    TimeWindow(TimeWindow),
    /// One ordered step of a multi-step analysis (funnel steps).
    Step { index: u32, id: String },
    Filter(Predicate),
    Group {
        keys: Vec<String>,
        metrics: Vec<Metric>,
    },
    Sort {
        field: String,
        direction: SortDirection,
    },
    Limit(u32),
}

impl Stage {
    /// Position of this stage kind in the canonical ordering.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Source(_) => 0,
            Self::TimeWindow(_) => 1,
            Self::Step { .. } => 2,
            Self::Filter(_) => 3,
            Self::Group { .. } => 4,
            Self::Sort { .. } => 5,
            Self::Limit(_) => 6,
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineSpec
// ---------------------------------------------------------------------------

/// An ordered, immutable sequence of stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineSpec {
    stages: Vec<Stage>,
}

impl PipelineSpec {
    /// Start building a pipeline that reads from `source`.
    pub fn builder(source: Source) -> PipelineBuilder {
        PipelineBuilder {
            source,
            window: None,
            steps: Vec::new(),
            filters: Vec::new(),
            group: None,
            sort: None,
            limit: None,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn source(&self) -> Option<Source> {
        self.stages.iter().find_map(|s| match s {
            Stage::Source(src) => Some(*src),
            _ => None,
        })
    }

    pub fn window(&self) -> Option<&TimeWindow> {
        self.stages.iter().find_map(|s| match s {
            Stage::TimeWindow(w) => Some(w),
            _ => None,
        })
    }

    /// Group key fields, in declared order.  Empty when the pipeline does not
    /// group.
    pub fn group_keys(&self) -> &[String] {
        self.stages
            .iter()
            .find_map(|s| match s {
                Stage::Group { keys, .. } => Some(keys.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn metrics(&self) -> &[Metric] {
        self.stages
            .iter()
            .find_map(|s| match s {
                Stage::Group { metrics, .. } => Some(metrics.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn limit(&self) -> Option<u32> {
        self.stages.iter().find_map(|s| match s {
            Stage::Limit(n) => Some(*n),
            _ => None,
        })
    }

    pub fn filters(&self) -> impl Iterator<Item = &Predicate> {
        self.stages.iter().filter_map(|s| match s {
            Stage::Filter(p) => Some(p),
            _ => None,
        })
    }

    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().filter_map(|s| match s {
            Stage::Step { id, .. } => Some(id.as_str()),
            _ => None,
        })
    }

    /// Whether stage ranks never decrease.
    pub fn is_canonically_ordered(&self) -> bool {
        self.stages.windows(2).all(|w| w[0].rank() <= w[1].rank())
    }
}

/// Collects stages in any order and emits them canonically.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    source: Source,
    window: Option<TimeWindow>,
    steps: Vec<String>,
    filters: Vec<Predicate>,
    group: Option<(Vec<String>, Vec<Metric>)>,
    sort: Option<(String, SortDirection)>,
    limit: Option<u32>,
}

impl PipelineBuilder {
    pub fn window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn step(mut self, id: impl Into<String>) -> Self {
        self.steps.push(id.into());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn group(mut self, keys: &[&str], metrics: Vec<Metric>) -> Self {
        let keys = keys.iter().map(|k| k.to_string()).collect();
        self.group = Some((keys, metrics));
        self
    }

    pub fn sort(mut self, field: &str, direction: SortDirection) -> Self {
        self.sort = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(self) -> PipelineSpec {
        let mut stages = vec![Stage::Source(self.source)];
        stages.extend(self.window.map(Stage::TimeWindow));
        stages.extend(self.steps.into_iter().enumerate().map(|(i, id)| Stage::Step {
            index: i as u32,
            id,
        }));
        stages.extend(self.filters.into_iter().map(Stage::Filter));
        if let Some((keys, metrics)) = self.group {
            stages.push(Stage::Group { keys, metrics });
        }
        if let Some((field, direction)) = self.sort {
            stages.push(Stage::Sort { field, direction });
        }
        stages.extend(self.limit.map(Stage::Limit));
        PipelineSpec { stages }
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Direct retrieval of one named entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceLookup {
    /// Collaborator resource path, e.g. `/api/v1/visitor`.
    pub path: String,
    pub id: String,
}

/// What the executor submits: an aggregation pipeline or a direct lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    Pipeline(PipelineSpec),
    Lookup(ResourceLookup),
}

impl Query {
    pub fn pipeline(&self) -> Option<&PipelineSpec> {
        match self {
            Self::Pipeline(spec) => Some(spec),
            Self::Lookup(_) => None,
        }
    }

    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_emits_canonical_order_regardless_of_call_order() {
        let spec = PipelineSpec::builder(Source::Events)
            .limit(5)
            .sort("day", SortDirection::Ascending)
            .group(&["day"], vec![Metric::new("n", AggregateFn::Count, "visitorId")])
            .filter(Predicate::Eq {
                field: "appId".into(),
                value: "web".into(),
            })
            .window(TimeWindow::lookback("days_back", 7, Period::Day).unwrap())
            .build();

        assert!(spec.is_canonically_ordered());
        let ranks: Vec<u8> = spec.stages().iter().map(Stage::rank).collect();
        assert_eq!(ranks, vec![0, 1, 3, 4, 5, 6]);
    }

    #[test]
    fn bare_pipeline_is_source_only() {
        let spec = PipelineSpec::builder(Source::Pages).build();
        assert_eq!(spec.stages(), &[Stage::Source(Source::Pages)]);
        assert!(spec.group_keys().is_empty());
        assert_eq!(spec.limit(), None);
    }

    #[test]
    fn lookback_window_in_buckets() {
        let w = TimeWindow::lookback("days_back", 30, Period::Week).unwrap();
        assert_eq!(w.count, 4);
        assert_eq!(w.start, WindowAnchor::PeriodsAgo(4));

        let w = TimeWindow::lookback("days_back", 90, Period::Week).unwrap();
        assert!(w.days() <= MAX_WINDOW_DAYS);

        let w = TimeWindow::lookback("days_back", 90, Period::Day).unwrap();
        assert_eq!(w.days(), 90);
    }

    #[test]
    fn window_bounds_are_validation_errors() {
        let err = TimeWindow::lookback("days_back", 91, Period::Day).unwrap_err();
        assert_eq!(err.field(), Some("days_back"));
        assert!(TimeWindow::lookback("days_back", 0, Period::Day).is_err());

        let err = TimeWindow::from_anchor(
            "periods",
            WindowAnchor::Date("2024-01-01".into()),
            Period::Month,
            4,
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("periods"));
    }

    #[test]
    fn accessors() {
        let spec = PipelineSpec::builder(Source::Events)
            .step("p1")
            .step("p2")
            .group(
                &["stepIndex", "day"],
                vec![Metric::new("visitors", AggregateFn::CountDistinct, "visitorId")],
            )
            .build();
        assert_eq!(spec.source(), Some(Source::Events));
        assert_eq!(spec.steps().collect::<Vec<_>>(), vec!["p1", "p2"]);
        assert_eq!(spec.group_keys(), ["stepIndex", "day"]);
        assert_eq!(spec.metrics()[0].name, "visitors");
    }
}
