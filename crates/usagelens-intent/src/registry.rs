//! Intent registry, the table that drives every invocation.
//!
//! Each [`IntentEntry`] bundles the intent's parameter schema, its query
//! builder, its [`FallbackPlan`], and a display cap for formatted output.
//! The registry is built once at startup and is read-only afterwards; share
//! it behind an `Arc`.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::builder::{self, BuildFn};
use crate::error::{IntentError, Result};
use crate::intent::{EntityKind, Intent};
use crate::params::{ParamKind, ParamSchema, ParamSpec, ValidatedParams};
use crate::pipeline::{MAX_WINDOW_DAYS, Period};

/// Rows shown per summary unless an entry overrides it.
pub const DEFAULT_DISPLAY_CAP: usize = 10;

/// Largest `limit` an entity search accepts.
pub const MAX_SEARCH_LIMIT: i64 = 100;

// ---------------------------------------------------------------------------
// Fallback plans
// ---------------------------------------------------------------------------

/// Maps the caller's validated parameters onto the raw arguments of a strategy's
/// target intent.  Must be pure.
pub type RebindFn = fn(&ValidatedParams) -> Value;

/// One rung of a fallback plan.
#[derive(Debug, Clone)]
pub struct Strategy {
    /// The intent this rung runs.
    pub intent: Intent,
    /// Parameter rebinding for the target intent.
    pub rebind: RebindFn,
    /// Shown to the caller when this rung produced the answer.  Names a more
    /// targeted tool.
    pub hint: &'static str,
}

/// Ordered strategies, most specific first.  Index 0 is the primary attempt.
#[derive(Debug, Clone)]
pub struct FallbackPlan {
    strategies: Vec<Strategy>,
}

impl FallbackPlan {
    fn new(primary: Intent, fallbacks: Vec<Strategy>) -> Self {
        let mut strategies = Vec::with_capacity(fallbacks.len() + 1);
        strategies.push(Strategy {
            intent: primary,
            rebind: ValidatedParams::to_raw,
            hint: "",
        });
        strategies.extend(fallbacks);
        Self { strategies }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn get(&self, level: usize) -> Option<&Strategy> {
        self.strategies.get(level)
    }

    /// Number of attempts the cascade makes before it is exhausted.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

fn fallback(intent: Intent, rebind: RebindFn, hint: &'static str) -> Strategy {
    Strategy {
        intent,
        rebind,
        hint,
    }
}

/// Copy the named parameters, when present, into a raw argument object.
fn carry(params: &ValidatedParams, names: &[&str]) -> Map<String, Value> {
    let raw = params.to_raw();
    names
        .iter()
        .filter_map(|n| raw.get(*n).map(|v| (n.to_string(), v.clone())))
        .collect()
}

fn carry_window(params: &ValidatedParams) -> Value {
    Value::Object(carry(params, &["days_back", "app_id"]))
}

fn carry_days(params: &ValidatedParams) -> Value {
    Value::Object(carry(params, &["days_back"]))
}

fn within_as_days(params: &ValidatedParams) -> Value {
    match params.int("within_days") {
        Some(days) => json!({ "days_back": days }),
        None => json!({}),
    }
}

fn retention_as_usage(params: &ValidatedParams) -> Value {
    let period = params
        .text("period")
        .and_then(Period::parse)
        .unwrap_or(Period::Week);
    let periods = params.int("periods").unwrap_or(4);
    let days = (periods * i64::from(period.days())).clamp(1, i64::from(MAX_WINDOW_DAYS));
    json!({ "days_back": days, "group_by": period.field() })
}

fn engagement_as_usage(params: &ValidatedParams) -> Value {
    let mut raw = carry(params, &["days_back", "app_id"]);
    raw.insert("group_by".into(), json!("week"));
    Value::Object(raw)
}

fn widest_window(_params: &ValidatedParams) -> Value {
    json!({ "days_back": MAX_WINDOW_DAYS })
}

fn list_all(params: &ValidatedParams) -> Value {
    Value::Object(carry(params, &["limit"]))
}

fn id_as_query(params: &ValidatedParams) -> Value {
    Value::Object(
        params
            .text("id")
            .map(|id| ("query".to_string(), json!(id)))
            .into_iter()
            .collect(),
    )
}

fn no_params(_params: &ValidatedParams) -> Value {
    json!({})
}

fn plan_for(intent: Intent) -> FallbackPlan {
    let fallbacks = match intent {
        Intent::UsageAnalysis => vec![
            fallback(
                Intent::FeatureAdoption,
                carry_window,
                "No broad event activity matched; showing per-feature usage. For adoption \
                 detail call analyze_feature_adoption (FeatureAdoption) with a feature_id.",
            ),
            fallback(
                Intent::EntitySearch(EntityKind::Pages),
                carry_window,
                "No feature usage matched either; showing active pages. Narrow down with \
                 search_pages (EntitySearch(Pages)) using a query.",
            ),
            fallback(
                Intent::EntitySearch(EntityKind::Visitors),
                carry_days,
                "Only raw visitor activity was available. Use search_visitors \
                 (EntitySearch(Visitors)) or get_visitor_details for individual visitors.",
            ),
        ],
        Intent::FeatureAdoption => vec![
            fallback(
                Intent::EntitySearch(EntityKind::Features),
                carry_window,
                "No feature events matched; listing tagged features instead. Confirm the \
                 feature id with search_features (EntitySearch(Features)).",
            ),
            fallback(
                Intent::UsageAnalysis,
                carry_window,
                "No feature data was available; showing overall usage from analyze_usage \
                 (UsageAnalysis).",
            ),
        ],
        Intent::Retention => vec![
            fallback(
                Intent::UsageAnalysis,
                retention_as_usage,
                "No cohort matched; showing usage over the same span. Try analyze_retention \
                 (Retention) with an explicit cohort_start.",
            ),
            fallback(
                Intent::Engagement,
                carry_days,
                "Only engagement totals were available from calculate_product_engagement \
                 (Engagement).",
            ),
        ],
        Intent::Funnel => vec![
            fallback(
                Intent::EntitySearch(EntityKind::Pages),
                within_as_days,
                "No visitors completed the funnel; listing active pages so step ids can be \
                 checked with search_pages (EntitySearch(Pages)).",
            ),
            fallback(
                Intent::UsageAnalysis,
                within_as_days,
                "No page data matched; showing overall usage from analyze_usage \
                 (UsageAnalysis).",
            ),
        ],
        Intent::UserPath => vec![
            fallback(
                Intent::EntitySearch(EntityKind::Pages),
                carry_window,
                "No paths started at that page; listing active pages. Pick a start page \
                 with search_pages (EntitySearch(Pages)).",
            ),
            fallback(
                Intent::UsageAnalysis,
                carry_window,
                "No page data matched; showing overall usage from analyze_usage \
                 (UsageAnalysis).",
            ),
        ],
        Intent::Engagement => vec![
            fallback(
                Intent::UsageAnalysis,
                engagement_as_usage,
                "Engagement totals were unavailable; showing weekly usage from analyze_usage \
                 (UsageAnalysis).",
            ),
            fallback(
                Intent::EntitySearch(EntityKind::Visitors),
                carry_days,
                "Only raw visitor activity was available from search_visitors \
                 (EntitySearch(Visitors)).",
            ),
        ],
        Intent::NpsFeedback => vec![
            fallback(
                Intent::NpsFeedback,
                widest_window,
                "No NPS responses in the requested window; widened to the last 90 days \
                 across all polls (NpsFeedback).",
            ),
            fallback(
                Intent::Engagement,
                no_params,
                "No NPS responses at all; showing engagement totals from \
                 calculate_product_engagement (Engagement).",
            ),
        ],
        Intent::EntitySearch(kind) => vec![fallback(
            Intent::EntitySearch(kind),
            list_all,
            "Nothing matched the filters; listing all entities instead. Refine the query \
             with the same search tool.",
        )],
        Intent::EntityLookup(kind) => vec![
            fallback(
                Intent::EntitySearch(kind),
                id_as_query,
                "No exact match for that id; showing entities whose id or name contains it.",
            ),
            fallback(
                Intent::EntitySearch(kind),
                no_params,
                "No partial matches either; listing entities so a valid id can be picked.",
            ),
        ],
        Intent::SegmentOp => vec![
            fallback(
                Intent::SegmentOp,
                no_params,
                "That segment had no members; listing segments. Call analyze_segments \
                 (SegmentOp) with one of the listed segment_id values.",
            ),
            fallback(
                Intent::EntitySearch(EntityKind::Visitors),
                carry_days,
                "No segments were found; showing visitors from search_visitors \
                 (EntitySearch(Visitors)).",
            ),
        ],
    };
    FallbackPlan::new(intent, fallbacks)
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

fn days_back(default: Option<i64>) -> ParamSpec {
    let spec = ParamSpec::optional(
        "days_back",
        ParamKind::Integer {
            min: 1,
            max: i64::from(MAX_WINDOW_DAYS),
        },
        "Number of days to look back (1-90)",
    );
    match default {
        Some(days) => spec.default_int(days),
        None => spec,
    }
}

fn app_id() -> ParamSpec {
    ParamSpec::optional(
        "app_id",
        ParamKind::Text,
        "Application id for multi-app subscriptions",
    )
}

fn limit(max: i64) -> ParamSpec {
    ParamSpec::optional(
        "limit",
        ParamKind::Integer { min: 1, max },
        "Maximum number of results to return",
    )
    .default_int(10)
}

fn schema_for(intent: Intent) -> ParamSchema {
    let params = match intent {
        Intent::UsageAnalysis => vec![
            days_back(Some(30)),
            ParamSpec::optional(
                "group_by",
                ParamKind::Choice(&["day", "week", "month"]),
                "Bucket results by day, week, or month",
            )
            .default_text("day"),
            app_id(),
        ],
        Intent::FeatureAdoption => vec![
            days_back(Some(30)),
            ParamSpec::optional("feature_id", ParamKind::Text, "Restrict to one feature"),
            limit(MAX_SEARCH_LIMIT),
            app_id(),
        ],
        Intent::Retention => vec![
            ParamSpec::optional(
                "period",
                ParamKind::Choice(&["day", "week", "month"]),
                "Cohort period length",
            )
            .default_text("week"),
            ParamSpec::optional(
                "periods",
                ParamKind::Integer { min: 1, max: 12 },
                "Number of periods to follow the cohort",
            )
            .default_int(4),
            ParamSpec::optional(
                "cohort_start",
                ParamKind::Date,
                "Cohort anchor date (YYYY-MM-DD); defaults to `periods` periods ago",
            ),
            app_id(),
        ],
        Intent::Funnel => vec![
            ParamSpec::required(
                "steps",
                ParamKind::TextList {
                    min_items: 2,
                    max_items: 10,
                },
                "Ordered page or feature ids forming the funnel",
            ),
            ParamSpec::optional(
                "within_days",
                ParamKind::Integer {
                    min: 1,
                    max: i64::from(MAX_WINDOW_DAYS),
                },
                "Window in which the steps must be completed",
            )
            .default_int(30),
            app_id(),
        ],
        Intent::UserPath => vec![
            ParamSpec::required("start_page_id", ParamKind::Text, "Page id paths start from"),
            days_back(Some(30)),
            ParamSpec::optional(
                "max_steps",
                ParamKind::Integer { min: 1, max: 10 },
                "Number of path steps to follow",
            )
            .default_int(5),
            app_id(),
        ],
        Intent::Engagement => vec![days_back(Some(30)), app_id()],
        Intent::NpsFeedback => vec![
            days_back(Some(30)),
            ParamSpec::optional("poll_id", ParamKind::Text, "Restrict to one NPS poll"),
            ParamSpec::optional(
                "group_by",
                ParamKind::Choice(&["score", "account", "day"]),
                "Group responses by score, account, or day",
            )
            .default_text("score"),
        ],
        Intent::EntitySearch(_) => vec![
            ParamSpec::optional("query", ParamKind::Text, "Substring to match on name or id"),
            days_back(None),
            limit(MAX_SEARCH_LIMIT),
            app_id(),
        ],
        Intent::EntityLookup(kind) => vec![ParamSpec::entity_id(
            "id",
            match kind {
                EntityKind::Visitors => "The visitor id",
                EntityKind::Accounts => "The account id",
                EntityKind::Pages => "The page id",
                EntityKind::Features => "The feature id",
                EntityKind::TrackEvents => "The track event id",
            },
        )],
        Intent::SegmentOp => vec![
            ParamSpec::optional(
                "segment_id",
                ParamKind::Text,
                "Segment to analyse; omit to list segments",
            ),
            days_back(Some(30)),
            limit(MAX_SEARCH_LIMIT),
        ],
    };
    ParamSchema::new(params)
}

fn describe(intent: Intent) -> String {
    match intent {
        Intent::UsageAnalysis => "Analyze product usage over time (visitors, events, minutes)".into(),
        Intent::FeatureAdoption => "Analyze feature adoption by visitors and accounts".into(),
        Intent::Retention => "Analyze cohort retention by period".into(),
        Intent::Funnel => "Analyze conversion through an ordered list of steps".into(),
        Intent::UserPath => "Analyze the paths visitors take from a starting page".into(),
        Intent::Engagement => "Calculate product engagement totals".into(),
        Intent::NpsFeedback => "Analyze NPS poll responses and score".into(),
        Intent::SegmentOp => "Analyze a segment, or list segments".into(),
        Intent::EntitySearch(kind) => format!("Search {}", kind.plural().replace('_', " ")),
        Intent::EntityLookup(kind) => {
            format!("Get details for one {}", kind.singular().replace('_', " "))
        }
    }
}

fn example_for(intent: Intent) -> Value {
    match intent {
        Intent::UsageAnalysis => json!({ "days_back": 7, "group_by": "day" }),
        Intent::FeatureAdoption => json!({ "days_back": 30 }),
        Intent::Retention => json!({ "period": "week", "periods": 4 }),
        Intent::Funnel => json!({ "steps": ["signup_page", "onboarding_page"] }),
        Intent::UserPath => json!({ "start_page_id": "home_page" }),
        Intent::Engagement => json!({ "days_back": 30 }),
        Intent::NpsFeedback => json!({ "days_back": 90 }),
        Intent::SegmentOp => json!({}),
        Intent::EntitySearch(_) => json!({ "limit": 10 }),
        Intent::EntityLookup(_) => json!({ "id": "<id>" }),
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Everything the engine needs to serve one intent.
#[derive(Debug, Clone)]
pub struct IntentEntry {
    pub intent: Intent,
    pub tool_name: String,
    pub description: String,
    pub schema: ParamSchema,
    pub build: BuildFn,
    pub plan: FallbackPlan,
    /// Rows shown in a formatted summary; the true total is always reported.
    pub display_cap: usize,
    /// Example arguments quoted in hints.
    pub example: Value,
}

/// Read-only lookup table from intent names to their entries.
#[derive(Debug, Clone)]
pub struct IntentRegistry {
    entries: BTreeMap<Intent, IntentEntry>,
    by_name: HashMap<String, Intent>,
}

impl Default for IntentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentRegistry {
    /// Build the registry for every supported intent.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        let mut by_name = HashMap::new();
        for intent in Intent::all() {
            let entry = IntentEntry {
                intent,
                tool_name: intent.tool_name(),
                description: describe(intent),
                schema: schema_for(intent),
                build: builder::for_intent(intent),
                plan: plan_for(intent),
                display_cap: match intent {
                    Intent::UserPath => 20,
                    _ => DEFAULT_DISPLAY_CAP,
                },
                example: example_for(intent),
            };
            by_name.insert(entry.tool_name.clone(), intent);
            entries.insert(intent, entry);
        }
        debug!(intents = entries.len(), "intent registry built");
        Self { entries, by_name }
    }

    /// Override the display cap for one intent.
    pub fn with_display_cap(mut self, intent: Intent, cap: usize) -> Self {
        if let Some(entry) = self.entries.get_mut(&intent) {
            entry.display_cap = cap.max(1);
        }
        self
    }

    /// Resolve a tool name to its entry.
    pub fn resolve(&self, name: &str) -> Result<&IntentEntry> {
        self.by_name
            .get(name)
            .and_then(|intent| self.entries.get(intent))
            .ok_or_else(|| IntentError::UnknownIntent {
                name: name.to_string(),
                suggestions: self.suggest(name),
            })
    }

    pub fn entry(&self, intent: Intent) -> Option<&IntentEntry> {
        self.entries.get(&intent)
    }

    /// Entries in tool-listing order.
    pub fn entries(&self) -> impl Iterator<Item = &IntentEntry> {
        Intent::all()
            .into_iter()
            .filter_map(|intent| self.entries.get(&intent))
    }

    /// Known names sharing a word with `name`; every name when none do.
    fn suggest(&self, name: &str) -> Vec<String> {
        let words: Vec<String> = name
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| w.len() > 2 && !matches!(*w, "get" | "details"))
            .map(str::to_string)
            .collect();
        let mut matches: Vec<String> = self
            .by_name
            .keys()
            .filter(|known| known.split('_').any(|k| words.iter().any(|w| w == k)))
            .cloned()
            .collect();
        if matches.is_empty() {
            matches = self.by_name.keys().cloned().collect();
        }
        matches.sort();
        matches
    }

    /// Validate the raw arguments of fallback `level` for `entry`, converting a
    /// rejection into an internal defect.
    pub fn rebind(
        &self,
        entry: &IntentEntry,
        level: usize,
        params: &ValidatedParams,
    ) -> Result<(Intent, ValidatedParams)> {
        let defect = |reason: String| IntentError::InternalDefect {
            intent: entry.intent.label(),
            level,
            reason,
        };
        let strategy = entry
            .plan
            .get(level)
            .ok_or_else(|| defect("no strategy at this level".into()))?;
        if level == 0 {
            return Ok((strategy.intent, params.clone()));
        }
        let target = self
            .entry(strategy.intent)
            .ok_or_else(|| defect(format!("target {} is not registered", strategy.intent)))?;
        let raw = (strategy.rebind)(params);
        let rebound = target
            .schema
            .validate(&raw)
            .map_err(|e| defect(e.to_string()))?;
        Ok((strategy.intent, rebound))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
