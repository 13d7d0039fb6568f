//! The closed set of analysis intents a caller can request.
//!
//! Each [`Intent`] maps one-to-one onto a caller-facing tool name.  Entity
//! search and lookup intents are parameterised by the [`EntityKind`] they
//! operate on.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Entity kinds
// ---------------------------------------------------------------------------

/// The kind of named entity a search or lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Pages,
    Features,
    Visitors,
    Accounts,
    TrackEvents,
}

impl EntityKind {
    /// All entity kinds, in registry order.
    pub const ALL: [EntityKind; 5] = [
        Self::Pages,
        Self::Features,
        Self::Visitors,
        Self::Accounts,
        Self::TrackEvents,
    ];

    /// Plural, snake_case noun used in tool names (`pages`, `track_events`).
    pub fn plural(self) -> &'static str {
        match self {
            Self::Pages => "pages",
            Self::Features => "features",
            Self::Visitors => "visitors",
            Self::Accounts => "accounts",
            Self::TrackEvents => "track_events",
        }
    }

    /// Singular noun used in lookup tool names and resource paths.
    pub fn singular(self) -> &'static str {
        match self {
            Self::Pages => "page",
            Self::Features => "feature",
            Self::Visitors => "visitor",
            Self::Accounts => "account",
            Self::TrackEvents => "track_event",
        }
    }

    /// Resource path segment on the collaborator for direct lookups.
    pub fn resource_segment(self) -> &'static str {
        match self {
            Self::Pages => "page",
            Self::Features => "feature",
            Self::Visitors => "visitor",
            Self::Accounts => "account",
            Self::TrackEvents => "tracktype",
        }
    }

    /// Whether direct lookup by id is offered for this kind.
    pub fn supports_lookup(self) -> bool {
        !matches!(self, Self::TrackEvents)
    }
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// A named, parameterised analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "intent", content = "entity")]
pub enum Intent {
    UsageAnalysis,
    FeatureAdoption,
    Retention,
    Funnel,
    UserPath,
    Engagement,
    NpsFeedback,
    EntitySearch(EntityKind),
    EntityLookup(EntityKind),
    SegmentOp,
}

impl Intent {
    /// Every intent the registry serves, in tool-listing order.
    pub fn all() -> Vec<Intent> {
        let mut intents = Vec::with_capacity(20);
        intents.extend(EntityKind::ALL.iter().map(|k| Intent::EntitySearch(*k)));
        intents.extend(
            EntityKind::ALL
                .iter()
                .filter(|k| k.supports_lookup())
                .map(|k| Intent::EntityLookup(*k)),
        );
        intents.extend([
            Intent::SegmentOp,
            Intent::UsageAnalysis,
            Intent::FeatureAdoption,
            Intent::Retention,
            Intent::Funnel,
            Intent::UserPath,
            Intent::Engagement,
            Intent::NpsFeedback,
        ]);
        intents
    }

    /// The caller-facing tool name for this intent.
    pub fn tool_name(self) -> String {
        match self {
            Self::UsageAnalysis => "analyze_usage".into(),
            Self::FeatureAdoption => "analyze_feature_adoption".into(),
            Self::Retention => "analyze_retention".into(),
            Self::Funnel => "analyze_funnels".into(),
            Self::UserPath => "analyze_user_paths".into(),
            Self::Engagement => "calculate_product_engagement".into(),
            Self::NpsFeedback => "analyze_nps_feedback".into(),
            Self::SegmentOp => "analyze_segments".into(),
            Self::EntitySearch(kind) => format!("search_{}", kind.plural()),
            Self::EntityLookup(kind) => format!("get_{}_details", kind.singular()),
        }
    }

    /// Resolve a tool name back to its intent.
    pub fn from_tool_name(name: &str) -> Option<Intent> {
        Self::all().into_iter().find(|i| i.tool_name() == name)
    }

    /// Short, stable label used in logs and hint text (`FeatureAdoption`,
    /// `EntitySearch(Pages)`).
    pub fn label(self) -> String {
        match self {
            Self::EntitySearch(kind) => format!("EntitySearch({kind:?})"),
            Self::EntityLookup(kind) => format!("EntityLookup({kind:?})"),
            other => format!("{other:?}"),
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
