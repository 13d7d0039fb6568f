//! Parameter schemas and the parameter validator.
//!
//! Every intent declares a [`ParamSchema`]: an ordered list of
//! [`ParamSpec`]s with a type, requiredness, valid range or choice set, and an
//! optional default.  [`ParamSchema::validate`] turns raw JSON arguments into
//! [`ValidatedParams`] or fails fast on the first bad field, before any
//! network activity happens.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{IntentError, Result};

/// Longest accepted free-text parameter.
const MAX_TEXT_LEN: usize = 256;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A single validated parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Text(String),
    List(Vec<String>),
}

impl ParamValue {
    fn to_json(&self) -> Value {
        match self {
            Self::Int(v) => json!(v),
            Self::Text(v) => json!(v),
            Self::List(v) => json!(v),
        }
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// The declared type and range of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    /// Whole number within an inclusive range.
    Integer { min: i64, max: i64 },
    /// Non-empty free text.
    Text,
    /// One of a fixed set of lowercase words.
    Choice(&'static [&'static str]),
    /// Calendar date in `YYYY-MM-DD` form.
    Date,
    /// Ordered list of non-empty strings with bounded length.
    TextList { min_items: usize, max_items: usize },
}

/// Declaration of one parameter of an intent.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    /// Marks the entity identifier of lookup intents.  It does not count
    /// against the one-required-parameter rule.
    pub entity_id: bool,
    pub default: Option<ParamValue>,
    pub description: &'static str,
}

impl ParamSpec {
    /// An optional parameter without a default.
    pub fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            entity_id: false,
            default: None,
            description,
        }
    }

    /// A required parameter.
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            required: true,
            ..Self::optional(name, kind, description)
        }
    }

    /// The required identifier of a named entity.
    pub fn entity_id(name: &'static str, description: &'static str) -> Self {
        Self {
            entity_id: true,
            ..Self::required(name, ParamKind::Text, description)
        }
    }

    /// Attach an integer default applied when the caller omits the parameter.
    pub fn default_int(mut self, value: i64) -> Self {
        self.default = Some(ParamValue::Int(value));
        self
    }

    /// Attach a text default applied when the caller omits the parameter.
    pub fn default_text(mut self, value: &str) -> Self {
        self.default = Some(ParamValue::Text(value.to_string()));
        self
    }

    /// Type-check and range-check a present, non-null value.
    fn check(&self, raw: &Value) -> Result<ParamValue> {
        let fail = |reason: String| IntentError::validation(self.name, reason);
        match &self.kind {
            ParamKind::Integer { min, max } => {
                let v = raw
                    .as_i64()
                    .ok_or_else(|| fail(format!("expected an integer, got {raw}")))?;
                if v < *min || v > *max {
                    return Err(fail(format!("must be between {min} and {max}, got {v}")));
                }
                Ok(ParamValue::Int(v))
            }
            ParamKind::Text => Ok(ParamValue::Text(check_text(raw).map_err(fail)?)),
            ParamKind::Choice(choices) => {
                let v = check_text(raw).map_err(fail)?.to_lowercase();
                if !choices.contains(&v.as_str()) {
                    return Err(fail(format!("must be one of: {}", choices.join(", "))));
                }
                Ok(ParamValue::Text(v))
            }
            ParamKind::Date => {
                let v = check_text(raw).map_err(fail)?;
                NaiveDate::parse_from_str(&v, "%Y-%m-%d")
                    .map_err(|e| fail(format!("expected a YYYY-MM-DD date: {e}")))?;
                Ok(ParamValue::Text(v))
            }
            ParamKind::TextList {
                min_items,
                max_items,
            } => {
                let items = raw
                    .as_array()
                    .ok_or_else(|| fail(format!("expected a list of strings, got {raw}")))?;
                if items.len() < *min_items || items.len() > *max_items {
                    return Err(fail(format!(
                        "must contain between {min_items} and {max_items} items, got {}",
                        items.len()
                    )));
                }
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let text = check_text(item).map_err(|r| fail(format!("item {i}: {r}")))?;
                    out.push(text);
                }
                Ok(ParamValue::List(out))
            }
        }
    }

    fn json_schema(&self) -> Value {
        let mut prop = match &self.kind {
            ParamKind::Integer { min, max } => {
                json!({ "type": "integer", "minimum": min, "maximum": max })
            }
            ParamKind::Text => json!({ "type": "string" }),
            ParamKind::Choice(choices) => json!({ "type": "string", "enum": choices }),
            ParamKind::Date => json!({ "type": "string", "format": "date" }),
            ParamKind::TextList {
                min_items,
                max_items,
            } => json!({
                "type": "array",
                "items": { "type": "string" },
                "minItems": min_items,
                "maxItems": max_items
            }),
        };
        prop["description"] = json!(self.description);
        if let Some(default) = &self.default {
            prop["default"] = default.to_json();
        }
        prop
    }
}

fn check_text(raw: &Value) -> std::result::Result<String, String> {
    let s = raw
        .as_str()
        .ok_or_else(|| format!("expected a string, got {raw}"))?
        .trim();
    if s.is_empty() {
        return Err("must not be empty".into());
    }
    if s.len() > MAX_TEXT_LEN {
        return Err(format!("must be at most {MAX_TEXT_LEN} characters"));
    }
    Ok(s.to_string())
}

/// The ordered parameter declarations of one intent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSchema {
    params: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Look up a declaration by name.
    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Names of required parameters, entity identifiers included.
    pub fn required_params(&self) -> Vec<&'static str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect()
    }

    /// Validate raw JSON arguments against this schema.
    ///
    /// `null` is treated as an empty argument object and a `null` field as an
    /// absent one.  Unknown fields are rejected.
    pub fn validate(&self, raw: &Value) -> Result<ValidatedParams> {
        let empty = Map::new();
        let args = match raw {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(IntentError::validation(
                    "arguments",
                    format!("expected a JSON object, got {other}"),
                ));
            }
        };

        let mut unknown: Vec<&String> = args.keys().filter(|k| self.get(k).is_none()).collect();
        unknown.sort();
        if let Some(name) = unknown.first() {
            let accepted: Vec<&str> = self.params.iter().map(|p| p.name).collect();
            return Err(IntentError::validation(
                name.as_str(),
                format!("unknown parameter; accepted: {}", accepted.join(", ")),
            ));
        }

        let mut values = BTreeMap::new();
        for spec in &self.params {
            match args.get(spec.name).filter(|v| !v.is_null()) {
                Some(raw) => {
                    values.insert(spec.name.to_string(), spec.check(raw)?);
                }
                None if spec.required => {
                    return Err(IntentError::validation(spec.name, "is required"));
                }
                None => {
                    if let Some(default) = &spec.default {
                        values.insert(spec.name.to_string(), default.clone());
                    }
                }
            }
        }

        Ok(ValidatedParams { values })
    }

    /// JSON Schema describing these parameters, for tool listings.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.name.to_string(), p.json_schema()))
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_params(),
            "additionalProperties": false
        })
    }
}

// ---------------------------------------------------------------------------
// Validated parameters
// ---------------------------------------------------------------------------

/// Parameters that passed validation, with defaults applied.
///
/// Backed by a sorted map so that equal inputs compare and iterate
/// identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidatedParams {
    values: BTreeMap<String, ParamValue>,
}

impl ValidatedParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ParamValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParamValue::Text(v)) => Some(v),
            _ => None,
        }
    }

    pub fn list(&self, name: &str) -> Option<&[String]> {
        match self.values.get(name) {
            Some(ParamValue::List(v)) => Some(v),
            _ => None,
        }
    }

    /// Raw JSON form, suitable for re-validation against another schema.
    pub fn to_raw(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(map)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ParamSchema {
        ParamSchema::new(vec![
            ParamSpec::optional(
                "days_back",
                ParamKind::Integer { min: 1, max: 90 },
                "Days to look back",
            )
            .default_int(30),
            ParamSpec::optional(
                "group_by",
                ParamKind::Choice(&["day", "week", "month"]),
                "Bucket size",
            )
            .default_text("day"),
            ParamSpec::optional("app_id", ParamKind::Text, "Application id"),
        ])
    }

    #[test]
    fn defaults_are_applied() {
        let params = schema().validate(&json!({})).unwrap();
        assert_eq!(params.int("days_back"), Some(30));
        assert_eq!(params.text("group_by"), Some("day"));
        assert!(params.get("app_id").is_none());
    }

    #[test]
    fn null_arguments_mean_empty() {
        let params = schema().validate(&Value::Null).unwrap();
        assert_eq!(params.int("days_back"), Some(30));
    }

    #[test]
    fn null_field_means_absent() {
        let params = schema().validate(&json!({"days_back": null})).unwrap();
        assert_eq!(params.int("days_back"), Some(30));
    }

    #[test]
    fn out_of_range_is_rejected_not_clamped() {
        let err = schema().validate(&json!({"days_back": 91})).unwrap_err();
        assert_eq!(err.field(), Some("days_back"));
        let err = schema().validate(&json!({"days_back": 0})).unwrap_err();
        assert_eq!(err.field(), Some("days_back"));
    }

    #[test]
    fn choice_is_case_insensitive() {
        let params = schema().validate(&json!({"group_by": "WEEK"})).unwrap();
        assert_eq!(params.text("group_by"), Some("week"));
        let err = schema().validate(&json!({"group_by": "year"})).unwrap_err();
        assert!(err.to_string().contains("day, week, month"));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let err = schema().validate(&json!({"days_back": "thirty"})).unwrap_err();
        assert_eq!(err.field(), Some("days_back"));
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let err = schema().validate(&json!({"bogus": 1})).unwrap_err();
        assert_eq!(err.field(), Some("bogus"));
        assert!(err.to_string().contains("days_back"));
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let err = schema().validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err.field(), Some("arguments"));
    }

    #[test]
    fn required_and_list_checks() {
        let schema = ParamSchema::new(vec![ParamSpec::required(
            "steps",
            ParamKind::TextList {
                min_items: 2,
                max_items: 3,
            },
            "Step ids",
        )]);
        assert_eq!(
            schema.validate(&json!({})).unwrap_err().field(),
            Some("steps")
        );
        assert!(schema.validate(&json!({"steps": ["a"]})).is_err());
        assert!(schema.validate(&json!({"steps": ["a", ""]})).is_err());
        let params = schema.validate(&json!({"steps": ["a", " b "]})).unwrap();
        assert_eq!(params.list("steps").unwrap(), ["a", "b"]);
    }

    #[test]
    fn dates_are_checked() {
        let schema = ParamSchema::new(vec![ParamSpec::optional(
            "cohort_start",
            ParamKind::Date,
            "Cohort anchor",
        )]);
        assert!(schema.validate(&json!({"cohort_start": "2024-02-30"})).is_err());
        assert!(schema.validate(&json!({"cohort_start": "2024-02-29"})).is_ok());
    }

    #[test]
    fn raw_form_revalidates_to_the_same_params() {
        let s = schema();
        let params = s
            .validate(&json!({"days_back": 7, "app_id": "web"}))
            .unwrap();
        assert_eq!(s.validate(&params.to_raw()).unwrap(), params);
    }

    #[test]
    fn json_schema_lists_required_fields() {
        let schema = ParamSchema::new(vec![
            ParamSpec::entity_id("id", "Visitor id"),
            ParamSpec::optional("limit", ParamKind::Integer { min: 1, max: 100 }, "Max rows")
                .default_int(10),
        ]);
        let js = schema.to_json_schema();
        assert_eq!(js["required"], json!(["id"]));
        assert_eq!(js["properties"]["limit"]["maximum"], 100);
        assert_eq!(js["properties"]["limit"]["default"], 10);
        assert_eq!(js["additionalProperties"], false);
    }
}
