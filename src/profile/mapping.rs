//! Field Mapping
//!
//! Declarative translation of a provider's profile document into a `Profile`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AdapterResult, UnexpectedResponseError};
use crate::types::{is_truthy, Profile, ProfileField};

/// Where a rule reads its value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSource {
    /// Dotted path; numeric segments index arrays (`emails.0.value`).
    Path(String),
    /// First path that yields a non-empty value.
    FirstNonEmpty(Vec<String>),
}

/// Post-processing applied to a resolved value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    #[default]
    None,
    Lowercase,
    /// Normalize a flag to `"true"` / `"false"`.
    Truthy,
    /// Prepend a fixed string, e.g. a profile URL base.
    Prefix(String),
    /// Assign the value and set `email_verified` from the flag at this path.
    VerifiedBy(String),
}

/// One mapping rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub target: ProfileField,
    pub source: FieldSource,
    #[serde(default)]
    pub transform: Transform,
}

impl FieldRule {
    pub fn path(target: ProfileField, path: impl Into<String>) -> Self {
        Self {
            target,
            source: FieldSource::Path(path.into()),
            transform: Transform::None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

/// Ordered rule list. The first rule producing a value for a field wins.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping {
    rules: Vec<FieldRule>,
}

impl FieldMapping {
    pub fn new(rules: Vec<FieldRule>) -> Self {
        Self { rules }
    }

    /// Append a plain path rule.
    pub fn rule(mut self, target: ProfileField, path: impl Into<String>) -> Self {
        self.rules.push(FieldRule::path(target, path));
        self
    }

    pub fn push(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    pub fn has_rule_for(&self, target: ProfileField) -> bool {
        self.rules.iter().any(|r| r.target == target)
    }

    /// Map a document into a profile.
    ///
    /// Fails with `UnexpectedResponse` when no identifier can be resolved;
    /// other fields are left unset when absent.
    pub fn apply(&self, document: &Value) -> AdapterResult<Profile> {
        let identifier = self
            .rules
            .iter()
            .filter(|r| r.target == ProfileField::Identifier)
            .find_map(|r| r.resolve(document))
            .ok_or_else(|| UnexpectedResponseError::MissingField {
                field: ProfileField::Identifier.as_str().to_string(),
            })?;

        let mut profile = Profile::new(identifier)?;
        for rule in self.rules.iter().filter(|r| r.target != ProfileField::Identifier) {
            if rule.target != ProfileField::EmailVerified && profile.is_set(rule.target) {
                continue;
            }
            if let Some(value) = rule.resolve(document) {
                if let Transform::VerifiedBy(flag_path) = &rule.transform {
                    profile.email_verified = lookup(document, flag_path)
                        .map(value_is_truthy)
                        .unwrap_or(false);
                }
                profile.set(rule.target, value);
            }
        }
        Ok(profile)
    }
}

impl FieldRule {
    fn resolve(&self, document: &Value) -> Option<String> {
        let raw = match &self.source {
            FieldSource::Path(path) => lookup(document, path).and_then(stringify),
            FieldSource::FirstNonEmpty(paths) => paths
                .iter()
                .find_map(|p| lookup(document, p).and_then(stringify)),
        }?;

        Some(match &self.transform {
            Transform::None | Transform::VerifiedBy(_) => raw,
            Transform::Lowercase => raw.to_lowercase(),
            Transform::Truthy => is_truthy(&raw).to_string(),
            Transform::Prefix(prefix) => format!("{}{}", prefix, raw),
        })
    }
}

/// Walk a dotted path through objects and arrays.
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(document);
    }
    path.split('.').try_fold(document, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Scalar as a non-empty string.
pub fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn value_is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => is_truthy(s),
        _ => false,
    }
}

/// Secondary request filling one profile field, e.g. the primary verified
/// email from a separate email list endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideChannelLookup {
    pub target: ProfileField,
    pub endpoint: String,
    /// Path to the list of candidates; the whole body when absent.
    #[serde(default)]
    pub list_path: Option<String>,
    /// Flags that must all be truthy on the chosen entry.
    #[serde(default)]
    pub require_true: Vec<String>,
    /// Path of the value inside the chosen entry.
    pub value_path: String,
    /// Mark the email verified when an entry passes `require_true`.
    #[serde(default)]
    pub marks_verified: bool,
}

impl SideChannelLookup {
    /// Pick the first candidate that passes every `require_true` flag.
    pub fn select(&self, body: &Value) -> Option<String> {
        let candidates = match &self.list_path {
            Some(path) => lookup(body, path)?,
            None => body,
        };
        let passes = |entry: &Value| {
            self.require_true
                .iter()
                .all(|flag| lookup(entry, flag).map(value_is_truthy).unwrap_or(false))
        };

        match candidates {
            Value::Array(items) => items
                .iter()
                .filter(|item| passes(item))
                .find_map(|item| lookup(item, &self.value_path).and_then(stringify)),
            single if passes(single) => lookup(single, &self.value_path).and_then(stringify),
            _ => None,
        }
    }
}
