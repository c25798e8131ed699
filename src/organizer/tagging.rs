//! Flag derivation for processed entries.
//!
//! Every processed entry carries `S`. Enriched entries additionally carry
//! each suggested flag as-is (no vocabulary filter) and the flags derived
//! from recognised payload fields. Degraded entries carry `S` only.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::entry::EntryMetadata;
use crate::storage::{Flag, FlagSet};

/// Derives a flag from a string payload field: `<prefix><VALUE>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    /// Payload key to inspect.
    pub field: String,
    /// Fixed prefix of the derived flag.
    pub prefix: String,
    /// Uppercase the field value before appending it.
    pub uppercase: bool,
}

impl FieldRule {
    pub fn new(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            prefix: prefix.into(),
            uppercase: true,
        }
    }

    /// Builder: keep the field value's case.
    pub fn preserve_case(mut self) -> Self {
        self.uppercase = false;
        self
    }

    /// The flag this rule yields for `payload`, if any.
    ///
    /// The field must be a non-empty string after trimming.
    fn apply(&self, payload: &Map<String, Value>) -> Option<Flag> {
        let value = payload.get(&self.field)?.as_str()?.trim();
        if value.is_empty() {
            return None;
        }
        let value = if self.uppercase {
            value.to_uppercase()
        } else {
            value.to_string()
        };
        match Flag::new(format!("{}{}", self.prefix, value)) {
            Ok(flag) => Some(flag),
            Err(e) => {
                debug!(field = %self.field, error = %e, "Payload value cannot be encoded as a flag");
                None
            }
        }
    }
}

/// Payload-driven tagging rules.
#[derive(Debug, Clone)]
pub struct TaggingRules {
    field_rules: Vec<FieldRule>,
}

impl TaggingRules {
    /// The standard rules: `symbol` → `Symbol_<UPPERCASE>`.
    pub fn default_rules() -> Self {
        Self {
            field_rules: vec![FieldRule::new("symbol", "Symbol_")],
        }
    }

    /// No payload-derived flags.
    pub fn empty() -> Self {
        Self {
            field_rules: Vec::new(),
        }
    }

    /// Add a field rule.
    pub fn add_rule(&mut self, rule: FieldRule) {
        self.field_rules.push(rule);
    }

    /// Builder form of [`add_rule`](Self::add_rule).
    pub fn with_rule(mut self, rule: FieldRule) -> Self {
        self.add_rule(rule);
        self
    }

    /// Flags derived from recognised payload fields.
    pub fn derive_flags(&self, payload: &Map<String, Value>) -> Vec<Flag> {
        self.field_rules
            .iter()
            .filter_map(|rule| rule.apply(payload))
            .collect()
    }

    /// Flag set for a processed entry.
    ///
    /// With no metadata (degraded path) the result is exactly `{S}`.
    /// Otherwise `S` and the payload-derived flags are always placed, and
    /// suggested flags follow in order while the encoded list stays within
    /// `budget` bytes (see [`flag_budget`](crate::storage::flag_budget)).
    /// Suggestions that cannot be encoded or do not fit stay in metadata only.
    pub fn compute_flags(
        &self,
        metadata: Option<&EntryMetadata>,
        payload: &Map<String, Value>,
        budget: usize,
    ) -> FlagSet {
        let mut flags = FlagSet::seen();
        let Some(metadata) = metadata else {
            return flags;
        };

        flags.extend(self.derive_flags(payload));
        let mut used = flags.encode().len();

        for token in &metadata.suggested_flags {
            let flag = match Flag::new(token.as_str()) {
                Ok(flag) => flag,
                Err(e) => {
                    warn!(flag = %token, error = %e, "Suggested flag cannot be encoded, kept in metadata only");
                    continue;
                }
            };
            if flags.contains(flag.as_str()) {
                continue;
            }
            // Separator plus the token itself
            let cost = flag.as_str().len() + 1;
            if used + cost > budget {
                warn!(flag = %token, budget, "Suggested flag does not fit in the filename, kept in metadata only");
                continue;
            }
            used += cost;
            flags.insert(flag);
        }
        flags
    }
}

impl Default for TaggingRules {
    fn default() -> Self {
        Self::default_rules()
    }
}
