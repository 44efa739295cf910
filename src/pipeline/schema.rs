//! Input validation schema
//!
//! Each pipeline definition declares which input fields it needs.
//! Validation collects every problem rather than stopping at the first.

use serde::Serialize;
use serde_json::Value;

use crate::error::FieldIssue;

/// Shape a field's value must have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    /// A string whose trimmed length is within bounds
    Text {
        /// Minimum characters after trimming
        min_len: usize,
        /// Maximum characters after trimming
        max_len: usize,
    },
    /// An array of non-empty strings
    List {
        /// Minimum number of entries
        min_items: usize,
        /// Maximum number of entries
        max_items: usize,
    },
    /// An integer within bounds
    Integer {
        /// Smallest accepted value
        min: i64,
        /// Largest accepted value
        max: i64,
    },
    /// Any JSON value
    Any,
}

/// One declared input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldRule {
    /// Input key
    pub name: String,
    /// Whether it must be present
    pub required: bool,
    /// Accepted shape
    pub kind: FieldKind,
}

/// Declared input fields for one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InputSchema {
    /// Field rules in declaration order
    pub fields: Vec<FieldRule>,
}

impl InputSchema {
    /// Empty schema accepting any object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a text field of at least `min_len` characters.
    #[must_use]
    pub fn text(self, name: &str, min_len: usize, max_len: usize) -> Self {
        self.rule(name, true, FieldKind::Text { min_len, max_len })
    }

    /// Accept an optional text field.
    #[must_use]
    pub fn optional_text(self, name: &str, max_len: usize) -> Self {
        self.rule(name, false, FieldKind::Text { min_len: 0, max_len })
    }

    /// Require a list of strings.
    #[must_use]
    pub fn list(self, name: &str, min_items: usize, max_items: usize) -> Self {
        self.rule(name, true, FieldKind::List { min_items, max_items })
    }

    /// Accept an optional integer.
    #[must_use]
    pub fn optional_integer(self, name: &str, min: i64, max: i64) -> Self {
        self.rule(name, false, FieldKind::Integer { min, max })
    }

    /// Add a rule.
    #[must_use]
    pub fn rule(mut self, name: &str, required: bool, kind: FieldKind) -> Self {
        self.fields.push(FieldRule {
            name: name.to_string(),
            required,
            kind,
        });
        self
    }

    /// Check `input` against every rule.
    pub fn validate(&self, input: &Value) -> Result<(), Vec<FieldIssue>> {
        let Some(obj) = input.as_object() else {
            return Err(vec![FieldIssue::new("input", "must be a JSON object")]);
        };

        let mut issues = Vec::new();
        for rule in &self.fields {
            match obj.get(&rule.name) {
                None | Some(Value::Null) => {
                    if rule.required {
                        issues.push(FieldIssue::new(&rule.name, "is required"));
                    }
                }
                Some(value) => {
                    if let Some(message) = check_kind(&rule.kind, value) {
                        issues.push(FieldIssue::new(&rule.name, message));
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn check_kind(kind: &FieldKind, value: &Value) -> Option<String> {
    match kind {
        FieldKind::Text { min_len, max_len } => {
            let Some(text) = value.as_str() else {
                return Some("must be a string".to_string());
            };
            let len = text.trim().chars().count();
            if len < *min_len {
                Some(format!("must be at least {min_len} characters"))
            } else if len > *max_len {
                Some(format!("must be at most {max_len} characters"))
            } else {
                None
            }
        }
        FieldKind::List {
            min_items,
            max_items,
        } => {
            let Some(items) = value.as_array() else {
                return Some("must be a list".to_string());
            };
            if items
                .iter()
                .any(|i| i.as_str().map_or(true, |s| s.trim().is_empty()))
            {
                return Some("entries must be non-empty strings".to_string());
            }
            if items.len() < *min_items {
                Some(format!("must have at least {min_items} entries"))
            } else if items.len() > *max_items {
                Some(format!("must have at most {max_items} entries"))
            } else {
                None
            }
        }
        FieldKind::Integer { min, max } => match value.as_i64() {
            Some(n) if n < *min || n > *max => Some(format!("must be between {min} and {max}")),
            Some(_) => None,
            None => Some("must be an integer".to_string()),
        },
        FieldKind::Any => None,
    }
}
