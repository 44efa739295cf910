//! Stage-accumulated session output
//!
//! Stages never hand back a whole new result. They return a [`StageOutput`]
//! which [`SessionResult::merge`] folds in: new fields, new items, and
//! annotations on existing items. Within one run nothing is ever removed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultField {
    /// The value itself
    pub value: Value,
    /// Stage that produced it, or `user` for corrections
    pub stage: String,
    /// Run number it was produced in
    pub run: u32,
    /// User correction that stage output must not overwrite
    #[serde(default)]
    pub sticky: bool,
}

/// An addressable sub-result (idea, cluster, test case, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    /// Locally unique id within the session
    pub id: String,
    /// Item category, e.g. `idea` or `test_case`
    pub kind: String,
    /// Stage that created it
    pub stage: String,
    /// Run number it was created in
    pub run: u32,
    /// Item payload; always a JSON object
    pub data: Value,
    /// Set once a user has edited the item
    #[serde(default)]
    pub edited: bool,
}

/// A new item emitted by a stage. The executor assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    /// Item category
    pub kind: String,
    /// Item payload
    pub data: Value,
}

impl NewItem {
    /// Create a new item of the given kind.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Keys a stage adds to an existing item's data.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Target item id
    pub item_id: String,
    /// Keys merged into the item's data object
    pub values: Map<String, Value>,
}

/// What a stage function returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    /// Field values to set
    pub fields: BTreeMap<String, Value>,
    /// Items to append
    pub items: Vec<NewItem>,
    /// Annotations on existing items
    pub annotations: Vec<Annotation>,
}

impl StageOutput {
    /// Empty output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Append an item.
    #[must_use]
    pub fn item(mut self, kind: impl Into<String>, data: Value) -> Self {
        self.items.push(NewItem::new(kind, data));
        self
    }

    /// Annotate an existing item.
    #[must_use]
    pub fn annotate(mut self, item_id: impl Into<String>, values: Map<String, Value>) -> Self {
        self.annotations.push(Annotation {
            item_id: item_id.into(),
            values,
        });
        self
    }
}

/// Accumulated output of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    /// Named outputs
    #[serde(default)]
    pub fields: BTreeMap<String, ResultField>,
    /// Sub-results in creation order
    #[serde(default)]
    pub items: Vec<ResultItem>,
}

impl SessionResult {
    /// Look up a field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).map(|f| &f.value)
    }

    /// Look up an item by id.
    #[must_use]
    pub fn item(&self, id: &str) -> Option<&ResultItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Items of one kind, in creation order.
    pub fn items_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a ResultItem> + 'a {
        self.items.iter().filter(move |i| i.kind == kind)
    }

    /// Fold a stage's output into the result.
    ///
    /// Output from an earlier run of the same stage is superseded first,
    /// except sticky fields and edited items. Sticky fields are never
    /// overwritten. Annotations naming an unknown item are ignored; keys the
    /// user already set on an edited item are kept.
    pub fn merge(&mut self, stage: &str, run: u32, output: StageOutput) {
        self.supersede(stage, run);

        for (name, value) in output.fields {
            if self.fields.get(&name).is_some_and(|f| f.sticky) {
                continue;
            }
            self.fields.insert(
                name,
                ResultField {
                    value,
                    stage: stage.to_string(),
                    run,
                    sticky: false,
                },
            );
        }

        for new_item in output.items {
            let id = self.next_item_id(stage);
            self.items.push(ResultItem {
                id,
                kind: new_item.kind,
                stage: stage.to_string(),
                run,
                data: into_object(new_item.data),
                edited: false,
            });
        }

        for annotation in output.annotations {
            let Some(item) = self.items.iter_mut().find(|i| i.id == annotation.item_id) else {
                continue;
            };
            let edited = item.edited;
            if let Value::Object(data) = &mut item.data {
                for (key, value) in annotation.values {
                    if edited && data.contains_key(&key) {
                        continue;
                    }
                    data.insert(key, value);
                }
            }
        }
    }

    /// Drop non-sticky output `stage` produced in runs before `run`.
    fn supersede(&mut self, stage: &str, run: u32) {
        self.fields
            .retain(|_, f| f.sticky || f.stage != stage || f.run >= run);
        self.items
            .retain(|i| i.edited || i.stage != stage || i.run >= run);
    }

    fn next_item_id(&self, stage: &str) -> String {
        let prefix = format!("{stage}-");
        let max = self
            .items
            .iter()
            .filter_map(|i| i.id.strip_prefix(&prefix)?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("{prefix}{}", max + 1)
    }

    /// Merge a user patch into an item. Returns the updated item.
    pub fn edit_item(&mut self, id: &str, patch: Map<String, Value>) -> Option<&ResultItem> {
        let item = self.items.iter_mut().find(|i| i.id == id)?;
        if let Value::Object(data) = &mut item.data {
            data.extend(patch);
        }
        item.edited = true;
        Some(item)
    }

    /// Record a user correction that later runs must preserve.
    pub fn set_sticky(&mut self, name: &str, value: Value, run: u32) {
        self.fields.insert(
            name.to_string(),
            ResultField {
                value,
                stage: "user".to_string(),
                run,
                sticky: true,
            },
        );
    }

    /// Serialized size in bytes, used to enforce the result size limit.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map_or(usize::MAX, |v| v.len())
    }
}

fn into_object(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            Value::Object(map)
        }
    }
}
