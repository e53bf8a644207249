//! Records: one logical row keyed by attribute id.

use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// CDC-style change kind attached to a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Plain read data.
    #[default]
    None,
    Insert,
    Update,
    Delete,
}

/// One logical row: attribute id → nullable value.
///
/// The map keeps insertion order for readability only; physical column order
/// belongs to the codec, not the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    values: IndexMap<String, Value>,
    #[serde(default)]
    change_kind: ChangeKind,
}

impl EntityData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_change_kind(mut self, change_kind: ChangeKind) -> Self {
        self.change_kind = change_kind;
        self
    }

    /// Builder form of [`EntityData::put`].
    pub fn with(mut self, attribute_id: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(attribute_id, value);
        self
    }

    pub fn put(&mut self, attribute_id: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(attribute_id.into(), value.into());
    }

    /// `None` when the attribute is absent; `Some(Value::Null)` when present but null.
    pub fn get(&self, attribute_id: &str) -> Option<&Value> {
        self.values.get(attribute_id)
    }

    pub fn contains(&self, attribute_id: &str) -> bool {
        self.values.contains_key(attribute_id)
    }

    pub fn change_kind(&self) -> ChangeKind {
        self.change_kind
    }

    pub fn set_change_kind(&mut self, change_kind: ChangeKind) {
        self.change_kind = change_kind;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_vs_null() {
        let data = EntityData::new().with("a", Value::Null);

        assert_eq!(data.get("a"), Some(&Value::Null));
        assert_eq!(data.get("b"), None);
        assert!(data.contains("a"));
        assert!(!data.contains("b"));
    }

    #[test]
    fn test_change_kind_defaults_to_none() {
        let data = EntityData::new();
        assert_eq!(data.change_kind(), ChangeKind::None);

        let data = data.with_change_kind(ChangeKind::Delete);
        assert_eq!(data.change_kind(), ChangeKind::Delete);
    }

    #[test]
    fn test_json_shape() {
        let data = EntityData::new()
            .with("id", 1i64)
            .with("name", "x")
            .with_change_kind(ChangeKind::Insert);
        let json = serde_json::to_value(&data).unwrap();

        assert_eq!(json["values"]["id"], 1);
        assert_eq!(json["change_kind"], "insert");
    }
}
