//! The nested result structure produced by a run.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// What a stage contributed to its parent's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StageValue {
    /// Ordered step outputs, one per step.
    Outputs(Vec<String>),
    /// The results of a parallel group, keyed by branch name.
    Nested(Results),
}

impl StageValue {
    /// Returns the step outputs, if this is a leaf value.
    #[must_use]
    pub fn as_outputs(&self) -> Option<&[String]> {
        match self {
            Self::Outputs(outputs) => Some(outputs),
            Self::Nested(_) => None,
        }
    }

    /// Returns the nested results, if any.
    #[must_use]
    pub fn as_nested(&self) -> Option<&Results> {
        match self {
            Self::Nested(results) => Some(results),
            Self::Outputs(_) => None,
        }
    }
}

/// Stage name to value, in insertion order.
///
/// Serializes as a JSON object whose keys keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Results {
    entries: Vec<(String, StageValue)>,
}

impl Results {
    /// Creates an empty result map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores a value, replacing an existing entry in place.
    pub fn insert(&mut self, name: impl Into<String>, value: StageValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Returns the value stored for a stage name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StageValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Follows a path of stage names through nested results.
    #[must_use]
    pub fn get_path(&self, path: &[&str]) -> Option<&StageValue> {
        let (last, parents) = path.split_last()?;
        let mut current = self;
        for name in parents {
            current = current.get(name)?.as_nested()?;
        }
        current.get(last)
    }

    /// Returns true if an entry exists for the stage name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StageValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Returns the entry names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(key, _)| key.as_str()).collect()
    }

    /// Consumes the map, returning its entries in insertion order.
    #[must_use]
    pub fn into_entries(self) -> Vec<(String, StageValue)> {
        self.entries
    }

    /// Converts the results into a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(key, value)| {
                    let value = match value {
                        StageValue::Outputs(outputs) => serde_json::json!(outputs),
                        StageValue::Nested(nested) => nested.to_json(),
                    };
                    (key.clone(), value)
                })
                .collect(),
        )
    }
}

impl Serialize for Results {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn outputs(values: &[&str]) -> StageValue {
        StageValue::Outputs(values.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn test_insertion_order_and_replace() {
        let mut results = Results::new();
        results.insert("b", outputs(&["1"]));
        results.insert("a", outputs(&["2"]));
        results.insert("b", outputs(&["3"]));

        assert_eq!(results.names(), vec!["b", "a"]);
        assert_eq!(results.get("b"), Some(&outputs(&["3"])));
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_get_path() {
        let mut inner = Results::new();
        inner.insert("Branch A", outputs(&["a"]));
        let mut results = Results::new();
        results.insert("Parallel Stage", StageValue::Nested(inner));

        assert_eq!(
            results.get_path(&["Parallel Stage", "Branch A"]),
            Some(&outputs(&["a"]))
        );
        assert!(results.get_path(&["Parallel Stage", "Branch B"]).is_none());
        assert!(results.get_path(&[]).is_none());
    }

    #[test]
    fn test_serialize_keeps_order() {
        let mut inner = Results::new();
        inner.insert("z", outputs(&["last"]));
        let mut results = Results::new();
        results.insert("stage", outputs(&["x", "y"]));
        results.insert("group", StageValue::Nested(inner));

        let json = serde_json::to_string(&results).unwrap();
        assert_eq!(json, r#"{"stage":["x","y"],"group":{"z":["last"]}}"#);
        assert_eq!(serde_json::to_value(&results).unwrap(), results.to_json());
    }
}
