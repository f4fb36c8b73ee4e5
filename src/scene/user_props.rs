//! User properties attached to transforms and shapes.
//!
//! Upstream nodes carry user properties as two JSON dictionaries, one of
//! values and one of per-property metadata (interpretation strings). They
//! are parsed once when the sample tree is built.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::util::{Error, Result};

/// One user property.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserProperty {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
}

/// Name-ordered user properties.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UserProperties {
    entries: BTreeMap<String, UserProperty>,
}

impl UserProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the values and metadata dictionaries.
    ///
    /// Metadata entries without a matching value are ignored.
    pub fn from_json(values: &str, meta: &str) -> Result<Self> {
        let values = parse_object(values, "values")?;
        let meta = if meta.trim().is_empty() {
            serde_json::Map::new()
        } else {
            parse_object(meta, "metadata")?
        };

        let entries = values
            .into_iter()
            .map(|(name, value)| {
                let interpretation = meta
                    .get(&name)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                (name, UserProperty { value, interpretation })
            })
            .collect();
        Ok(Self { entries })
    }

    /// Insert a value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(
            name.into(),
            UserProperty {
                value,
                interpretation: None,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&UserProperty> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UserProperty)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn parse_object(text: &str, what: &str) -> Result<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::config(format!(
            "user property {what} must be a JSON object, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let props = UserProperties::from_json(
            r#"{"speed": 2.5, "tag": "hero"}"#,
            r#"{"speed": "float", "unused": "int"}"#,
        )
        .unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props.get("speed").unwrap().interpretation.as_deref(), Some("float"));
        assert!(props.get("tag").unwrap().interpretation.is_none());

        let names: Vec<_> = props.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["speed", "tag"]);
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(matches!(
            UserProperties::from_json("[1, 2]", ""),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(UserProperties::from_json("{", ""), Err(Error::Json(_))));
    }
}
