//! Structured view of one guarded call's inputs.
//!
//! Ownership resolvers and audit extractors read named fields from here
//! (route parameters, query parameters, the request body, and attributes the
//! handler computed for this request) instead of positional arguments.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct CallContext {
    actor_id: Option<Uuid>,
    params: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
    body: Value,
    attributes: BTreeMap<String, Value>,
}

impl CallContext {
    pub fn new(actor_id: Uuid) -> Self {
        Self {
            actor_id: Some(actor_id),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.insert(name.into(), value.to_string());
        self
    }

    pub fn with_body<T: Serialize>(mut self, body: &T) -> Self {
        self.body = serde_json::to_value(body).unwrap_or(Value::Null);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn actor_id(&self) -> Option<Uuid> {
        self.actor_id
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Looks up a dotted path (`song.title`) in the request body.
    pub fn body_field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.body, path)
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Attribute parsed as a UUID, accepting only string values.
    pub fn attribute_uuid(&self, name: &str) -> Option<Uuid> {
        self.attribute(name)
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// Walks `a.b.c` through nested JSON objects.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
        .filter(|found| !found.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_named_fields() {
        let owner = Uuid::new_v4();
        let call = CallContext::new(Uuid::new_v4())
            .with_param("id", 42)
            .with_query("format", "csv")
            .with_body(&json!({"song": {"title": "Jolene"}, "note": null}))
            .with_attribute("owner_id", owner.to_string());

        assert_eq!(call.param("id"), Some("42"));
        assert_eq!(call.query("format"), Some("csv"));
        assert_eq!(call.body_field("song.title"), Some(&json!("Jolene")));
        assert_eq!(call.body_field("note"), None);
        assert_eq!(call.body_field("missing.path"), None);
        assert_eq!(call.attribute_uuid("owner_id"), Some(owner));
    }

    #[test]
    fn non_string_uuid_attribute_is_absent() {
        let call = CallContext::default().with_attribute("owner_id", 7);
        assert_eq!(call.attribute_uuid("owner_id"), None);
    }
}
