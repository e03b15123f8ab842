use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::authz::Entity;
use crate::call::CallContext;

/// Pulls the audited entity's id out of a call's inputs and (when it succeeded) its result.
pub type EntityIdExtractor =
    Arc<dyn Fn(&CallContext, Option<&Value>) -> anyhow::Result<Option<String>> + Send + Sync>;

/// Builds the detail payload stored with a record.
pub type DetailsExtractor =
    Arc<dyn Fn(&CallContext, Option<&Value>) -> anyhow::Result<Option<Value>> + Send + Sync>;

/// Declarative audit settings for one operation, built once at registration.
#[derive(Clone)]
pub struct AuditConfig {
    pub action: String,
    pub entity_type: Entity,
    entity_id: Option<EntityIdExtractor>,
    details: Option<DetailsExtractor>,
    pub skip_on_error: bool,
    pub sensitive: bool,
    pub notify: bool,
}

impl AuditConfig {
    pub fn new(action: impl Into<String>, entity_type: Entity) -> Self {
        Self {
            action: action.into(),
            entity_type,
            entity_id: None,
            details: None,
            skip_on_error: false,
            sensitive: false,
            notify: false,
        }
    }

    pub fn entity_id<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&CallContext, Option<&Value>) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    {
        self.entity_id = Some(Arc::new(extractor));
        self
    }

    pub fn details<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&CallContext, Option<&Value>) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        self.details = Some(Arc::new(extractor));
        self
    }

    pub fn skip_on_error(mut self) -> Self {
        self.skip_on_error = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Publish a relay event after the record is written.
    pub fn notify(mut self) -> Self {
        self.notify = true;
        self
    }

    pub fn entity_id_extractor(&self) -> Option<&EntityIdExtractor> {
        self.entity_id.as_ref()
    }

    pub fn details_extractor(&self) -> Option<&DetailsExtractor> {
        self.details.as_ref()
    }

    pub fn needs_result(&self) -> bool {
        self.entity_id.is_some() || self.details.is_some()
    }
}

impl fmt::Debug for AuditConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditConfig")
            .field("action", &self.action)
            .field("entity_type", &self.entity_type)
            .field("entity_id", &self.entity_id.is_some())
            .field("details", &self.details.is_some())
            .field("skip_on_error", &self.skip_on_error)
            .field("sensitive", &self.sensitive)
            .field("notify", &self.notify)
            .finish()
    }
}

/// Reusable extractors over named call fields.
pub mod extract {
    use anyhow::bail;
    use serde_json::{Map, Value};

    use crate::call::{lookup_path, CallContext};

    fn value_to_id(value: &Value) -> Option<String> {
        match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Entity id from a route parameter.
    pub fn param(
        name: &'static str,
    ) -> impl Fn(&CallContext, Option<&Value>) -> anyhow::Result<Option<String>> + Send + Sync + 'static {
        move |call, _| Ok(call.param(name).map(str::to_string))
    }

    /// Entity id from a field of the operation's result.
    pub fn result_field(
        path: &'static str,
    ) -> impl Fn(&CallContext, Option<&Value>) -> anyhow::Result<Option<String>> + Send + Sync + 'static {
        move |_, result| Ok(result.and_then(|value| lookup_path(value, path)).and_then(value_to_id))
    }

    /// Route parameter when present, result field otherwise.
    pub fn param_or_result(
        name: &'static str,
        path: &'static str,
    ) -> impl Fn(&CallContext, Option<&Value>) -> anyhow::Result<Option<String>> + Send + Sync + 'static {
        move |call, result| {
            Ok(call
                .param(name)
                .map(str::to_string)
                .or_else(|| result.and_then(|value| lookup_path(value, path)).and_then(value_to_id)))
        }
    }

    /// The full request body.
    pub fn body() -> impl Fn(&CallContext, Option<&Value>) -> anyhow::Result<Option<Value>> + Send + Sync + 'static
    {
        |call, _| match call.body() {
            Value::Null => Ok(None),
            body => Ok(Some(body.clone())),
        }
    }

    /// Selected request-body fields; absent fields are left out.
    pub fn body_fields(
        fields: &'static [&'static str],
    ) -> impl Fn(&CallContext, Option<&Value>) -> anyhow::Result<Option<Value>> + Send + Sync + 'static {
        move |call, _| {
            if !call.body().is_object() {
                bail!("request body is not an object");
            }
            let picked: Map<String, Value> = fields
                .iter()
                .filter_map(|field| call.body_field(field).map(|v| (field.to_string(), v.clone())))
                .collect();
            Ok((!picked.is_empty()).then_some(Value::Object(picked)))
        }
    }

    /// `{"before": <attribute>, "after": <result>}` for state-changing calls.
    pub fn before_after(
        before_attribute: &'static str,
    ) -> impl Fn(&CallContext, Option<&Value>) -> anyhow::Result<Option<Value>> + Send + Sync + 'static {
        move |call, result| {
            let mut payload = Map::new();
            if let Some(before) = call.attribute(before_attribute) {
                payload.insert("before".to_string(), before.clone());
            }
            if let Some(after) = result {
                payload.insert("after".to_string(), after.clone());
            }
            Ok((!payload.is_empty()).then_some(Value::Object(payload)))
        }
    }

    /// Named query parameters merged with the result object.
    pub fn query_and_result(
        names: &'static [&'static str],
    ) -> impl Fn(&CallContext, Option<&Value>) -> anyhow::Result<Option<Value>> + Send + Sync + 'static {
        move |call, result| {
            let mut payload = Map::new();
            for name in names {
                if let Some(value) = call.query(name) {
                    payload.insert(name.to_string(), Value::String(value.to_string()));
                }
            }
            if let Some(Value::Object(fields)) = result {
                for (key, value) in fields {
                    payload.insert(key.clone(), value.clone());
                }
            }
            Ok((!payload.is_empty()).then_some(Value::Object(payload)))
        }
    }
}
