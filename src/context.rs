//! Per-request parameter state: raw params, the processed copy views read from, and the actor.

use crate::params::decode_structured;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The authenticated caller, as handed over by the host.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Actor {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Borrowed bundle handed to actions invoked directly rather than through a responder.
#[derive(Clone, Copy, Debug)]
pub struct ActionParams<'a> {
    pub actor: Option<&'a Actor>,
    pub params: &'a Map<String, Value>,
    pub request_context: &'a RequestContext,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestContext {
    actor: Option<Actor>,
    raw: Map<String, Value>,
    processed: Map<String, Value>,
    validated: Option<Map<String, Value>>,
    meta: Map<String, Value>,
}

impl RequestContext {
    pub fn new(params: Map<String, Value>, actor: Option<Actor>) -> Self {
        let mut ctx = RequestContext {
            actor,
            ..Default::default()
        };
        ctx.set_params(params);
        ctx
    }

    /// Replace the params: the processed copy is rebuilt from `raw` and validated params are cleared.
    pub fn set_params(&mut self, raw: Map<String, Value>) {
        self.processed = raw.clone();
        self.raw = raw;
        self.validated = None;
        self.parse_params();
    }

    fn parse_params(&mut self) {
        let p = &mut self.processed;
        if let Some(filters) = p.get_mut("filters").map(Value::take) {
            let decoded = decode_structured(filters);
            if !decoded.is_object() && !decoded.is_null() {
                tracing::warn!(filters = %decoded, "ignoring malformed filters param");
            }
            let decoded = if decoded.is_object() { decoded } else { Value::Object(Map::new()) };
            p.insert("filters".into(), decoded);
        }
        for key in ["limit", "page"] {
            let Some(v) = p.get(key) else { continue };
            match to_integer(v) {
                Some(n) => {
                    p.insert(key.into(), Value::from(n));
                }
                None => {
                    tracing::warn!(key, value = %v, "ignoring non-integer param");
                    p.remove(key);
                }
            }
        }
        let fields = p.get_mut("fields").map(Value::take).map(decode_structured);
        let fields = match fields {
            Some(Value::Object(m)) => Value::Object(m),
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(other) => {
                tracing::warn!(fields = %other, "ignoring malformed fields param");
                Value::Object(Map::new())
            }
        };
        p.insert("fields".into(), fields);
        let include = p.get_mut("include").map(Value::take).map(decode_structured);
        let include = match include {
            Some(Value::Array(items)) => Value::Array(items),
            Some(Value::String(s)) => Value::Array(
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            ),
            Some(Value::Null) | None => Value::Array(Vec::new()),
            Some(other) => {
                tracing::warn!(include = %other, "ignoring malformed include param");
                Value::Array(Vec::new())
            }
        };
        p.insert("include".into(), include);
        if let Some(sort) = p.get_mut("sort") {
            let decoded = decode_structured(sort.take());
            *sort = decoded;
        }
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    pub fn set_actor(&mut self, actor: Option<Actor>) {
        self.actor = actor;
    }

    /// Processed params; every view below reads from these.
    pub fn params(&self) -> &Map<String, Value> {
        &self.processed
    }

    pub fn params_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.processed
    }

    pub fn original_params(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn set_processed_params(&mut self, params: Map<String, Value>) {
        self.processed = params;
    }

    pub fn validated_params(&self) -> Option<&Map<String, Value>> {
        self.validated.as_ref()
    }

    pub fn set_validated_params(&mut self, params: Map<String, Value>) {
        self.validated = Some(params);
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.meta
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.processed.get(key)
    }

    /// The `id` param, unless null or blank.
    pub fn id(&self) -> Option<&Value> {
        self.processed.get("id").filter(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
    }

    pub fn filters(&self) -> Option<&Map<String, Value>> {
        self.processed.get("filters").and_then(Value::as_object)
    }

    pub fn set_filters(&mut self, filters: Map<String, Value>) {
        self.processed.insert("filters".into(), Value::Object(filters));
    }

    pub fn limit(&self) -> Option<i64> {
        self.processed.get("limit").and_then(Value::as_i64)
    }

    pub fn page(&self) -> i64 {
        self.processed.get("page").and_then(Value::as_i64).unwrap_or(1)
    }

    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.processed.get("fields").and_then(Value::as_object)
    }

    pub fn includes(&self) -> Vec<String> {
        match self.processed.get("include") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn set_includes(&mut self, includes: Vec<String>) {
        self.processed.insert(
            "include".into(),
            Value::Array(includes.into_iter().map(Value::String).collect()),
        );
    }

    /// Sort directive name, unless absent or blank.
    pub fn sort(&self) -> Option<&str> {
        self.processed
            .get("sort")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn set_sort(&mut self, sort: Option<String>) {
        match sort {
            Some(s) => self.processed.insert("sort".into(), Value::String(s)),
            None => self.processed.remove("sort"),
        };
    }

    pub fn to_action_params(&self) -> ActionParams<'_> {
        ActionParams {
            actor: self.actor(),
            params: self.params(),
            request_context: self,
        }
    }
}

fn to_integer(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
