//! Declarative metadata for published actions, scopes (filters) and sorts, and the registry holding it.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Declared type of a parameter. Array-ness is carried by [`ParamMeta::array`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Integer,
    String,
    Date,
    Float,
    Time,
    Bool,
    /// Passed through untouched.
    Any,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamMeta {
    pub default: Option<Value>,
    pub array: bool,
    /// When false and the doc has exactly one param, filters receive the bare value instead of `{name: value}`.
    pub with_key: bool,
    pub extra: Map<String, Value>,
}

impl Default for ParamMeta {
    fn default() -> Self {
        ParamMeta {
            default: None,
            array: false,
            with_key: true,
            extra: Map::new(),
        }
    }
}

impl ParamMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn without_key(mut self) -> Self {
        self.with_key = false;
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub description: Option<String>,
    pub meta: ParamMeta,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NestedParamSpec {
    pub parent: String,
    pub param: ParamSpec,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocTarget {
    Action(String),
    Scope(String),
    Sort(String),
}

/// Immutable once built. Registered under its unique context key.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiDoc {
    context: String,
    resource_type: String,
    target: Option<DocTarget>,
    is_public: bool,
    params: Vec<ParamSpec>,
    nested_params: Vec<NestedParamSpec>,
    attributes: Map<String, Value>,
}

impl ApiDoc {
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn target(&self) -> Option<&DocTarget> {
        self.target.as_ref()
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn nested_params(&self) -> &[NestedParamSpec] {
        &self.nested_params
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// The only declared param, if there is exactly one.
    pub fn single_param(&self) -> Option<&ParamSpec> {
        match self.params.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// String form of a typed or generic attribute, for equality matching.
    pub fn attribute(&self, key: &str) -> Option<String> {
        match (key, &self.target) {
            ("context", _) => Some(self.context.clone()),
            ("resource_type", _) => Some(self.resource_type.clone()),
            ("is_public", _) => Some(self.is_public.to_string()),
            ("action", Some(DocTarget::Action(n)))
            | ("scope", Some(DocTarget::Scope(n)))
            | ("sort", Some(DocTarget::Sort(n))) => Some(n.clone()),
            ("action" | "scope" | "sort", _) => None,
            _ => self.attributes.get(key).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        }
    }

    fn matches(&self, attrs: &[(&str, &str)]) -> bool {
        attrs
            .iter()
            .all(|(k, v)| self.attribute(k).as_deref() == Some(*v))
    }
}

/// Builds an [`ApiDoc`]. Context defaults to `<Type>.action.<name>`, `<Type>.scope.<name>` or `<Type>.sort.<name>`.
#[derive(Clone, Debug)]
pub struct ApiDocBuilder {
    resource_type: String,
    context: Option<String>,
    target: Option<DocTarget>,
    is_public: bool,
    params: Vec<ParamSpec>,
    nested_params: Vec<NestedParamSpec>,
    attributes: Map<String, Value>,
}

impl ApiDocBuilder {
    pub fn new(resource_type: impl Into<String>) -> Self {
        ApiDocBuilder {
            resource_type: resource_type.into(),
            context: None,
            target: None,
            is_public: false,
            params: Vec::new(),
            nested_params: Vec::new(),
            attributes: Map::new(),
        }
    }

    pub fn action(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(resource_type).target(DocTarget::Action(name.into()))
    }

    pub fn scope(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(resource_type).target(DocTarget::Scope(name.into()))
    }

    pub fn sort(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(resource_type).target(DocTarget::Sort(name.into()))
    }

    /// Public action doc.
    pub fn publish_action(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::action(resource_type, name).publish()
    }

    /// Public filter doc.
    pub fn publish_scope(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::scope(resource_type, name).publish()
    }

    /// Public sort doc.
    pub fn publish_sort(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::sort(resource_type, name).publish()
    }

    pub fn target(mut self, target: DocTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn publish(mut self) -> Self {
        self.is_public = true;
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn param(self, name: impl Into<String>, param_type: ParamType) -> Self {
        self.param_with(name, param_type, None, ParamMeta::default())
    }

    pub fn param_with(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: Option<&str>,
        meta: ParamMeta,
    ) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            param_type,
            description: description.map(String::from),
            meta,
        });
        self
    }

    pub fn nested_param(
        mut self,
        parent: impl Into<String>,
        name: impl Into<String>,
        param_type: ParamType,
        meta: ParamMeta,
    ) -> Self {
        self.nested_params.push(NestedParamSpec {
            parent: parent.into(),
            param: ParamSpec {
                name: name.into(),
                param_type,
                description: None,
                meta,
            },
        });
        self
    }

    /// Set a well-known key (`context`, `action`, `scope`, `sort`, `is_public`) or, failing that, a generic attribute.
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let as_string = || match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match key {
            "context" => self.context = Some(as_string()),
            "action" => self.target = Some(DocTarget::Action(as_string())),
            "scope" => self.target = Some(DocTarget::Scope(as_string())),
            "sort" => self.target = Some(DocTarget::Sort(as_string())),
            "is_public" => self.is_public = value.as_bool().unwrap_or(as_string() == "true"),
            _ => {
                self.attributes.insert(key.to_string(), value);
            }
        }
        self
    }

    /// Generic attribute, never interpreted.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<ApiDoc, ConfigError> {
        let context = match (self.context, &self.target) {
            (Some(c), _) => c,
            (None, Some(DocTarget::Action(n))) => format!("{}.action.{}", self.resource_type, n),
            (None, Some(DocTarget::Scope(n))) => format!("{}.scope.{}", self.resource_type, n),
            (None, Some(DocTarget::Sort(n))) => format!("{}.sort.{}", self.resource_type, n),
            (None, None) => return Err(ConfigError::MissingContext(self.resource_type)),
        };
        Ok(ApiDoc {
            context,
            resource_type: self.resource_type,
            target: self.target,
            is_public: self.is_public,
            params: self.params,
            nested_params: self.nested_params,
            attributes: self.attributes,
        })
    }
}

/// Read-mostly table of docs keyed by unique context; scans are linear over a small set.
#[derive(Debug, Default)]
pub struct DocRegistry {
    docs: Vec<Arc<ApiDoc>>,
    by_context: HashMap<String, usize>,
}

impl DocRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, doc: ApiDoc) -> Result<Arc<ApiDoc>, ConfigError> {
        if self.by_context.contains_key(doc.context()) {
            return Err(ConfigError::DuplicateDoc(doc.context().to_string()));
        }
        let doc = Arc::new(doc);
        self.by_context.insert(doc.context().to_string(), self.docs.len());
        self.docs.push(doc.clone());
        Ok(doc)
    }

    /// Public, parameterless filter docs for each name.
    pub fn publish_scopes(&mut self, resource_type: &str, names: &[&str]) -> Result<(), ConfigError> {
        for name in names {
            self.register(ApiDocBuilder::publish_scope(resource_type, *name).build()?)?;
        }
        Ok(())
    }

    pub fn publish_sorts(&mut self, resource_type: &str, names: &[&str]) -> Result<(), ConfigError> {
        for name in names {
            self.register(ApiDocBuilder::publish_sort(resource_type, *name).build()?)?;
        }
        Ok(())
    }

    pub fn get(&self, context: &str) -> Option<&ApiDoc> {
        self.by_context.get(context).map(|&i| self.docs[i].as_ref())
    }

    /// Docs of `resource_type` whose attributes equal every given pair, in registration order.
    pub fn find_docs(&self, resource_type: &str, attrs: &[(&str, &str)]) -> Vec<&ApiDoc> {
        self.docs
            .iter()
            .map(|d| d.as_ref())
            .filter(|d| d.resource_type == resource_type && d.matches(attrs))
            .collect()
    }

    pub fn find_scope(&self, resource_type: &str, name: &str) -> Option<&ApiDoc> {
        self.find_docs(resource_type, &[("scope", name), ("is_public", "true")])
            .into_iter()
            .next()
    }

    pub fn find_sort(&self, resource_type: &str, name: &str) -> Option<&ApiDoc> {
        self.find_docs(resource_type, &[("sort", name), ("is_public", "true")])
            .into_iter()
            .next()
    }

    pub fn find_action(&self, resource_type: &str, name: &str) -> Option<&ApiDoc> {
        self.find_docs(resource_type, &[("action", name)]).into_iter().next()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}
