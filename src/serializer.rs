//! Record serializers with named field presets.
//!
//! Every serializer starts with `basic` (attributes) and `full` (attributes and relationships);
//! `default` resolves to `basic` until declared. Requested fieldsets may splice presets in with
//! `...name` markers, a bare `...` meaning `default`.

use crate::case::to_snake_case;
use crate::error::ConfigError;
use crate::record::Record;
use serde_json::{Map, Value};
use std::collections::HashMap;

const DEFAULT_PRESET: &str = "default";
const MARKER: &str = "...";

/// Preset definition: a literal field list, or a composition of other presets.
#[derive(Clone, Debug, PartialEq)]
pub enum PresetSpec {
    Fields(Vec<String>),
    /// `with` names presets (or `attributes` / `relationships`); `fields` are appended, `exclude` removed.
    Compose {
        with: Vec<String>,
        fields: Vec<String>,
        exclude: Vec<String>,
    },
}

impl PresetSpec {
    pub fn fields(fields: &[&str]) -> Self {
        PresetSpec::Fields(to_strings(fields))
    }

    pub fn with(presets: &[&str]) -> Self {
        PresetSpec::Compose {
            with: to_strings(presets),
            fields: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Everything but the given fields.
    pub fn except(exclude: &[&str]) -> Self {
        PresetSpec::Compose {
            with: Vec::new(),
            fields: Vec::new(),
            exclude: to_strings(exclude),
        }
    }

    pub fn plus(self, extra: &[&str]) -> Self {
        match self {
            PresetSpec::Fields(mut list) => {
                list.extend(to_strings(extra));
                PresetSpec::Fields(list)
            }
            PresetSpec::Compose { with, mut fields, exclude } => {
                fields.extend(to_strings(extra));
                PresetSpec::Compose { with, fields, exclude }
            }
        }
    }

    pub fn minus(self, removed: &[&str]) -> Self {
        match self {
            PresetSpec::Fields(list) => PresetSpec::Compose {
                with: Vec::new(),
                fields: list,
                exclude: to_strings(removed),
            },
            PresetSpec::Compose { with, fields, mut exclude } => {
                exclude.extend(to_strings(removed));
                PresetSpec::Compose { with, fields, exclude }
            }
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn push_unique(out: &mut Vec<String>, items: impl IntoIterator<Item = String>) {
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
}

/// Preset named by a splice marker, if `token` is one.
fn marker_preset(token: &str) -> Option<&str> {
    let name = token.strip_prefix(MARKER)?;
    Some(match name {
        "" | "default" | "defaults" => DEFAULT_PRESET,
        other => other,
    })
}

#[derive(Clone, Debug)]
pub struct Serializer {
    name: String,
    resource_type: String,
    attributes: Vec<String>,
    relationships: Vec<String>,
    presets: HashMap<String, Vec<String>>,
}

impl Serializer {
    pub fn new(resource_type: impl Into<String>, attributes: &[&str]) -> Self {
        let resource_type = resource_type.into();
        Serializer {
            name: format!("{}Serializer", resource_type),
            resource_type,
            attributes: to_strings(attributes),
            relationships: Vec::new(),
            presets: HashMap::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn relationships(mut self, relationships: &[&str]) -> Self {
        self.relationships = to_strings(relationships);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Serializer for a subtype: a copy of this one, presets included, that can be overridden freely.
    pub fn inherit(&self, resource_type: impl Into<String>) -> Self {
        let resource_type = resource_type.into();
        Serializer {
            name: format!("{}Serializer", resource_type),
            resource_type,
            ..self.clone()
        }
    }

    /// Declare a preset. Referenced presets must already resolve.
    pub fn preset(mut self, name: &str, spec: PresetSpec) -> Result<Self, ConfigError> {
        let fields = match spec {
            PresetSpec::Fields(list) => {
                let mut out = Vec::new();
                push_unique(&mut out, list);
                out
            }
            PresetSpec::Compose { with, fields, exclude } => {
                let mut out = Vec::new();
                for base in &with {
                    let resolved = match base.as_str() {
                        "attributes" => self.attributes.clone(),
                        "relationships" => self.relationships.clone(),
                        preset => self.preset_fields(preset).ok_or_else(|| self.unknown_preset(preset))?,
                    };
                    push_unique(&mut out, resolved);
                }
                if with.is_empty() && fields.is_empty() {
                    push_unique(&mut out, self.attributes.iter().chain(&self.relationships).cloned());
                }
                push_unique(&mut out, fields);
                out.retain(|f| !exclude.contains(f));
                out
            }
        };
        self.presets.insert(name.to_string(), fields);
        Ok(self)
    }

    pub fn preset_fields(&self, name: &str) -> Option<Vec<String>> {
        if let Some(fields) = self.presets.get(name) {
            return Some(fields.clone());
        }
        match name {
            "basic" => Some(self.attributes.clone()),
            "full" => {
                let mut out = self.attributes.clone();
                push_unique(&mut out, self.relationships.iter().cloned());
                Some(out)
            }
            DEFAULT_PRESET => self.preset_fields("basic"),
            _ => None,
        }
    }

    fn unknown_preset(&self, preset: &str) -> ConfigError {
        ConfigError::UnknownPreset {
            preset: preset.to_string(),
            resource: self.resource_type.clone(),
        }
    }

    /// Effective field list. No fields means the default preset; markers are replaced in place
    /// by their preset's fields. Duplicates keep their first position.
    pub fn resolve_fieldset(&self, fields: Option<&[String]>) -> Result<Vec<String>, ConfigError> {
        let fields = match fields {
            Some(fields) if !fields.is_empty() => fields,
            _ => return self.preset_fields(DEFAULT_PRESET).ok_or_else(|| self.unknown_preset(DEFAULT_PRESET)),
        };
        let mut out = Vec::new();
        for token in fields {
            match marker_preset(token) {
                Some(preset) => {
                    let resolved = self.preset_fields(preset).ok_or_else(|| self.unknown_preset(preset))?;
                    push_unique(&mut out, resolved);
                }
                None => push_unique(&mut out, [token.clone()]),
            }
        }
        Ok(out)
    }

    /// `{id, type, attributes, relationships, meta}` limited to `fields`.
    pub fn render(&self, record: &Record, fields: &[String]) -> Value {
        let mut attributes = Map::new();
        let mut relationships = Map::new();
        for field in fields {
            if self.relationships.contains(field) {
                let data = record.get(field).cloned().unwrap_or(Value::Null);
                let mut rel = Map::new();
                rel.insert("data".into(), data);
                relationships.insert(field.clone(), Value::Object(rel));
            } else if field != "id" {
                let value = record.get(field).cloned().unwrap_or(Value::Null);
                attributes.insert(field.clone(), value);
            }
        }

        let mut out = Map::new();
        out.insert("id".into(), id_string(record));
        out.insert("type".into(), Value::String(to_snake_case(&record.resource_type)));
        out.insert("attributes".into(), Value::Object(attributes));
        if !relationships.is_empty() {
            out.insert("relationships".into(), Value::Object(relationships));
        }
        if let Some(meta) = record_meta(record) {
            out.insert("meta".into(), meta);
        }
        Value::Object(out)
    }
}

fn id_string(record: &Record) -> Value {
    match record.id() {
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(other) => Value::String(other.to_string()),
        None => Value::Null,
    }
}

/// The record's own meta plus its validation errors, if there is anything to say.
fn record_meta(record: &Record) -> Option<Value> {
    let mut meta = record.meta.clone();
    if !record.errors.is_empty() {
        let errors: Vec<Value> = record
            .errors
            .iter()
            .filter_map(|e| serde_json::to_value(e.to_error_object()).ok())
            .collect();
        meta.insert("errors".into(), Value::Array(errors));
    }
    (!meta.is_empty()).then_some(Value::Object(meta))
}

/// Rendering for types without a serializer: the attributes as they are, plus meta.
pub fn render_plain(record: &Record) -> Value {
    let mut out = record.attributes.clone();
    if let Some(meta) = record_meta(record) {
        out.insert("meta".into(), meta);
    }
    Value::Object(out)
}

#[derive(Debug, Default)]
pub struct SerializerRegistry {
    by_type: HashMap<String, Serializer>,
    names: HashMap<String, String>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, serializer: Serializer) -> Result<(), ConfigError> {
        let resource_type = serializer.resource_type.clone();
        if self.by_type.contains_key(&resource_type) || self.names.contains_key(&serializer.name) {
            return Err(ConfigError::DuplicateRegistration {
                kind: "serializer",
                resource: resource_type,
            });
        }
        self.names.insert(serializer.name.clone(), resource_type.clone());
        self.by_type.insert(resource_type, serializer);
        Ok(())
    }

    pub fn for_type(&self, resource_type: &str) -> Option<&Serializer> {
        self.by_type.get(resource_type)
    }

    pub fn by_name(&self, name: &str) -> Option<&Serializer> {
        self.names.get(name).and_then(|rt| self.by_type.get(rt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        to_strings(items)
    }

    fn user() -> Serializer {
        Serializer::new("User", &["name", "email", "created_at"])
            .relationships(&["posts"])
            .preset("default", PresetSpec::fields(&["name", "email"]))
            .unwrap()
    }

    #[test]
    fn splices_default_in_place() {
        let s = user();
        let fields = strings(&["...default", "created_at"]);
        assert_eq!(
            s.resolve_fieldset(Some(&fields)).unwrap(),
            strings(&["name", "email", "created_at"])
        );
        let fields = strings(&["created_at", "...", "name"]);
        assert_eq!(
            s.resolve_fieldset(Some(&fields)).unwrap(),
            strings(&["created_at", "name", "email"])
        );
        assert_eq!(s.resolve_fieldset(None).unwrap(), strings(&["name", "email"]));
    }

    #[test]
    fn unknown_preset_is_a_config_error() {
        let s = user();
        let fields = strings(&["...summary"]);
        assert!(matches!(
            s.resolve_fieldset(Some(&fields)),
            Err(ConfigError::UnknownPreset { .. })
        ));
        let err = Serializer::new("User", &["name"])
            .preset("x", PresetSpec::with(&["missing"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPreset { .. }));
    }

    #[test]
    fn compositions_resolve_against_declared_presets() {
        let s = user()
            .preset("summary", PresetSpec::with(&["default"]).plus(&["posts"]))
            .unwrap()
            .preset("private", PresetSpec::except(&["email", "posts"]))
            .unwrap();
        assert_eq!(s.preset_fields("summary"), Some(strings(&["name", "email", "posts"])));
        assert_eq!(s.preset_fields("private"), Some(strings(&["name", "created_at"])));
        assert_eq!(s.preset_fields("full"), Some(strings(&["name", "email", "created_at", "posts"])));
    }

    #[test]
    fn subtypes_copy_then_override() {
        let base = user();
        let admin = base
            .inherit("Admin")
            .preset("default", PresetSpec::with(&["default"]).plus(&["created_at"]))
            .unwrap();
        assert_eq!(admin.name(), "AdminSerializer");
        assert_eq!(admin.preset_fields("default"), Some(strings(&["name", "email", "created_at"])));
        assert_eq!(base.preset_fields("default"), Some(strings(&["name", "email"])));
    }

    #[test]
    fn renders_fields_relationships_and_meta() {
        let s = user();
        let mut record = Record::with_attributes(
            "User",
            json!({"id": 3, "name": "Ada", "email": "a@b.c", "posts": [1, 2]})
                .as_object()
                .cloned()
                .unwrap(),
        );
        record.add_error("email", "taken", "has already been taken");
        let out = s.render(&record, &strings(&["name", "posts"]));
        assert_eq!(out["id"], json!("3"));
        assert_eq!(out["type"], json!("user"));
        assert_eq!(out["attributes"], json!({"name": "Ada"}));
        assert_eq!(out["relationships"], json!({"posts": {"data": [1, 2]}}));
        assert_eq!(out["meta"]["errors"][0]["detail"], json!("Email has already been taken"));
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut reg = SerializerRegistry::new();
        reg.register(user()).unwrap();
        assert!(reg.register(user().named("Other")).is_err());
        assert!(reg.by_name("UserSerializer").is_some());
        assert!(reg.for_type("Post").is_none());
    }
}
