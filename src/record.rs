//! Resource records: attribute map plus per-record meta and validation errors.

use crate::response::ErrorObject;
use serde_json::{Map, Value};

/// One attribute-scoped validation failure.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationError {
    pub attribute: String,
    /// Machine name of the failed validation, e.g. `blank` or `taken`.
    pub error: String,
    pub message: String,
    pub options: Map<String, Value>,
}

impl ValidationError {
    pub fn new(attribute: impl Into<String>, error: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError {
            attribute: attribute.into(),
            error: error.into(),
            message: message.into(),
            options: Map::new(),
        }
    }

    /// "Email is invalid" for attribute `email` and message "is invalid"; capitalised messages are kept as-is.
    pub fn full_message(&self) -> String {
        let starts_upper = self
            .message
            .chars()
            .next()
            .map(char::is_uppercase)
            .unwrap_or(false);
        if starts_upper {
            return self.message.clone();
        }
        format!("{} {}", humanize(&self.attribute), self.message)
    }

    pub fn to_error_object(&self) -> ErrorObject {
        let mut meta = Map::new();
        meta.insert("validation_error".into(), Value::String(self.error.clone()));
        meta.insert("validation_options".into(), Value::Object(self.options.clone()));
        meta.insert("attribute".into(), Value::String(self.attribute.clone()));
        ErrorObject {
            detail: Some(self.full_message()),
            code: Some("RecordInvalid".into()),
            status: Some("400".into()),
            meta,
        }
    }
}

fn humanize(attribute: &str) -> String {
    let spaced = attribute.trim_end_matches("_id").replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    pub resource_type: String,
    pub attributes: Map<String, Value>,
    /// Serialized alongside the record; never persisted.
    pub meta: Map<String, Value>,
    pub errors: Vec<ValidationError>,
}

impl Record {
    /// Blank, unsaved instance of a resource type.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Record {
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    pub fn with_attributes(resource_type: impl Into<String>, attributes: Map<String, Value>) -> Self {
        Record {
            resource_type: resource_type.into(),
            attributes,
            ..Default::default()
        }
    }

    pub fn id(&self) -> Option<&Value> {
        self.attributes.get("id").filter(|v| !v.is_null())
    }

    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Copy the listed fields present in `data`, trimming strings unless `strip` is false.
    pub fn update_fields_from(&mut self, data: &Map<String, Value>, fields: &[&str], strip: bool) {
        for field in fields {
            let Some(val) = data.get(*field) else { continue };
            let val = match val {
                Value::String(s) if strip => Value::String(s.trim().to_string()),
                other => other.clone(),
            };
            self.attributes.insert((*field).to_string(), val);
        }
    }

    pub fn add_error(&mut self, attribute: impl Into<String>, error: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError::new(attribute, error, message));
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }

    pub fn error_message(&self) -> Option<String> {
        self.errors.first().map(|e| e.message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_fields_from_strips_strings() {
        let data = json!({"name": "  Ada ", "email": " a@b.c", "role": "admin"});
        let mut rec = Record::new("User");
        rec.update_fields_from(data.as_object().unwrap(), &["name", "email", "missing"], true);
        assert_eq!(rec.get("name"), Some(&json!("Ada")));
        assert_eq!(rec.get("email"), Some(&json!("a@b.c")));
        assert!(rec.get("role").is_none());
        assert!(rec.get("missing").is_none());

        rec.update_fields_from(data.as_object().unwrap(), &["name"], false);
        assert_eq!(rec.get("name"), Some(&json!("  Ada ")));
    }

    #[test]
    fn validation_error_object_carries_attribute() {
        let err = ValidationError::new("first_name", "blank", "can't be blank");
        let obj = err.to_error_object();
        assert_eq!(obj.detail.as_deref(), Some("First name can't be blank"));
        assert_eq!(obj.code.as_deref(), Some("RecordInvalid"));
        assert_eq!(obj.status.as_deref(), Some("400"));
        assert_eq!(obj.meta.get("attribute"), Some(&json!("first_name")));
        assert_eq!(obj.meta.get("validation_error"), Some(&json!("blank")));

        let err = ValidationError::new("email", "taken", "Email already registered");
        assert_eq!(err.full_message(), "Email already registered");
    }

    #[test]
    fn new_records_have_no_id() {
        let mut rec = Record::new("User");
        assert!(rec.is_new());
        rec.set("id", 7);
        assert!(!rec.is_new());
        rec.add_error("name", "blank", "can't be blank");
        assert!(!rec.is_valid());
        assert_eq!(rec.error_message().as_deref(), Some("can't be blank"));
    }
}
