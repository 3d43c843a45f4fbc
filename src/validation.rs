//! Per-field validation rules, reported as attribute-scoped errors on the record.

use crate::record::Record;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FieldRule {
    pub required: Option<bool>,
    /// `email` or `uuid`.
    pub format: Option<String>,
    pub min_length: Option<u32>,
    pub max_length: Option<u32>,
    pub pattern: Option<String>,
    pub allowed: Option<Vec<Value>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl FieldRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self) -> Self {
        self.required = Some(true);
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn length(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn allowed(mut self, values: Vec<Value>) -> Self {
        self.allowed = Some(values);
        self
    }

    pub fn range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }
}

/// Failure found by a rule: machine name, message, options.
struct Violation(&'static str, String, Map<String, Value>);

fn violation(error: &'static str, message: impl Into<String>) -> Violation {
    Violation(error, message.into(), Map::new())
}

fn counted(error: &'static str, message: String, count: impl Into<Value>) -> Violation {
    let mut options = Map::new();
    options.insert("count".into(), count.into());
    Violation(error, message, options)
}

/// A rule's pattern, compiled when the rule is attached. A broken pattern fails every value.
#[derive(Clone, Debug)]
enum Pattern {
    Compiled(Regex),
    Broken,
}

impl Pattern {
    fn compile(field: &str, pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => Pattern::Compiled(re),
            Err(err) => {
                tracing::warn!(field, pattern, error = %err, "invalid validation pattern");
                Pattern::Broken
            }
        }
    }

    fn is_match(&self, s: &str) -> bool {
        match self {
            Pattern::Compiled(re) => re.is_match(s),
            Pattern::Broken => false,
        }
    }
}

#[derive(Clone, Debug)]
struct CompiledRule {
    field: String,
    rule: FieldRule,
    pattern: Option<Pattern>,
}

/// Ordered rules for one resource type.
#[derive(Clone, Debug, Default)]
pub struct RecordValidator {
    rules: Vec<CompiledRule>,
}

impl RecordValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        let field = name.into();
        let pattern = rule.pattern.as_deref().map(|p| Pattern::compile(&field, p));
        self.rules.push(CompiledRule { field, rule, pattern });
        self
    }

    /// Check every rule against the record's attributes, adding an error per failure. Returns validity.
    pub fn validate(&self, record: &mut Record) -> bool {
        for CompiledRule { field, rule, pattern } in &self.rules {
            let found = match record.get(field) {
                None | Some(Value::Null) => required_violation(rule),
                Some(Value::String(s)) if s.trim().is_empty() => required_violation(rule),
                Some(v) => validate_field(v, rule, pattern.as_ref()),
            };
            if let Some(Violation(error, message, options)) = found {
                record.add_error(field.clone(), error, message);
                if let Some(last) = record.errors.last_mut() {
                    last.options = options;
                }
            }
        }
        record.is_valid()
    }
}

fn required_violation(rule: &FieldRule) -> Option<Violation> {
    (rule.required == Some(true)).then(|| violation("blank", "can't be blank"))
}

fn validate_field(v: &Value, rule: &FieldRule, pattern: Option<&Pattern>) -> Option<Violation> {
    if let Some(format) = &rule.format {
        if !format_matches(v, format) {
            return Some(violation("invalid", "is invalid"));
        }
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length.filter(|max| len > *max as usize) {
            return Some(counted(
                "too_long",
                format!("is too long (maximum is {} characters)", max),
                max,
            ));
        }
        if let Some(min) = rule.min_length.filter(|min| len < *min as usize) {
            return Some(counted(
                "too_short",
                format!("is too short (minimum is {} characters)", min),
                min,
            ));
        }
        if pattern.is_some_and(|p| !p.is_match(s)) {
            return Some(violation("invalid", "is invalid"));
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Some(violation("inclusion", "is not included in the list"));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum.filter(|min| n < *min) {
            return Some(counted(
                "greater_than_or_equal_to",
                format!("must be greater than or equal to {}", min),
                min,
            ));
        }
        if let Some(max) = rule.maximum.filter(|max| n > *max) {
            return Some(counted(
                "less_than_or_equal_to",
                format!("must be less than or equal to {}", max),
                max,
            ));
        }
    }
    None
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(s), Value::String(t)) => s == t,
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn format_matches(v: &Value, format: &str) -> bool {
    let Some(s) = v.as_str() else { return true };
    match format.to_lowercase().as_str() {
        "email" => s.contains('@') && s.len() >= 3,
        "uuid" => uuid::Uuid::parse_str(s).is_ok(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(attrs: Value) -> Record {
        Record::with_attributes("User", attrs.as_object().cloned().unwrap())
    }

    fn validator() -> RecordValidator {
        RecordValidator::new()
            .field("name", FieldRule::new().required().length(Some(2), Some(5)))
            .field("email", FieldRule::new().format("email"))
            .field("role", FieldRule::new().allowed(vec![json!("admin"), json!("member")]))
            .field("age", FieldRule::new().range(Some(0.0), None))
    }

    #[test]
    fn valid_record_has_no_errors() {
        let mut r = record(json!({"name": "Ada", "email": "a@b.c", "role": "admin", "age": 36}));
        assert!(validator().validate(&mut r));
        assert!(r.errors.is_empty());
    }

    #[test]
    fn failures_are_scoped_to_attributes() {
        let mut r = record(json!({"name": " ", "email": "nope", "role": "root", "age": -1}));
        assert!(!validator().validate(&mut r));
        let found: Vec<(&str, &str)> = r
            .errors
            .iter()
            .map(|e| (e.attribute.as_str(), e.error.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("name", "blank"),
                ("email", "invalid"),
                ("role", "inclusion"),
                ("age", "greater_than_or_equal_to"),
            ]
        );
        assert_eq!(r.errors[0].full_message(), "Name can't be blank");
    }

    #[test]
    fn length_errors_carry_count() {
        let mut r = record(json!({"name": "Augusta"}));
        validator().validate(&mut r);
        assert_eq!(r.errors[0].error, "too_long");
        assert_eq!(r.errors[0].options.get("count"), Some(&json!(5)));
    }

    #[test]
    fn pattern_rules() {
        let v = RecordValidator::new().field("code", FieldRule::new().pattern("^[A-Z]{3}$"));
        let mut ok = record(json!({"code": "ABC"}));
        assert!(v.validate(&mut ok));
        let mut bad = record(json!({"code": "abc"}));
        assert!(!v.validate(&mut bad));
    }

    #[test]
    fn patterns_compile_when_the_rule_is_attached() {
        let v = RecordValidator::new().field("code", FieldRule::new().pattern("^[A-Z]{3}$"));
        assert!(matches!(v.rules[0].pattern, Some(Pattern::Compiled(_))));
        assert!(v.rules[0].rule.pattern.is_some());

        let broken = RecordValidator::new().field("code", FieldRule::new().pattern("(["));
        assert!(matches!(broken.rules[0].pattern, Some(Pattern::Broken)));
        let mut r = record(json!({"code": "ABC"}));
        assert!(!broken.validate(&mut r));
        assert_eq!(r.errors[0].error, "invalid");

        let plain = RecordValidator::new().field("code", FieldRule::new().required());
        assert!(plain.rules[0].pattern.is_none());
    }
}
