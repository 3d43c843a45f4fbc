//! Parameter coercion against declared [`ParamType`]s.

use crate::documentation::{ApiDoc, DocRegistry, ParamSpec, ParamType};
use crate::error::{ApiError, RequestError};
use crate::logging::log_exception;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot coerce {value} to {expected}")]
pub struct CoercionError {
    pub value: Value,
    pub expected: &'static str,
}

fn fail(value: &Value, expected: &'static str) -> CoercionError {
    CoercionError {
        value: value.clone(),
        expected,
    }
}

/// Null, empty or whitespace-only strings, and empty collections.
pub fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Non-blank strings are JSON-decoded when they parse; everything else passes through.
pub fn decode_structured(value: Value) -> Value {
    match value {
        Value::String(s) if !s.trim().is_empty() => match serde_json::from_str(&s) {
            Ok(decoded) => decoded,
            Err(_) => Value::String(s),
        },
        other => other,
    }
}

/// `true`, `"true"`, `1`, `"1"` and `"t"` are true; blank (but not `false`) is null; anything else is false.
pub fn parse_bool(v: &Value) -> Result<Value, CoercionError> {
    if !matches!(v, Value::Bool(false)) && is_blank(v) {
        return Ok(Value::Null);
    }
    let truthy = match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => matches!(s.as_str(), "true" | "1" | "t"),
        _ => false,
    };
    Ok(Value::Bool(truthy))
}

pub fn parse_integer(v: &Value) -> Result<Value, CoercionError> {
    if is_blank(v) {
        return Ok(Value::Null);
    }
    match v {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::from(i)),
            None => n.as_f64().map(|f| Value::from(f.trunc() as i64)).ok_or_else(|| fail(v, "integer")),
        },
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Value::from(i));
            }
            s.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| Value::from(f.trunc() as i64))
                .ok_or_else(|| fail(v, "integer"))
        }
        _ => Err(fail(v, "integer")),
    }
}

pub fn parse_float(v: &Value) -> Result<Value, CoercionError> {
    if is_blank(v) {
        return Ok(Value::Null);
    }
    let f = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    f.and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| fail(v, "float"))
}

pub fn parse_string(v: &Value) -> Result<Value, CoercionError> {
    Ok(match v {
        Value::Null => Value::Null,
        Value::String(_) => v.clone(),
        other => Value::String(other.to_string()),
    })
}

fn parse_datetime_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// RFC 3339 (UTC, seconds precision). Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, dates and epoch seconds.
pub fn parse_time(v: &Value) -> Result<Value, CoercionError> {
    if is_blank(v) {
        return Ok(Value::Null);
    }
    let dt = match v {
        Value::String(s) => parse_datetime_str(s),
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    };
    dt.map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true)))
        .ok_or_else(|| fail(v, "time"))
}

/// `YYYY-MM-DD`. Accepts dates and anything [`parse_time`] accepts as a string.
pub fn parse_date(v: &Value) -> Result<Value, CoercionError> {
    if is_blank(v) {
        return Ok(Value::Null);
    }
    let date = match v {
        Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .ok()
            .or_else(|| parse_datetime_str(s).map(|dt| dt.date_naive())),
        _ => None,
    };
    date.map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
        .ok_or_else(|| fail(v, "date"))
}

pub fn parse_value_with_type(v: &Value, param_type: ParamType) -> Result<Value, CoercionError> {
    match param_type {
        ParamType::Integer => parse_integer(v),
        ParamType::String => parse_string(v),
        ParamType::Date => parse_date(v),
        ParamType::Float => parse_float(v),
        ParamType::Time => parse_time(v),
        ParamType::Bool => parse_bool(v),
        ParamType::Any => Ok(v.clone()),
    }
}

fn coerce_param(param: &ParamSpec, v: &Value) -> Result<Value, CoercionError> {
    if !param.meta.array {
        return parse_value_with_type(v, param.param_type);
    }
    let items: Vec<&Value> = match v {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| parse_value_with_type(item, param.param_type))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn invalid(name: &str, err: CoercionError) -> ApiError {
    log_exception(&ApiError::other(err), false, None);
    ApiError::Request(
        RequestError::invalid_param(format!("Param '{}' could not be parsed.", name)).with_meta("attribute", name),
    )
}

/// Coerce every declared param present in `params`. Only declared params appear in the result.
pub fn process_params_with_api_doc(params: &Map<String, Value>, doc: &ApiDoc) -> Result<Map<String, Value>, ApiError> {
    let mut out = Map::new();
    for param in doc.params() {
        let Some(v) = params.get(&param.name) else { continue };
        let coerced = coerce_param(param, v).map_err(|e| invalid(&param.name, e))?;
        out.insert(param.name.clone(), coerced);
    }
    for nested in doc.nested_params() {
        let Some(Value::Object(parent)) = params.get(&nested.parent) else { continue };
        let Some(v) = parent.get(&nested.param.name) else { continue };
        let label = format!("{}.{}", nested.parent, nested.param.name);
        let coerced = coerce_param(&nested.param, v).map_err(|e| invalid(&label, e))?;
        let slot = out
            .entry(nested.parent.clone())
            .or_insert_with(|| Value::Object(parent.clone()));
        if let Value::Object(m) = slot {
            m.insert(nested.param.name.clone(), coerced);
        }
    }
    Ok(out)
}

/// [`process_params_with_api_doc`] for the doc registered under `context`.
pub fn process_params_with_context(
    params: &Map<String, Value>,
    docs: &DocRegistry,
    context: &str,
) -> Result<Map<String, Value>, ApiError> {
    let doc = docs.get(context).ok_or_else(|| {
        ApiError::Request(RequestError::api(
            "Could not properly parse parameters, context not found.",
        ))
    })?;
    process_params_with_api_doc(params, doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documentation::{ApiDocBuilder, ParamMeta};
    use serde_json::json;

    #[test]
    fn bool_coercion() {
        assert_eq!(parse_bool(&json!("t")).unwrap(), json!(true));
        assert_eq!(parse_bool(&json!(1)).unwrap(), json!(true));
        assert_eq!(parse_bool(&json!("no")).unwrap(), json!(false));
        assert_eq!(parse_bool(&json!(false)).unwrap(), json!(false));
        assert_eq!(parse_bool(&json!("")).unwrap(), Value::Null);
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(parse_integer(&json!("42")).unwrap(), json!(42));
        assert_eq!(parse_integer(&json!(" 7 ")).unwrap(), json!(7));
        assert_eq!(parse_integer(&json!(3.9)).unwrap(), json!(3));
        assert_eq!(parse_integer(&json!("")).unwrap(), Value::Null);
        assert!(parse_integer(&json!("abc")).is_err());
        assert_eq!(parse_float(&json!("1.5")).unwrap(), json!(1.5));
        assert_eq!(parse_string(&json!(12)).unwrap(), json!("12"));
    }

    #[test]
    fn time_and_date_coercion() {
        assert_eq!(
            parse_time(&json!("2024-03-01 10:20:30")).unwrap(),
            json!("2024-03-01T10:20:30Z")
        );
        assert_eq!(
            parse_time(&json!("2024-03-01T10:20:30+02:00")).unwrap(),
            json!("2024-03-01T08:20:30Z")
        );
        assert_eq!(parse_time(&json!(0)).unwrap(), json!("1970-01-01T00:00:00Z"));
        assert_eq!(parse_date(&json!("2024-03-01T23:00:00Z")).unwrap(), json!("2024-03-01"));
        assert!(parse_date(&json!("yesterday")).is_err());
    }

    #[test]
    fn decode_structured_keeps_plain_strings() {
        assert_eq!(decode_structured(json!("{\"a\":1}")), json!({"a": 1}));
        assert_eq!(decode_structured(json!("open")), json!("open"));
        assert_eq!(decode_structured(json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn process_params_coerces_declared_only() {
        let doc = ApiDocBuilder::action("Ticket", "assign")
            .param("user_id", ParamType::Integer)
            .param_with("tags", ParamType::String, None, ParamMeta::new().array())
            .nested_param("window", "from", ParamType::Date, ParamMeta::new())
            .build()
            .unwrap();
        let params = json!({
            "user_id": "12",
            "tags": 5,
            "note": "kept out",
            "window": {"from": "2024-01-02T05:00:00Z", "to": "x"}
        });
        let out = process_params_with_api_doc(params.as_object().unwrap(), &doc).unwrap();
        assert_eq!(
            Value::Object(out),
            json!({"user_id": 12, "tags": ["5"], "window": {"from": "2024-01-02", "to": "x"}})
        );
    }

    #[test]
    fn coercion_failure_names_the_param() {
        let doc = ApiDocBuilder::action("Ticket", "assign")
            .param("user_id", ParamType::Integer)
            .build()
            .unwrap();
        let params = json!({"user_id": "twelve"});
        let err = process_params_with_api_doc(params.as_object().unwrap(), &doc).unwrap_err();
        let req = err.as_request().unwrap();
        assert_eq!(req.message(), "Param 'user_id' could not be parsed.");
        assert_eq!(req.status(), 400);
        assert_eq!(req.meta().get("attribute"), Some(&json!("user_id")));
    }
}
