//! Result envelope carried through the pipeline, and normalization of its errors into wire form.

use crate::config::ErrorTransform;
use crate::error::{ApiError, RequestError};
use crate::record::Record;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical wire form of one error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

/// The error shapes an envelope may carry.
#[derive(Debug)]
pub enum ResponseError {
    Api(ApiError),
    /// Hand-built `{message|detail, code, status, meta}` map.
    Map(Map<String, Value>),
    /// Already in wire form, e.g. a record's validation error.
    Object(ErrorObject),
    Message(String),
}

impl From<ApiError> for ResponseError {
    fn from(err: ApiError) -> Self {
        ResponseError::Api(err)
    }
}

impl From<RequestError> for ResponseError {
    fn from(err: RequestError) -> Self {
        ResponseError::Api(ApiError::Request(err))
    }
}

impl From<String> for ResponseError {
    fn from(msg: String) -> Self {
        ResponseError::Message(msg)
    }
}

impl From<&str> for ResponseError {
    fn from(msg: &str) -> Self {
        ResponseError::Message(msg.to_string())
    }
}

impl From<Map<String, Value>> for ResponseError {
    fn from(map: Map<String, Value>) -> Self {
        ResponseError::Map(map)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EnvelopeData {
    One(Record),
    Many(Vec<Record>),
    Value(Value),
}

impl EnvelopeData {
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            EnvelopeData::One(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_records(&self) -> Option<&[Record]> {
        match self {
            EnvelopeData::Many(r) => Some(r),
            _ => None,
        }
    }

    /// Resource type of the record(s), if the data holds any.
    pub fn resource_type(&self) -> Option<&str> {
        match self {
            EnvelopeData::One(r) => Some(r.resource_type.as_str()),
            EnvelopeData::Many(rs) => rs.first().map(|r| r.resource_type.as_str()),
            EnvelopeData::Value(_) => None,
        }
    }
}

impl From<Record> for EnvelopeData {
    fn from(r: Record) -> Self {
        EnvelopeData::One(r)
    }
}

impl From<Vec<Record>> for EnvelopeData {
    fn from(r: Vec<Record>) -> Self {
        EnvelopeData::Many(r)
    }
}

impl From<Value> for EnvelopeData {
    fn from(v: Value) -> Self {
        EnvelopeData::Value(v)
    }
}

/// `{success, data, error|errors, meta}` as produced by responders.
#[derive(Debug, Default)]
pub struct ResultEnvelope {
    pub success: bool,
    pub data: Option<EnvelopeData>,
    pub error: Option<ResponseError>,
    pub errors: Vec<ResponseError>,
    pub meta: Map<String, Value>,
}

impl ResultEnvelope {
    pub fn ok(data: impl Into<EnvelopeData>) -> Self {
        ResultEnvelope {
            success: true,
            data: Some(data.into()),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<ResponseError>) -> Self {
        ResultEnvelope {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Unsuccessful save: the record as data, one error per validation failure.
    pub fn invalid(record: Record) -> Self {
        let errors = record
            .errors
            .iter()
            .map(|e| ResponseError::Object(e.to_error_object()))
            .collect();
        ResultEnvelope {
            success: false,
            data: Some(EnvelopeData::One(record)),
            errors,
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: impl Into<EnvelopeData>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// True when a hand-built value already has envelope keys.
    pub fn looks_like_envelope(value: &Value) -> bool {
        value
            .as_object()
            .map(|m| ["success", "data", "error"].iter().any(|k| m.contains_key(*k)))
            .unwrap_or(false)
    }

    /// Wraps a raw handler value: envelope-looking maps are unpacked, anything else becomes `{success: true, data}`.
    pub fn from_value(value: Value) -> Self {
        if !Self::looks_like_envelope(&value) {
            return Self::ok(value);
        }
        let Value::Object(mut map) = value else {
            return Self::ok(Value::Null);
        };
        let success = map.get("success").and_then(Value::as_bool).unwrap_or(false);
        let data = map.get_mut("data").map(Value::take).filter(|v| !v.is_null());
        let error = map.get_mut("error").map(Value::take).and_then(error_from_value);
        let errors = match map.get_mut("errors").map(Value::take) {
            Some(Value::Array(items)) => items.into_iter().filter_map(error_from_value).collect(),
            _ => Vec::new(),
        };
        let meta = match map.get_mut("meta").map(Value::take) {
            Some(Value::Object(m)) => m,
            _ => Map::new(),
        };
        ResultEnvelope {
            success,
            data: data.map(EnvelopeData::Value),
            error,
            errors,
            meta,
        }
    }

    /// Errors in render order: the `errors` list, then `error`.
    pub fn all_errors(&self) -> impl Iterator<Item = &ResponseError> {
        self.errors.iter().chain(self.error.iter())
    }

    pub fn has_errors(&self) -> bool {
        self.error.is_some() || !self.errors.is_empty()
    }

    /// The captured `error`, else the first of `errors`.
    pub fn into_first_error(self) -> Option<ResponseError> {
        self.error.or_else(|| self.errors.into_iter().next())
    }
}

fn error_from_value(value: Value) -> Option<ResponseError> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(ResponseError::Message(s)),
        Value::Object(m) => Some(ResponseError::Map(m)),
        other => Some(ResponseError::Message(other.to_string())),
    }
}

/// Fallback transform for errors that are not hand-built: structured errors keep their own fields,
/// everything else becomes `{detail: message, code: <kind>, status: "500"}`.
pub fn default_transform(err: &ApiError) -> ErrorObject {
    match err {
        ApiError::Request(e) => e.to_error_object(),
        ApiError::Db(sqlx::Error::RowNotFound) => RequestError::not_found().to_error_object(),
        other => ErrorObject {
            detail: Some(other.to_string()),
            code: Some(other.kind_name().to_string()),
            status: Some("500".into()),
            meta: Map::new(),
        },
    }
}

fn value_to_status(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn normalize_one(err: &ResponseError, transform: Option<&ErrorTransform>) -> ErrorObject {
    match err {
        ResponseError::Message(m) => ErrorObject {
            detail: Some(m.clone()),
            ..Default::default()
        },
        ResponseError::Object(obj) => obj.clone(),
        ResponseError::Map(m) => ErrorObject {
            detail: m
                .get("message")
                .or_else(|| m.get("detail"))
                .and_then(Value::as_str)
                .map(String::from),
            code: m.get("code").and_then(Value::as_str).map(String::from),
            status: m.get("status").and_then(value_to_status),
            meta: m
                .get("meta")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        },
        ResponseError::Api(e @ ApiError::Request(_)) => default_transform(e),
        ResponseError::Api(e) => match transform {
            Some(t) => t(e),
            None => default_transform(e),
        },
    }
}

/// Normalize every error of the envelope and pick the response status.
///
/// Success renders 200. A failure takes the status of the first error that carried one, else 500.
pub fn normalize_errors(
    envelope: &ResultEnvelope,
    transform: Option<&ErrorTransform>,
) -> (Vec<ErrorObject>, StatusCode) {
    let mut first_status: Option<String> = None;
    let objects: Vec<ErrorObject> = envelope
        .all_errors()
        .map(|err| {
            let mut obj = normalize_one(err, transform);
            if first_status.is_none() {
                first_status = obj.status.clone();
            }
            obj.code.get_or_insert_with(|| "APIError".into());
            obj.status.get_or_insert_with(|| "500".into());
            obj
        })
        .collect();
    let status = if envelope.success {
        StatusCode::OK
    } else {
        first_status
            .and_then(|s| s.parse::<u16>().ok())
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    };
    (objects, status)
}
