//! Typed errors and HTTP mapping.

use crate::record::Record;
use crate::response::{ErrorObject, ResponseError};
use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{Map, Value};
use thiserror::Error;

/// Definition-time failures. These indicate a broken setup, not a bad request.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("duplicate endpoint: {method} {path}")]
    DuplicateEndpoint { method: Method, path: String },
    #[error("duplicate api doc context: {0}")]
    DuplicateDoc(String),
    #[error("context not specified for api doc on {0}")]
    MissingContext(String),
    #[error("duplicate {kind} registration for {resource}")]
    DuplicateRegistration { kind: &'static str, resource: String },
    #[error("{kind} {name} could not be found for {resource}")]
    MissingDoc {
        kind: &'static str,
        name: String,
        resource: String,
    },
    #[error("serializer preset {preset} not found for {resource}")]
    UnknownPreset { preset: String, resource: String },
    #[error("no action `{action}` is defined for {resource}")]
    UnknownAction { action: String, resource: String },
    #[error("{resource} has no {kind} named `{name}`")]
    UnknownOperation {
        kind: &'static str,
        name: String,
        resource: String,
    },
    #[error("you must define a scope responder with an accessible scope for {0}")]
    MissingScope(String),
    #[error("no transactor is registered")]
    MissingTransactor,
    #[error("{0}")]
    Arity(&'static str),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Arity(_) => "ArgumentError",
            _ => "ConfigurationError",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Api,
    ResourceNotFound,
    InvalidParam,
    Authorization,
}

impl ErrorKind {
    fn default_message(self) -> &'static str {
        match self {
            ErrorKind::Api => "An error occurred at the server.",
            ErrorKind::ResourceNotFound => {
                "The resource you are trying to load or update could not be found."
            }
            ErrorKind::InvalidParam => "A parameter you specified was invalid.",
            ErrorKind::Authorization => "You are not authorized to perform this action.",
        }
    }

    fn default_code(self) -> &'static str {
        match self {
            ErrorKind::Api => "APIError",
            ErrorKind::ResourceNotFound => "ResourceNotFoundError",
            ErrorKind::InvalidParam => "InvalidParamError",
            ErrorKind::Authorization => "AuthorizationError",
        }
    }

    fn default_status(self) -> u16 {
        match self {
            ErrorKind::Api => 500,
            ErrorKind::ResourceNotFound => 404,
            ErrorKind::InvalidParam => 400,
            ErrorKind::Authorization => 403,
        }
    }
}

/// Structured request-time error. Unset fields fall back to the kind's defaults.
#[derive(Error, Debug, Clone)]
#[error("{}", self.message())]
pub struct RequestError {
    kind: ErrorKind,
    message: Option<String>,
    human_message: Option<String>,
    code: Option<String>,
    status: Option<u16>,
    meta: Map<String, Value>,
    resource: Option<Box<Record>>,
}

impl RequestError {
    pub fn new(kind: ErrorKind) -> Self {
        RequestError {
            kind,
            message: None,
            human_message: None,
            code: None,
            status: None,
            meta: Map::new(),
            resource: None,
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Api).with_message(message)
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::ResourceNotFound)
    }

    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParam).with_message(message)
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Authorization)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_human_message(mut self, message: impl Into<String>) -> Self {
        self.human_message = Some(message.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_resource(mut self, resource: Record) -> Self {
        self.resource = Some(Box::new(resource));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        self.message
            .as_deref()
            .unwrap_or_else(|| self.kind.default_message())
    }

    pub fn human_message(&self) -> &str {
        self.human_message.as_deref().unwrap_or_else(|| self.message())
    }

    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or_else(|| self.kind.default_code())
    }

    pub fn status(&self) -> u16 {
        self.status.unwrap_or_else(|| self.kind.default_status())
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn resource(&self) -> Option<&Record> {
        self.resource.as_deref()
    }

    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject {
            detail: Some(self.message().to_string()),
            code: Some(self.code().to_string()),
            status: Some(self.status().to_string()),
            meta: self.meta.clone(),
        }
    }
}

/// Error propagated through the pipeline and caught at the responder boundary.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        ApiError::Other(Box::new(err))
    }

    /// Name used as the `code` of errors that are not structured request errors.
    pub fn kind_name(&self) -> &str {
        match self {
            ApiError::Request(e) => e.code(),
            ApiError::Config(e) => e.code(),
            ApiError::Db(sqlx::Error::RowNotFound) => "ResourceNotFoundError",
            ApiError::Db(_) => "DatabaseError",
            ApiError::Other(_) => "InternalError",
        }
    }

    pub fn as_request(&self) -> Option<&RequestError> {
        match self {
            ApiError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ResponseError> for ApiError {
    fn from(err: ResponseError) -> Self {
        match err {
            ResponseError::Api(e) => e,
            ResponseError::Message(m) => ApiError::Request(RequestError::api(m)),
            ResponseError::Object(obj) => {
                let mut err = RequestError::api(
                    obj.detail
                        .unwrap_or_else(|| ErrorKind::Api.default_message().to_string()),
                );
                if let Some(code) = obj.code {
                    err = err.with_code(code);
                }
                if let Some(status) = obj.status.and_then(|s| s.parse::<u16>().ok()) {
                    err = err.with_status(status);
                }
                err.meta = obj.meta;
                ApiError::Request(err)
            }
            ResponseError::Map(m) => {
                let detail = m
                    .get("detail")
                    .or_else(|| m.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| ErrorKind::Api.default_message())
                    .to_string();
                ApiError::Request(RequestError::api(detail))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let object = crate::response::default_transform(&self);
        let status = object
            .status
            .as_deref()
            .and_then(|s| s.parse::<u16>().ok())
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "data": Value::Null,
            "meta": {},
            "errors": [object],
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_fill_in_defaults() {
        let err = RequestError::not_found();
        assert_eq!(err.status(), 404);
        assert_eq!(err.code(), "ResourceNotFoundError");
        assert_eq!(
            err.message(),
            "The resource you are trying to load or update could not be found."
        );
        assert_eq!(err.human_message(), err.message());

        let err = RequestError::invalid_param("limit too large").with_status(422);
        assert_eq!(err.status(), 422);
        assert_eq!(err.code(), "InvalidParamError");
        assert_eq!(err.to_string(), "limit too large");
    }

    #[test]
    fn api_error_names_native_shapes() {
        let err = ApiError::Config(ConfigError::Arity("Expected no instance argument but one was given"));
        assert_eq!(err.kind_name(), "ArgumentError");
        let err = ApiError::other(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.kind_name(), "InternalError");
        assert_eq!(err.to_string(), "boom");
    }
}
