//! Request dispatch: endpoint lookup, responder invocation, rendering of the envelope.

use crate::case::to_snake_case;
use crate::context::{Actor, RequestContext};
use crate::endpoints::{DispatchScope, EndpointDescriptor};
use crate::error::{ApiError, ConfigError, RequestError};
use crate::logging::log_exception;
use crate::record::Record;
use crate::registry::Registry;
use crate::responder::{ActionResponder, PerformOptions, ScopeResponder};
use crate::response::{default_transform, normalize_errors, EnvelopeData, ResultEnvelope};
use crate::serializer::render_plain;
use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// What the host hands over for one request.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub params: Map<String, Value>,
    pub actor: Option<Actor>,
}

/// Rendered `{data, meta, errors}` document and its status.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Dispatcher { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Path as registered: the configured engine path is stripped first.
    fn endpoint_path<'p>(&self, path: &'p str) -> &'p str {
        let stripped = self
            .registry
            .config()
            .engine_path
            .as_deref()
            .map(|prefix| prefix.trim_end_matches('/'))
            .filter(|prefix| !prefix.is_empty())
            .and_then(|prefix| path.strip_prefix(prefix));
        match stripped {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        }
    }

    pub async fn handle(&self, req: ApiRequest) -> ApiResponse {
        let path = self.endpoint_path(&req.path).to_string();
        let ctx = RequestContext::new(req.params, req.actor);
        let endpoint = self.registry.endpoints().lookup(&req.method, &path).cloned();
        let (envelope, ctx) = match endpoint {
            Some(endpoint) => self.dispatch(&endpoint, ctx).await,
            None => {
                tracing::debug!(method = %req.method, path = %path, "no endpoint registered");
                (ResultEnvelope::failure(RequestError::not_found()), ctx)
            }
        };
        self.render(envelope, &ctx)
    }

    async fn dispatch(&self, endpoint: &EndpointDescriptor, ctx: RequestContext) -> (ResultEnvelope, RequestContext) {
        tracing::debug!(endpoint = %endpoint.name, action = %endpoint.action, "dispatching");
        let instance = match endpoint.scope {
            DispatchScope::ClassLevel => None,
            DispatchScope::InstanceLevel => match self.load_instance(endpoint, &ctx).await {
                Ok(instance) => Some(instance),
                Err(err) => {
                    log_exception(&err, true, self.registry.reporter());
                    return (ResultEnvelope::failure(err), ctx);
                }
            },
        };

        let mut opts = PerformOptions::new().request_context(ctx);
        if let Some(instance) = instance {
            opts = opts.instance(instance);
        }
        let mut rsp = ActionResponder::new(self.registry.clone(), endpoint.resource_type.clone());
        let envelope = match rsp.perform(&endpoint.action, opts).await {
            Ok(envelope) => envelope,
            Err(err) => ResultEnvelope::failure(err),
        };
        (envelope, rsp.take_request_context())
    }

    /// The addressed record, or a blank one for endpoints that create through their save action.
    async fn load_instance(&self, endpoint: &EndpointDescriptor, ctx: &RequestContext) -> Result<Record, ApiError> {
        if ctx.id().is_some() {
            let mut scope = ScopeResponder::new(&self.registry, &endpoint.resource_type, ctx);
            return scope
                .item()
                .await?
                .ok_or_else(|| RequestError::not_found().into());
        }
        if endpoint.instantiate_if_missing {
            return Ok(Record::new(endpoint.resource_type.clone()));
        }
        Err(RequestError::not_found().into())
    }

    pub fn render(&self, envelope: ResultEnvelope, ctx: &RequestContext) -> ApiResponse {
        let transform = self.registry.config().transform_error.as_ref();
        let (mut errors, mut status) = normalize_errors(&envelope, transform);
        let data = match envelope.data.as_ref().map(|d| self.render_data(d, ctx)) {
            Some(Ok(value)) => value,
            Some(Err(err)) => {
                let err = ApiError::from(err);
                log_exception(&err, true, self.registry.reporter());
                errors.push(match transform {
                    Some(t) => t(&err),
                    None => default_transform(&err),
                });
                status = StatusCode::INTERNAL_SERVER_ERROR;
                Value::Null
            }
            None => Value::Null,
        };
        ApiResponse {
            status,
            body: json!({
                "data": data,
                "meta": envelope.meta,
                "errors": errors,
            }),
        }
    }

    fn render_data(&self, data: &EnvelopeData, ctx: &RequestContext) -> Result<Value, ConfigError> {
        match data {
            EnvelopeData::Value(value) => Ok(value.clone()),
            EnvelopeData::One(record) => self.render_record(record, ctx),
            EnvelopeData::Many(records) => records
                .iter()
                .map(|r| self.render_record(r, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }

    /// The type's own serializer honours requested fields; the fallback serializer renders its default preset.
    fn render_record(&self, record: &Record, ctx: &RequestContext) -> Result<Value, ConfigError> {
        let serializers = self.registry.serializers();
        if let Some(serializer) = serializers.for_type(&record.resource_type) {
            let requested = requested_fields(ctx, &record.resource_type);
            let fields = serializer.resolve_fieldset(requested.as_deref())?;
            return Ok(serializer.render(record, &fields));
        }
        let fallback = self
            .registry
            .config()
            .default_serializer
            .as_deref()
            .and_then(|name| serializers.by_name(name));
        match fallback {
            Some(serializer) => {
                let fields = serializer.resolve_fieldset(None)?;
                Ok(serializer.render(record, &fields))
            }
            None => Ok(render_plain(record)),
        }
    }
}

/// `fields[<type>]` as a list; a comma-separated string is split.
fn requested_fields(ctx: &RequestContext, resource_type: &str) -> Option<Vec<String>> {
    let fields = ctx.fields()?;
    let value = fields
        .get(&to_snake_case(resource_type))
        .or_else(|| fields.get(resource_type))?;
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
        ),
        Value::String(s) => Some(
            s.split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(String::from)
                .collect(),
        ),
        _ => None,
    }
}
