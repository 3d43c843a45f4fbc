//! Every registered endpoint routed to one handler that builds an [`ApiRequest`] and dispatches it.

use crate::dispatch::ApiRequest;
use crate::error::{ApiError, RequestError};
use crate::extractors::CurrentActor;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{Method, Uri},
    response::{IntoResponse, Response},
    routing::{on, MethodFilter, MethodRouter},
    Router,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tower_http::limit::RequestBodyLimitLayer;

/// Max request body size (bytes).
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Routes for every endpoint in the registry. Unmatched paths still go through the dispatcher so
/// they render the normal not-found document (and so a configured engine path can be stripped).
pub fn api_routes(state: AppState) -> Router {
    let mut by_path: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();
    for endpoint in state.dispatcher.registry().endpoints().iter() {
        if !endpoint.path.starts_with('/') {
            continue;
        }
        let Ok(filter) = MethodFilter::try_from(endpoint.method.clone()) else {
            tracing::warn!(method = %endpoint.method, path = %endpoint.path, "unsupported method, endpoint left to fallback");
            continue;
        };
        let route = by_path
            .remove(&endpoint.path)
            .map(|existing| existing.on(filter, handle))
            .unwrap_or_else(|| on(filter, handle));
        by_path.insert(endpoint.path.clone(), route);
    }

    let mut router = Router::new();
    for (path, route) in by_path {
        router = router.route(&path, route);
    }
    router
        .fallback(handle)
        .layer(RequestBodyLimitLayer::new(DEFAULT_BODY_LIMIT))
        .with_state(state)
}

async fn handle(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    method: Method,
    uri: Uri,
    Query(query): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Response {
    let mut params = Map::new();
    for (key, value) in query {
        insert_query_param(&mut params, &key, Value::String(value));
    }
    if !body.is_empty() {
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(fields)) => params.extend(fields),
            _ => {
                return ApiError::from(RequestError::invalid_param("Request body must be a JSON object."))
                    .into_response()
            }
        }
    }
    state
        .dispatcher
        .handle(ApiRequest {
            method,
            path: uri.path().to_string(),
            params,
            actor,
        })
        .await
        .into_response()
}

/// `filters[status]=open` nests under `filters`; `include[]=a` appends to a list.
fn insert_query_param(params: &mut Map<String, Value>, key: &str, value: Value) {
    let Some(open) = key.find('[') else {
        params.insert(key.to_string(), value);
        return;
    };
    let root = &key[..open];
    let segments: Vec<&str> = key[open..]
        .split('[')
        .skip(1)
        .map(|s| s.trim_end_matches(']'))
        .collect();

    let mut slot = params
        .entry(root.to_string())
        .or_insert_with(|| container_for(segments.first().copied()));
    for (i, segment) in segments.iter().enumerate() {
        let next = segments.get(i + 1).copied();
        slot = match (slot, segment.is_empty()) {
            (Value::Array(items), true) => {
                items.push(container_or(next, Value::Null));
                match items.last_mut() {
                    Some(last) => last,
                    None => return,
                }
            }
            (Value::Object(map), false) => map
                .entry(segment.to_string())
                .or_insert_with(|| container_or(next, Value::Null)),
            // shape clash with an earlier param: the first one wins
            _ => return,
        };
    }
    *slot = value;
}

fn container_for(segment: Option<&str>) -> Value {
    match segment {
        Some("") => Value::Array(Vec::new()),
        _ => Value::Object(Map::new()),
    }
}

fn container_or(segment: Option<&str>, leaf: Value) -> Value {
    match segment {
        Some(s) => container_for(Some(s)),
        None => leaf,
    }
}
