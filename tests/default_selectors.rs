use action_api::store::memory::MemoryTable;
use action_api::{
    ApiConfig, ApiDocBuilder, ApiError, Dispatcher, ParamType, Registry, Relation, RequestContext, ScopeProvider,
    ScopeResponder,
};
use axum::http::{Method, StatusCode};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Hides flagged tickets and shows open ones unless the request asks for another status.
struct OpenTickets(MemoryTable);

impl ScopeProvider for OpenTickets {
    fn accessible_scope(&self, ctx: &RequestContext) -> Result<Box<dyn Relation>, ApiError> {
        self.0.accessible_scope(ctx)
    }

    fn default_selectors(&self, _ctx: &RequestContext) -> Map<String, Value> {
        json!({"visible": null, "status": "open"})
            .as_object()
            .cloned()
            .unwrap_or_default()
    }
}

fn registry() -> (Arc<Registry>, MemoryTable) {
    let table = MemoryTable::builder("Ticket")
        .row(json!({"title": "Broken login", "status": "open"}))
        .row(json!({"title": "Typo", "status": "closed"}))
        .row(json!({"title": "Spam", "status": "open", "hidden": true}))
        .equals_scope("status", "status")
        .flag_scope("visible", |r| r.get("hidden") != Some(&json!(true)))
        .build();

    let mut builder = Registry::builder(ApiConfig::default());
    builder
        .mount("/api", |m| m.model_endpoints_for("Ticket", true, |_| Ok(())))
        .unwrap();
    builder
        .doc(
            ApiDocBuilder::publish_scope("Ticket", "status")
                .param("status", ParamType::String)
                .build()
                .unwrap(),
        )
        .unwrap()
        // documented but never published: requests may not name it
        .doc(ApiDocBuilder::scope("Ticket", "visible").build().unwrap())
        .unwrap()
        .scope_provider("Ticket", Arc::new(OpenTickets(table.clone())))
        .unwrap();
    (builder.build(), table)
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn titles(body: &Value) -> Vec<String> {
    body["data"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i["attributes"]["title"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

async fn index(registry: &Arc<Registry>, value: Value) -> (StatusCode, Value) {
    let res = Dispatcher::new(registry.clone())
        .handle(action_api::ApiRequest {
            method: Method::GET,
            path: "/api/tickets".into(),
            params: params(value),
            actor: None,
        })
        .await;
    (res.status, res.body)
}

#[tokio::test]
async fn unpublished_default_selectors_still_apply() {
    let (registry, _) = registry();
    let (status, body) = index(&registry, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(titles(&body), vec!["Broken login"]);
    assert_eq!(body["meta"]["count"], json!(1));
}

#[tokio::test]
async fn request_filter_replaces_the_default_of_the_same_name() {
    let (registry, _) = registry();
    let (status, body) = index(&registry, json!({"filters": {"status": "closed"}})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(titles(&body), vec!["Typo"]);
}

#[tokio::test]
async fn requests_cannot_name_an_unpublished_filter() {
    let (registry, table) = registry();
    let (status, body) = index(&registry, json!({"filters": {"visible": null}})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["errors"][0]["code"], json!("ConfigurationError"));
    assert_eq!(table.query_count(), 0);
}

#[test]
fn plan_keeps_defaults_apart_from_checked_filters() {
    let (registry, _) = registry();
    let ctx = RequestContext::new(params(json!({"filters": {"status": "closed"}})), None);
    let plan = ScopeResponder::new(&registry, "Ticket", &ctx)
        .process_request_context()
        .unwrap();
    assert_eq!(plan.defaults, vec![("visible".to_string(), Value::Null)]);
    assert_eq!(plan.filters, vec![("status".to_string(), json!({"status": "closed"}))]);
}
