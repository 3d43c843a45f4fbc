mod common;

use action_api::{
    perform_action, Actor, ApiConfig, Dispatcher, PerformOptions, RequestContext, ScopeResponder,
};
use axum::http::{Method, StatusCode};
use common::{agents_only, fixture, fixture_with, params, request};
use serde_json::{json, Value};

#[tokio::test]
async fn index_filters_sorts_and_paginates() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(
            Method::GET,
            "/api/tickets",
            json!({"filters": {"status": "open"}, "sort": "priority", "limit": "1"}),
        ))
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(
        res.body["data"],
        json!([{
            "id": "3",
            "type": "ticket",
            "attributes": {"title": "Crash", "status": "open"},
        }])
    );
    assert_eq!(res.body["meta"], json!({"count": 2, "pages_count": 2, "page": 1}));
    assert_eq!(res.body["errors"], json!([]));
}

#[tokio::test]
async fn second_page_continues_where_the_first_stopped() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(
            Method::GET,
            "/api/tickets",
            json!({"filters": {"status": "open"}, "sort": "priority", "limit": 1, "page": 2}),
        ))
        .await;
    assert_eq!(res.body["data"][0]["attributes"]["title"], json!("Broken login"));
    assert_eq!(res.body["meta"]["page"], json!(2));
}

#[test]
fn filter_arguments_are_keyed_and_coerced() {
    let f = fixture();
    let ctx = RequestContext::new(
        params(json!({"filters": {"status": "open", "min_priority": "2"}})),
        None,
    );
    let plan = ScopeResponder::new(&f.registry, "Ticket", &ctx)
        .process_request_context()
        .unwrap();
    assert_eq!(
        plan.filters,
        vec![
            ("status".to_string(), json!({"status": "open"})),
            ("min_priority".to_string(), json!(2)),
        ]
    );
}

#[test]
fn missing_filter_arguments_take_their_defaults() {
    let f = fixture();
    let ctx = RequestContext::new(params(json!({"filters": {"min_priority": {}}})), None);
    let plan = ScopeResponder::new(&f.registry, "Ticket", &ctx)
        .process_request_context()
        .unwrap();
    assert_eq!(plan.filters, vec![("min_priority".to_string(), json!(1))]);
}

#[tokio::test]
async fn undocumented_filter_fails_before_querying() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(
            Method::GET,
            "/api/tickets",
            json!({"filters": {"owner": "ada"}}),
        ))
        .await;
    assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.body["errors"][0]["code"], json!("ConfigurationError"));
    assert_eq!(f.tickets.query_count(), 0);
}

#[tokio::test]
async fn undocumented_sort_fails_before_querying() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(Method::GET, "/api/tickets", json!({"sort": "title"})))
        .await;
    assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(f.tickets.query_count(), 0);
}

#[tokio::test]
async fn id_param_returns_a_single_record() {
    let f = fixture();
    let dispatcher = Dispatcher::new(f.registry.clone());

    let res = dispatcher
        .handle(request(Method::GET, "/api/tickets", json!({"id": "2"})))
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"]["id"], json!("2"));
    assert_eq!(res.body["data"]["attributes"]["title"], json!("Typo"));

    let res = dispatcher
        .handle(request(Method::GET, "/api/tickets", json!({"id": "99"})))
        .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.body["data"], Value::Null);
}

#[tokio::test]
async fn last_takes_the_final_sorted_record() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(
            Method::GET,
            "/api/tickets",
            json!({"sort": "priority", "last": true}),
        ))
        .await;
    assert_eq!(res.body["data"]["attributes"]["title"], json!("Typo"));
}

#[tokio::test]
async fn requested_fields_extend_the_default_preset() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(
            Method::GET,
            "/api/tickets",
            json!({"id": 1, "fields": {"ticket": ["...default", "priority"]}}),
        ))
        .await;
    assert_eq!(
        res.body["data"]["attributes"],
        json!({"title": "Broken login", "status": "open", "priority": 2})
    );
}

#[tokio::test]
async fn limit_zero_warns_when_more_than_max_limit_exist() {
    let config = ApiConfig {
        max_limit: 2,
        ..ApiConfig::default()
    };
    let f = fixture_with(config, None);
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(Method::GET, "/api/tickets", json!({"limit": 0})))
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"].as_array().map(Vec::len), Some(2));
    assert_eq!(
        res.body["errors"][0]["detail"],
        json!("Requested all records, but there are more than max_limit: 2.")
    );
}

#[tokio::test]
async fn limit_above_max_is_rejected() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(Method::GET, "/api/tickets", json!({"limit": 10_001})))
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["errors"][0]["code"], json!("InvalidParamError"));
}

#[tokio::test]
async fn page_past_the_largest_offset_is_rejected() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(
            Method::GET,
            "/api/tickets",
            json!({"page": "9223372036854775807", "limit": 100}),
        ))
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["errors"][0]["meta"]["attribute"], json!("page"));
    assert_eq!(f.tickets.query_count(), 0);
}

#[tokio::test]
async fn create_saves_inside_a_transaction() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(
            Method::POST,
            "/api/ticket",
            json!({"ticket": {"title": "  Slow page ", "status": "open", "priority": 2}}),
        ))
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"]["id"], json!("4"));
    assert_eq!(res.body["data"]["attributes"]["title"], json!("Slow page"));
    assert_eq!(f.tickets.rows().len(), 4);
    assert_eq!(f.transactor.log(), vec!["begin", "commit"]);
}

#[tokio::test]
async fn invalid_record_is_not_saved() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(Method::POST, "/api/ticket", json!({"status": "open"})))
        .await;

    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["errors"][0]["code"], json!("RecordInvalid"));
    assert_eq!(res.body["errors"][0]["detail"], json!("Title can't be blank"));
    assert_eq!(res.body["errors"][0]["meta"]["attribute"], json!("title"));
    assert_eq!(f.tickets.rows().len(), 3);
    assert!(f.transactor.log().is_empty());
}

#[tokio::test]
async fn update_loads_the_addressed_record() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(
            Method::POST,
            "/api/ticket",
            json!({"id": 1, "status": "closed"}),
        ))
        .await;

    assert_eq!(res.status, StatusCode::OK);
    let row = f.tickets.get(&json!(1)).unwrap();
    assert_eq!(row.get("status"), Some(&json!("closed")));
    assert_eq!(row.get("title"), Some(&json!("Broken login")));
}

#[tokio::test]
async fn delete_removes_the_record() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(Method::DELETE, "/api/ticket", json!({"id": 3})))
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(f.tickets.get(&json!(3)).is_none());
}

#[tokio::test]
async fn delete_without_id_is_not_found() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(Method::DELETE, "/api/ticket", json!({})))
        .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert!(f.transactor.log().is_empty());
}

#[tokio::test]
async fn failing_action_rolls_back_and_returns_the_instance() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(Method::POST, "/api/ticket/close", json!({"id": 1})))
        .await;

    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        res.body["errors"][0]["detail"],
        json!("Tickets can only be closed with force.")
    );
    assert_eq!(res.body["data"]["id"], json!("1"));
    assert_eq!(f.transactor.log(), vec!["begin", "rollback"]);
    let row = f.tickets.get(&json!(1)).unwrap();
    assert_eq!(row.get("status"), Some(&json!("open")));
}

#[tokio::test]
async fn action_params_are_coerced_by_their_doc() {
    let f = fixture();
    let res = Dispatcher::new(f.registry.clone())
        .handle(request(
            Method::POST,
            "/api/ticket/close",
            json!({"id": 1, "force": "true"}),
        ))
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(f.transactor.log(), vec!["begin", "commit"]);
    let row = f.tickets.get(&json!(1)).unwrap();
    assert_eq!(row.get("status"), Some(&json!("closed")));
}

#[tokio::test]
async fn unauthorized_actor_never_opens_a_transaction() {
    let f = fixture_with(ApiConfig::default(), Some(agents_only()));
    let dispatcher = Dispatcher::new(f.registry.clone());

    let res = dispatcher
        .handle(request(Method::POST, "/api/ticket", json!({"title": "Nope"})))
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body["errors"][0]["code"], json!("AuthorizationError"));
    assert!(f.transactor.log().is_empty());

    let mut req = request(Method::POST, "/api/ticket", json!({"title": "Yes"}));
    req.actor = Some(Actor::new("7").with_role("agent"));
    let res = dispatcher.handle(req).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(f.transactor.log(), vec!["begin", "commit"]);
}

#[tokio::test]
async fn perform_action_outside_a_request() {
    let f = fixture();
    let env = perform_action(
        &f.registry,
        "Ticket",
        "create",
        PerformOptions::new().params(params(json!({"title": "From a job", "priority": 1}))),
    )
    .await
    .unwrap();

    assert!(env.success);
    let record = env.data.as_ref().and_then(|d| d.as_record()).unwrap();
    assert_eq!(record.get("title"), Some(&json!("From a job")));
    assert_eq!(f.tickets.rows().len(), 4);
}

#[tokio::test]
async fn instance_action_without_instance_is_an_argument_error() {
    let f = fixture();
    let env = perform_action(&f.registry, "Ticket", "close", PerformOptions::new())
        .await
        .unwrap();
    assert!(!env.success);

    let err = perform_action(
        &f.registry,
        "Ticket",
        "close",
        PerformOptions::new().raise_error(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("Expected instance argument"));
}

#[tokio::test]
async fn unknown_action_fails() {
    let f = fixture();
    let env = perform_action(&f.registry, "Ticket", "archive", PerformOptions::new())
        .await
        .unwrap();
    assert!(!env.success);
    assert!(env.data.is_none());
}
