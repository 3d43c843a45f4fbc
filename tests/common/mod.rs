#![allow(dead_code)]

use action_api::endpoints::EndpointOptions;
use action_api::store::memory::{FnAuthorizer, MemoryTable, MemoryTransactor, RowPredicate};
use action_api::{
    ActionOutput, ActionResponder, ActionSet, ApiConfig, ApiDocBuilder, ApiError, ApiRequest, Authorizer,
    DeleteAction, FieldRule, InstanceAction, ParamMeta, ParamType, PresetSpec, Record, RecordValidator,
    Registry, RequestError, SaveAction, Serializer,
};
use async_trait::async_trait;
use axum::http::Method;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct Fixture {
    pub registry: Arc<Registry>,
    pub tickets: MemoryTable,
    pub transactor: MemoryTransactor,
}

/// Closes the ticket inside a transaction; without `force` it fails after saving, so the save must roll back.
struct Close;

#[async_trait]
impl InstanceAction for Close {
    async fn call(&self, rsp: &mut ActionResponder, instance: Record) -> Result<ActionOutput, ApiError> {
        let force = rsp.params().get("force").and_then(Value::as_bool).unwrap_or(false);
        rsp.authorized_transaction(instance, None, |tx, mut record| async move {
            record.set("status", "closed");
            tx.save(&mut record).await?;
            if !force {
                return Err(ApiError::from(RequestError::invalid_param(
                    "Tickets can only be closed with force.",
                )));
            }
            Ok::<_, ApiError>(record)
        })
        .await
        .map(ActionOutput::Record)
    }
}

pub fn tickets() -> MemoryTable {
    MemoryTable::builder("Ticket")
        .row(serde_json::json!({"title": "Broken login", "status": "open", "priority": 2}))
        .row(serde_json::json!({"title": "Typo", "status": "closed", "priority": 1}))
        .row(serde_json::json!({"title": "Crash", "status": "open", "priority": 3}))
        .equals_scope("status", "status")
        .scope("min_priority", |args| {
            let min = args.value("min_priority").and_then(Value::as_i64).unwrap_or(0);
            let predicate: RowPredicate = Arc::new(move |r: &Record| {
                r.get("priority").and_then(Value::as_i64).unwrap_or(0) >= min
            });
            Ok(predicate)
        })
        .sort_by("priority", "priority", true)
        .build()
}

pub fn fixture() -> Fixture {
    fixture_with(ApiConfig::default(), None)
}

pub fn fixture_with(config: ApiConfig, authorizer: Option<Arc<dyn Authorizer>>) -> Fixture {
    let tickets = tickets();
    let transactor = MemoryTransactor::new().with_table(tickets.clone());

    let mut builder = Registry::builder(config);
    builder
        .mount("/api", |m| {
            m.model_endpoints_for("Ticket", true, |ep| {
                ep.post("/ticket/close", EndpointOptions::action("close"));
                Ok(())
            })
        })
        .unwrap();
    builder
        .doc(
            ApiDocBuilder::publish_scope("Ticket", "status")
                .param("status", ParamType::String)
                .build()
                .unwrap(),
        )
        .unwrap()
        .doc(
            ApiDocBuilder::publish_scope("Ticket", "min_priority")
                .param_with(
                    "min_priority",
                    ParamType::Integer,
                    Some("lowest priority to include"),
                    ParamMeta::new().default_value(1).without_key(),
                )
                .build()
                .unwrap(),
        )
        .unwrap()
        .doc(
            ApiDocBuilder::publish_action("Ticket", "close")
                .param("force", ParamType::Bool)
                .build()
                .unwrap(),
        )
        .unwrap();
    builder.docs_mut().publish_sorts("Ticket", &["priority"]).unwrap();
    builder
        .scope_provider("Ticket", Arc::new(tickets.clone()))
        .unwrap()
        .actions(
            "Ticket",
            ActionSet::new()
                .instance_action(
                    "update",
                    SaveAction::new(&["title", "status", "priority"])
                        .validator(RecordValidator::new().field("title", FieldRule::new().required())),
                )
                .instance_action("delete", DeleteAction)
                .instance_action("close", Close),
        )
        .unwrap()
        .serializer(
            Serializer::new("Ticket", &["title", "status", "priority"])
                .preset("default", PresetSpec::fields(&["title", "status"]))
                .unwrap(),
        )
        .unwrap();
    builder.transactor(Arc::new(transactor.clone()));
    if let Some(authorizer) = authorizer {
        builder.authorizer(authorizer);
    }

    Fixture {
        registry: builder.build(),
        tickets,
        transactor,
    }
}

/// Only actors with the `agent` role may write.
pub fn agents_only() -> Arc<dyn Authorizer> {
    Arc::new(FnAuthorizer(|actor: Option<&action_api::Actor>, _target: &Record, _action: &str| -> Result<(), ApiError> {
        match actor {
            Some(a) if a.has_role("agent") => Ok(()),
            _ => Err(RequestError::unauthorized().into()),
        }
    }))
}

pub fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub fn request(method: Method, path: &str, value: Value) -> ApiRequest {
    ApiRequest {
        method,
        path: path.to_string(),
        params: params(value),
        actor: None,
    }
}
