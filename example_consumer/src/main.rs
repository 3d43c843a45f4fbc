//! Example consumer: a ticket service on PostgreSQL built with action-api.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Or from this directory: `cargo run`

use action_api::sql::{quoted, MAIN_ALIAS};
use action_api::store::pg::{PgResource, PgTable, PgTransactor};
use action_api::{
    api_routes, common_routes, init_tracing, ActionSet, ApiConfig, ApiDocBuilder, AppState, DeleteAction,
    FieldRule, ParamMeta, ParamType, PresetSpec, RecordValidator, Registry, SaveAction, Serializer,
};
use std::sync::Arc;
use tokio::net::TcpListener;

const CREATE_TICKETS: &str = r#"
CREATE TABLE IF NOT EXISTS public.tickets (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    priority INTEGER NOT NULL DEFAULT 1
)"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing("action_api=info,example_consumer=info");

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/tickets".into());
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    sqlx::query(CREATE_TICKETS).execute(&pool).await?;

    let tickets = PgTable::builder("Ticket", "public", "tickets")
        .typed_column("id", "bigint")
        .column("title")
        .column("status")
        .typed_column("priority", "integer")
        .equals_scope("status", "status")
        .scope("min_priority", |q, args| {
            let min = args.value("min_priority").cloned().unwrap_or(serde_json::json!(1));
            Ok(format!(
                "{}.{} >= {}",
                MAIN_ALIAS,
                quoted("priority"),
                q.placeholder(min, Some("integer"))
            ))
        })
        .sort_by("priority", "priority", true)
        .sort_by("newest", "id", true)
        .build();

    let mut builder = Registry::builder(ApiConfig::from_env());
    builder.mount("/api", |m| m.model_endpoints_for("Ticket", true, |_| Ok(())))?;
    builder
        .doc(
            ApiDocBuilder::publish_scope("Ticket", "status")
                .param("status", ParamType::String)
                .build()?,
        )?
        .doc(
            ApiDocBuilder::publish_scope("Ticket", "min_priority")
                .param_with(
                    "min_priority",
                    ParamType::Integer,
                    Some("lowest priority to include"),
                    ParamMeta::new().default_value(1).without_key(),
                )
                .build()?,
        )?;
    builder.docs_mut().publish_sorts("Ticket", &["priority", "newest"])?;
    builder
        .scope_provider("Ticket", Arc::new(PgResource::new(pool.clone(), tickets.clone())))?
        .actions(
            "Ticket",
            ActionSet::new()
                .instance_action(
                    "update",
                    SaveAction::new(&["title", "status", "priority"]).validator(
                        RecordValidator::new()
                            .field("title", FieldRule::new().required().length(None, Some(200)))
                            .field(
                                "status",
                                FieldRule::new().allowed(vec!["open".into(), "closed".into()]),
                            ),
                    ),
                )
                .instance_action("delete", DeleteAction),
        )?
        .serializer(
            Serializer::new("Ticket", &["title", "status", "priority"])
                .preset("default", PresetSpec::fields(&["title", "status"]))?,
        )?;
    builder.transactor(Arc::new(PgTransactor::new(pool.clone()).with_table(tickets)));

    let app = api_routes(AppState::new(builder.build())).merge(common_routes());
    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Ticket service listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
