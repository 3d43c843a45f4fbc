//! Action API: declarative endpoints over axum and sqlx.
//!
//! Resources declare endpoints, documented params, filters and sorts, and named actions in a
//! [`Registry`] at startup. Requests then flow through [`Dispatcher`]: endpoint lookup, param
//! coercion, a [`ScopeResponder`] query or an [`ActionResponder`] transaction, serialization,
//! and error normalization into a `{data, meta, errors}` document.

pub mod case;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod documentation;
pub mod endpoints;
pub mod error;
pub mod extractors;
pub mod logging;
pub mod params;
pub mod record;
pub mod registry;
pub mod responder;
pub mod response;
pub mod routes;
pub mod serializer;
pub mod sql;
pub mod state;
pub mod store;
pub mod validation;

pub use config::ApiConfig;
pub use context::{Actor, RequestContext};
pub use dispatch::{ApiRequest, ApiResponse, Dispatcher};
pub use documentation::{ApiDoc, ApiDocBuilder, DocRegistry, ParamMeta, ParamType};
pub use endpoints::{DispatchScope, EndpointDescriptor, EndpointOptions, EndpointRegistry};
pub use error::{ApiError, ConfigError, ErrorKind, RequestError};
pub use logging::{init_tracing, log_exception, ErrorReporter};
pub use record::{Record, ValidationError};
pub use registry::{Registry, RegistryBuilder};
pub use responder::{
    perform_action, ActionOutput, ActionResponder, ActionSet, ClassAction, DeleteAction, InstanceAction,
    PerformOptions, SaveAction, ScopeProvider, ScopeResponder,
};
pub use response::{normalize_errors, EnvelopeData, ErrorObject, ResultEnvelope};
pub use routes::{api_routes, common_routes};
pub use serializer::{PresetSpec, Serializer, SerializerRegistry};
pub use state::AppState;
pub use store::{Authorizer, Relation, ScopeArgs, Transaction, Transactor};
pub use validation::{FieldRule, RecordValidator};
