//! Named action dispatch with transactional execution and caught-error envelopes.

use super::scope::ScopeResponder;
use crate::context::{Actor, RequestContext};
use crate::error::{ApiError, ConfigError, RequestError};
use crate::logging::log_exception;
use crate::params::process_params_with_api_doc;
use crate::record::Record;
use crate::registry::Registry;
use crate::response::{EnvelopeData, ResultEnvelope};
use crate::store::Transaction;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Action invoked on the resource type itself.
#[async_trait]
pub trait ClassAction: Send + Sync {
    async fn call(&self, rsp: &mut ActionResponder) -> Result<ActionOutput, ApiError>;
}

/// Action invoked on one loaded (or freshly instantiated) record.
#[async_trait]
pub trait InstanceAction: Send + Sync {
    async fn call(&self, rsp: &mut ActionResponder, instance: Record) -> Result<ActionOutput, ApiError>;
}

#[derive(Clone)]
pub enum ActionHandler {
    Class(Arc<dyn ClassAction>),
    Instance(Arc<dyn InstanceAction>),
}

/// Actions defined for one resource type.
#[derive(Clone, Default)]
pub struct ActionSet {
    handlers: HashMap<String, ActionHandler>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class_action(mut self, name: &str, action: impl ClassAction + 'static) -> Self {
        self.handlers
            .insert(name.to_string(), ActionHandler::Class(Arc::new(action)));
        self
    }

    pub fn instance_action(mut self, name: &str, action: impl InstanceAction + 'static) -> Self {
        self.handlers
            .insert(name.to_string(), ActionHandler::Instance(Arc::new(action)));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ActionHandler> {
        self.handlers.get(name)
    }
}

/// What an action hands back. Everything but `Envelope` is wrapped as a success.
#[derive(Debug)]
pub enum ActionOutput {
    Envelope(ResultEnvelope),
    Record(Record),
    Records(Vec<Record>),
    /// Raw value; maps with envelope keys are unpacked.
    Value(Value),
    Empty,
}

impl ActionOutput {
    pub fn into_envelope(self) -> ResultEnvelope {
        match self {
            ActionOutput::Envelope(env) => env,
            ActionOutput::Record(record) => ResultEnvelope::ok(record),
            ActionOutput::Records(records) => ResultEnvelope::ok(records),
            ActionOutput::Value(value) => ResultEnvelope::from_value(value),
            ActionOutput::Empty => ResultEnvelope {
                success: true,
                ..Default::default()
            },
        }
    }
}

impl From<ResultEnvelope> for ActionOutput {
    fn from(env: ResultEnvelope) -> Self {
        ActionOutput::Envelope(env)
    }
}

impl From<Record> for ActionOutput {
    fn from(record: Record) -> Self {
        ActionOutput::Record(record)
    }
}

#[derive(Debug, Default)]
pub struct PerformOptions {
    instance: Option<Record>,
    request_context: Option<RequestContext>,
    actor: Option<Actor>,
    params: Option<Map<String, Value>>,
    raise_error: bool,
}

impl PerformOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance(mut self, instance: Record) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn request_context(mut self, ctx: RequestContext) -> Self {
        self.request_context = Some(ctx);
        self
    }

    /// Overrides the actor of the request context.
    pub fn actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Replaces the params of the request context.
    pub fn params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }

    /// Return the first error instead of an unsuccessful envelope.
    pub fn raise_error(mut self) -> Self {
        self.raise_error = true;
        self
    }
}

/// State of the action currently being performed.
#[derive(Debug, Default)]
pub struct ActionContext {
    pub action: String,
    pub instance: Option<Record>,
    pub request_context: RequestContext,
}

pub struct ActionResponder {
    registry: Arc<Registry>,
    resource_type: String,
    action_context: ActionContext,
}

impl ActionResponder {
    pub fn new(registry: Arc<Registry>, resource_type: impl Into<String>) -> Self {
        ActionResponder {
            registry,
            resource_type: resource_type.into(),
            action_context: ActionContext::default(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn action_context(&self) -> &ActionContext {
        &self.action_context
    }

    pub fn request_context(&self) -> &RequestContext {
        &self.action_context.request_context
    }

    pub fn request_context_mut(&mut self) -> &mut RequestContext {
        &mut self.action_context.request_context
    }

    /// Move the request context out, e.g. to hand it to a nested `perform`.
    pub fn take_request_context(&mut self) -> RequestContext {
        std::mem::take(&mut self.action_context.request_context)
    }

    pub fn params(&self) -> &Map<String, Value> {
        self.action_context.request_context.params()
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.action_context.request_context.actor()
    }

    /// Scope responder for this resource type over the current request context.
    pub fn scope_responder(&self) -> ScopeResponder<'_> {
        ScopeResponder::new(&self.registry, &self.resource_type, self.request_context())
    }

    /// Run `action` and fold any error into an unsuccessful envelope carrying the instance as data.
    pub fn perform<'a>(
        &'a mut self,
        action: &str,
        opts: PerformOptions,
    ) -> BoxFuture<'a, Result<ResultEnvelope, ApiError>> {
        let action = action.to_string();
        Box::pin(async move {
            let raise_error = opts.raise_error;
            let instance = opts.instance.clone();
            let envelope = match self.execute_action(&action, opts).await {
                Ok(output) => output.into_envelope(),
                Err(err) => {
                    log_exception(&err, true, self.registry.reporter());
                    let mut env = ResultEnvelope::failure(err);
                    env.data = instance.map(EnvelopeData::One);
                    env
                }
            };
            if raise_error && !envelope.success {
                return Err(match envelope.into_first_error() {
                    Some(err) => err.into(),
                    None => RequestError::api(format!("{} failed", action)).into(),
                });
            }
            Ok(envelope)
        })
    }

    async fn execute_action(&mut self, action: &str, opts: PerformOptions) -> Result<ActionOutput, ApiError> {
        let mut ctx = opts.request_context.unwrap_or_default();
        if let Some(params) = opts.params {
            ctx.set_params(params);
        }
        if let Some(actor) = opts.actor {
            ctx.set_actor(Some(actor));
        }
        self.action_context = ActionContext {
            action: action.to_string(),
            instance: opts.instance.clone(),
            request_context: ctx,
        };
        self.process_request_context(action)?;

        match (self.find_handler(action)?, opts.instance) {
            (ActionHandler::Class(handler), None) => handler.call(self).await,
            (ActionHandler::Instance(handler), Some(instance)) => handler.call(self, instance).await,
            (ActionHandler::Class(_), Some(_)) => {
                Err(ConfigError::Arity("Expected no instance argument but one was given").into())
            }
            (ActionHandler::Instance(_), None) => {
                Err(ConfigError::Arity("Expected instance argument, but none was given").into())
            }
        }
    }

    /// Coerce params declared by the action's doc into the processed params.
    fn process_request_context(&mut self, action: &str) -> Result<(), ApiError> {
        let registry = self.registry.clone();
        let Some(doc) = registry.docs().find_action(&self.resource_type, action) else {
            return Ok(());
        };
        let ctx = &mut self.action_context.request_context;
        let coerced = process_params_with_api_doc(ctx.params(), doc)?;
        let mut params = ctx.params().clone();
        params.extend(coerced);
        ctx.set_processed_params(params);
        Ok(())
    }

    fn find_handler(&self, action: &str) -> Result<ActionHandler, ApiError> {
        if let Some(handler) = self
            .registry
            .actions(&self.resource_type)
            .and_then(|set| set.get(action))
        {
            return Ok(handler.clone());
        }
        match action {
            "index" => Ok(ActionHandler::Class(Arc::new(IndexAction))),
            "create" => Ok(ActionHandler::Class(Arc::new(CreateAction))),
            _ => Err(ConfigError::UnknownAction {
                action: action.to_string(),
                resource: self.resource_type.clone(),
            }
            .into()),
        }
    }

    /// Authorize `target` for `action` (the current action when `None`), then run `work` in a
    /// transaction: committed when it succeeds, rolled back when it fails.
    pub async fn authorized_transaction<F, Fut, T>(
        &self,
        target: Record,
        action: Option<&str>,
        work: F,
    ) -> Result<T, ApiError>
    where
        F: FnOnce(Arc<dyn Transaction>, Record) -> Fut + Send,
        Fut: Future<Output = Result<T, ApiError>> + Send,
        T: Send,
    {
        let action = action.unwrap_or(self.action_context.action.as_str());
        self.registry
            .authorizer()
            .authorize(self.actor(), &target, action)
            .await?;

        let tx = self.registry.transactor()?.begin().await?;
        match work(tx.clone(), target).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    log_exception(&rollback_err, true, self.registry.reporter());
                }
                Err(err)
            }
        }
    }
}

/// Perform `action` on `resource_type` outside of an HTTP request.
pub async fn perform_action(
    registry: &Arc<Registry>,
    resource_type: &str,
    action: &str,
    opts: PerformOptions,
) -> Result<ResultEnvelope, ApiError> {
    let mut rsp = ActionResponder::new(registry.clone(), resource_type);
    rsp.perform(action, opts).await
}

/// Built-in `index`: the scope responder's result for the request.
struct IndexAction;

#[async_trait]
impl ClassAction for IndexAction {
    async fn call(&self, rsp: &mut ActionResponder) -> Result<ActionOutput, ApiError> {
        let scope = rsp.scope_responder();
        Ok(ActionOutput::Envelope(scope.into_result().await?))
    }
}

/// Built-in `create`: the save action on a blank instance.
struct CreateAction;

#[async_trait]
impl ClassAction for CreateAction {
    async fn call(&self, rsp: &mut ActionResponder) -> Result<ActionOutput, ApiError> {
        let instance = Record::new(rsp.resource_type());
        let save = rsp.registry().config().default_save_action.clone();
        let ctx = rsp.take_request_context();
        let env = rsp
            .perform(&save, PerformOptions::new().instance(instance).request_context(ctx))
            .await?;
        Ok(ActionOutput::Envelope(env))
    }
}
