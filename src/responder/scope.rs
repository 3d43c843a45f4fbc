//! Query building: filters, sort and pagination resolved against published docs, then run on the store.

use crate::context::{Actor, RequestContext};
use crate::error::{ApiError, ConfigError, RequestError};
use crate::params::process_params_with_api_doc;
use crate::record::Record;
use crate::registry::Registry;
use crate::response::{EnvelopeData, ResultEnvelope};
use crate::store::{Relation, ScopeArgs};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Per-resource-type hook supplying the base relation the actor may see.
pub trait ScopeProvider: Send + Sync {
    fn accessible_scope(&self, ctx: &RequestContext) -> Result<Box<dyn Relation>, ApiError>;

    /// Filters applied before the request's own. Request filters of the same name win.
    fn default_selectors(&self, _ctx: &RequestContext) -> Map<String, Value> {
        Map::new()
    }

    /// Overrides the configured max limit.
    fn max_limit(&self) -> Option<u64> {
        None
    }
}

/// Used for resource types with no registered provider.
pub(crate) struct MissingScope(pub String);

impl ScopeProvider for MissingScope {
    fn accessible_scope(&self, _ctx: &RequestContext) -> Result<Box<dyn Relation>, ApiError> {
        Err(ConfigError::MissingScope(self.0.clone()).into())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
    /// `limit=0` asked for every record; `limit` then holds the max limit.
    pub all: bool,
}

impl Pagination {
    pub fn compute(limit: Option<i64>, page: i64, default_limit: u64, max_limit: u64) -> Result<Self, ApiError> {
        let requested = limit.unwrap_or(default_limit as i64);
        if requested < 0 || requested as u64 > max_limit {
            return Err(RequestError::invalid_param(format!(
                "Limit must be between 0 and {}.",
                max_limit
            ))
            .with_meta("attribute", "limit")
            .into());
        }
        let (limit, all) = match requested as u64 {
            0 => (max_limit, true),
            n => (n, false),
        };
        let page = page.max(1) as u64;
        // the offset is bound as a signed bigint by SQL stores
        let offset = (page - 1)
            .checked_mul(limit)
            .filter(|offset| *offset <= i64::MAX as u64)
            .ok_or_else(|| {
                RequestError::invalid_param(format!("Page must be at most {}.", i64::MAX as u64 / limit.max(1) + 1))
                    .with_meta("attribute", "page")
            })?;
        Ok(Pagination { limit, offset, all })
    }
}

/// Resolved query directives. Built from the request context without mutating it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryPlan {
    /// Provider defaults not overridden by the request, passed through unchecked.
    pub defaults: Vec<(String, Value)>,
    /// Request filter name and its coerced arguments, in application order.
    pub filters: Vec<(String, Value)>,
    pub sort: Option<String>,
    pub includes: Vec<String>,
}

pub struct ScopeResponder<'a> {
    registry: &'a Registry,
    resource_type: String,
    provider: Arc<dyn ScopeProvider>,
    ctx: &'a RequestContext,
    pagination: Option<Pagination>,
    result: Option<ResultEnvelope>,
}

impl<'a> ScopeResponder<'a> {
    pub fn new(registry: &'a Registry, resource_type: &str, ctx: &'a RequestContext) -> Self {
        ScopeResponder {
            registry,
            resource_type: resource_type.to_string(),
            provider: registry.scope_provider(resource_type),
            ctx,
            pagination: None,
            result: None,
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn request_context(&self) -> &RequestContext {
        self.ctx
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.ctx.actor()
    }

    pub fn max_limit(&self) -> u64 {
        self.provider
            .max_limit()
            .unwrap_or(self.registry.config().max_limit)
    }

    /// Provider defaults the request does not override. Server-chosen, so they need no published doc.
    pub fn default_selectors(&self) -> Vec<(String, Value)> {
        let requested = self.ctx.filters();
        self.provider
            .default_selectors(self.ctx)
            .into_iter()
            .filter(|(name, _)| !requested.is_some_and(|f| f.contains_key(name)))
            .collect()
    }

    /// Validate the request's sort and filters against published docs and coerce filter arguments.
    /// Fails before any store access when a directive has no doc.
    pub fn process_request_context(&self) -> Result<QueryPlan, ApiError> {
        let docs = self.registry.docs();
        let sort = match self.ctx.sort() {
            Some(name) => {
                if docs.find_sort(&self.resource_type, name).is_none() {
                    return Err(ConfigError::MissingDoc {
                        kind: "sort",
                        name: name.to_string(),
                        resource: self.resource_type.clone(),
                    }
                    .into());
                }
                Some(name.to_string())
            }
            None => None,
        };

        let mut filters = Vec::new();
        let requested = self.ctx.filters().cloned().unwrap_or_default();
        for (name, args) in requested {
            let doc = docs
                .find_scope(&self.resource_type, &name)
                .ok_or_else(|| ConfigError::MissingDoc {
                    kind: "filter",
                    name: name.clone(),
                    resource: self.resource_type.clone(),
                })?;

            let mut keyed = match args {
                Value::Object(m) => m,
                other => {
                    let mut m = Map::new();
                    if let Some(first) = doc.params().first() {
                        m.insert(first.name.clone(), other);
                    }
                    m
                }
            };
            for param in doc.params() {
                if let (false, Some(default)) = (keyed.contains_key(&param.name), &param.meta.default) {
                    keyed.insert(param.name.clone(), default.clone());
                }
            }
            let coerced = process_params_with_api_doc(&keyed, doc)?;
            keyed.extend(coerced);

            let value = match doc.single_param() {
                Some(only) if !only.meta.with_key => keyed.get(&only.name).cloned().unwrap_or(Value::Null),
                _ => Value::Object(keyed),
            };
            filters.push((name, value));
        }

        Ok(QueryPlan {
            defaults: self.default_selectors(),
            filters,
            sort,
            includes: self.ctx.includes(),
        })
    }

    /// Memoized for the life of the responder.
    pub fn pagination(&mut self) -> Result<Pagination, ApiError> {
        if let Some(p) = self.pagination {
            return Ok(p);
        }
        let p = Pagination::compute(
            self.ctx.limit(),
            self.ctx.page(),
            self.registry.config().default_limit,
            self.max_limit(),
        )?;
        self.pagination = Some(p);
        Ok(p)
    }

    /// Base relation (or the accessible scope), eager loads, default selectors and then request
    /// filters folded in order, then sort.
    pub fn build_relation(
        &self,
        plan: &QueryPlan,
        base: Option<Box<dyn Relation>>,
    ) -> Result<Box<dyn Relation>, ApiError> {
        let mut rel = match base {
            Some(rel) => rel,
            None => self.provider.accessible_scope(self.ctx)?,
        };
        if !plan.includes.is_empty() {
            rel = rel.preload(&plan.includes)?;
        }
        for (name, args) in plan.defaults.iter().chain(&plan.filters) {
            rel = rel.apply_scope(name, &ScopeArgs::from_value(args))?;
        }
        if let Some(sort) = &plan.sort {
            rel = rel.apply_sort(sort)?;
        }
        Ok(rel)
    }

    pub async fn build_result(&mut self) -> Result<ResultEnvelope, ApiError> {
        let plan = self.process_request_context()?;

        if let Some(id) = self.ctx.id() {
            let rel = self.build_relation(&plan, None)?;
            return Ok(match rel.find(id).await? {
                Some(record) => ResultEnvelope::ok(record),
                None => ResultEnvelope::failure(RequestError::not_found()),
            });
        }

        let pagination = self.pagination()?;
        let rel = self.build_relation(&plan, None)?;
        let records = rel.fetch(pagination.limit, pagination.offset).await?;
        let count = rel.count_distinct().await?;
        let pages_count = count.div_ceil(pagination.limit.max(1));

        let params = self.ctx.params();
        let data = if params.contains_key("first") {
            records.into_iter().next().map(EnvelopeData::One)
        } else if params.contains_key("last") {
            records.into_iter().last().map(EnvelopeData::One)
        } else {
            Some(EnvelopeData::Many(records))
        };

        let mut envelope = ResultEnvelope {
            success: data.is_some(),
            data,
            ..Default::default()
        };
        if pagination.all && count > self.max_limit() {
            envelope.error = Some(
                RequestError::invalid_param(format!(
                    "Requested all records, but there are more than max_limit: {}.",
                    self.max_limit()
                ))
                .into(),
            );
        }
        if envelope.data.is_none() && envelope.error.is_none() {
            envelope.error = Some(RequestError::not_found().into());
        }
        envelope.meta.insert("count".into(), Value::from(count));
        envelope.meta.insert("pages_count".into(), Value::from(pages_count));
        envelope.meta.insert("page".into(), Value::from(self.ctx.page().max(1)));
        Ok(envelope)
    }

    /// Memoized result; `reload` rebuilds it.
    pub async fn result(&mut self, reload: bool) -> Result<&ResultEnvelope, ApiError> {
        if reload || self.result.is_none() {
            let built = self.build_result().await?;
            self.result = Some(built);
        }
        self.result
            .as_ref()
            .ok_or_else(|| RequestError::api("scope result was not built").into())
    }

    pub async fn into_result(mut self) -> Result<ResultEnvelope, ApiError> {
        match self.result.take() {
            Some(result) => Ok(result),
            None => self.build_result().await,
        }
    }

    /// The single record of the result, if it holds one.
    pub async fn item(&mut self) -> Result<Option<Record>, ApiError> {
        let result = self.result(false).await?;
        Ok(result.data.as_ref().and_then(EnvelopeData::as_record).cloned())
    }

    pub async fn items(&mut self) -> Result<Vec<Record>, ApiError> {
        let result = self.result(false).await?;
        Ok(match &result.data {
            Some(EnvelopeData::Many(records)) => records.clone(),
            Some(EnvelopeData::One(record)) => vec![record.clone()],
            _ => Vec::new(),
        })
    }

    pub async fn count(&mut self) -> Result<Option<u64>, ApiError> {
        let result = self.result(false).await?;
        Ok(result.meta.get("count").and_then(Value::as_u64))
    }
}
