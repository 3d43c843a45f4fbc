//! Collaborator seams to the data store and the authorization policy.

pub mod memory;
pub mod pg;

use crate::context::Actor;
use crate::error::{ApiError, RequestError};
use crate::record::Record;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Arguments a named scope is invoked with.
#[derive(Clone, Debug, PartialEq)]
pub enum ScopeArgs {
    None,
    Keyed(Map<String, Value>),
    Positional(Vec<Value>),
}

impl ScopeArgs {
    /// Blank values mean no arguments; objects are keyed; arrays and scalars are positional.
    pub fn from_value(value: &Value) -> Self {
        if crate::params::is_blank(value) {
            return ScopeArgs::None;
        }
        match value {
            Value::Object(m) => ScopeArgs::Keyed(m.clone()),
            Value::Array(items) => ScopeArgs::Positional(items.clone()),
            scalar => ScopeArgs::Positional(vec![scalar.clone()]),
        }
    }

    /// Keyed value by name, else the first positional value.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self {
            ScopeArgs::None => None,
            ScopeArgs::Keyed(m) => m.get(name),
            ScopeArgs::Positional(items) => items.first(),
        }
    }
}

/// A composable query over one resource type. Narrowing consumes the relation and returns the new one.
#[async_trait]
pub trait Relation: Send + Sync {
    fn resource_type(&self) -> &str;

    /// Eager-load the named associations.
    fn preload(self: Box<Self>, includes: &[String]) -> Result<Box<dyn Relation>, ApiError>;

    /// Narrow by a named filter.
    fn apply_scope(self: Box<Self>, name: &str, args: &ScopeArgs) -> Result<Box<dyn Relation>, ApiError>;

    fn apply_sort(self: Box<Self>, name: &str) -> Result<Box<dyn Relation>, ApiError>;

    async fn find(&self, id: &Value) -> Result<Option<Record>, ApiError>;

    async fn fetch(&self, limit: u64, offset: u64) -> Result<Vec<Record>, ApiError>;

    /// Count of distinct primary keys, ignoring ordering and eager loads.
    async fn count_distinct(&self) -> Result<u64, ApiError>;
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// `Ok` to allow; any error denies.
    async fn authorize(&self, actor: Option<&Actor>, target: &Record, action: &str) -> Result<(), ApiError>;
}

pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _actor: Option<&Actor>, _target: &Record, _action: &str) -> Result<(), ApiError> {
        Ok(())
    }
}

/// Denies when there is no actor.
pub struct RequireActor;

#[async_trait]
impl Authorizer for RequireActor {
    async fn authorize(&self, actor: Option<&Actor>, _target: &Record, _action: &str) -> Result<(), ApiError> {
        match actor {
            Some(_) => Ok(()),
            None => Err(RequestError::unauthorized().into()),
        }
    }
}

/// An open store transaction. Writes through it become visible on commit.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Insert when the record has no id, else update. Assigned ids and defaults are written back.
    async fn save(&self, record: &mut Record) -> Result<(), ApiError>;

    async fn delete(&self, record: &Record) -> Result<(), ApiError>;

    async fn commit(&self) -> Result<(), ApiError>;

    async fn rollback(&self) -> Result<(), ApiError>;
}

#[async_trait]
pub trait Transactor: Send + Sync {
    async fn begin(&self) -> Result<Arc<dyn Transaction>, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scope_args_shapes() {
        assert_eq!(ScopeArgs::from_value(&json!(null)), ScopeArgs::None);
        assert_eq!(ScopeArgs::from_value(&json!({})), ScopeArgs::None);
        assert_eq!(ScopeArgs::from_value(&json!("open")), ScopeArgs::Positional(vec![json!("open")]));
        let keyed = ScopeArgs::from_value(&json!({"status": "open"}));
        assert_eq!(keyed.value("status"), Some(&json!("open")));
        assert_eq!(ScopeArgs::from_value(&json!([1, 2])).value("ignored"), Some(&json!(1)));
    }
}
