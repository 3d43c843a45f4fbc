//! In-memory store: tables of records with closure-defined scopes, sorts and associations.
//!
//! Every query bumps a per-table counter so callers can assert when the store was (not) touched.

use super::{Authorizer, Relation, ScopeArgs, Transaction, Transactor};
use crate::context::{Actor, RequestContext};
use crate::error::{ApiError, ConfigError, RequestError};
use crate::record::Record;
use crate::responder::ScopeProvider;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{self, AtomicI64, AtomicUsize};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

pub type RowPredicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;
pub type ScopeFn = Arc<dyn Fn(&ScopeArgs) -> Result<RowPredicate, ApiError> + Send + Sync>;
pub type SortFn = Arc<dyn Fn(&Record, &Record) -> Ordering + Send + Sync>;
pub type AssociationFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

fn id_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct TableInner {
    resource_type: String,
    rows: RwLock<Vec<Record>>,
    next_id: AtomicI64,
    scopes: HashMap<String, ScopeFn>,
    sorts: HashMap<String, SortFn>,
    associations: HashMap<String, AssociationFn>,
    queries: AtomicUsize,
}

#[derive(Clone)]
pub struct MemoryTable {
    inner: Arc<TableInner>,
}

pub struct MemoryTableBuilder {
    resource_type: String,
    rows: Vec<Record>,
    scopes: HashMap<String, ScopeFn>,
    sorts: HashMap<String, SortFn>,
    associations: HashMap<String, AssociationFn>,
}

impl MemoryTableBuilder {
    /// Seed a row. Rows without an `id` get the next integer id.
    pub fn row(mut self, attributes: Value) -> Self {
        let attributes = match attributes {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        self.rows.push(Record::with_attributes(self.resource_type.clone(), attributes));
        self
    }

    pub fn scope<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&ScopeArgs) -> Result<RowPredicate, ApiError> + Send + Sync + 'static,
    {
        self.scopes.insert(name.to_string(), Arc::new(f));
        self
    }

    /// Scope matching `attribute` against the argument named like it (or the first positional one).
    /// An array argument matches any of its values.
    pub fn equals_scope(self, name: &str, attribute: &str) -> Self {
        let attribute = attribute.to_string();
        self.scope(name, move |args| {
            let wanted: Vec<Value> = match args.value(&attribute) {
                Some(Value::Array(items)) => items.clone(),
                Some(v) => vec![v.clone()],
                None => Vec::new(),
            };
            let attribute = attribute.clone();
            let predicate: RowPredicate = Arc::new(move |r: &Record| {
                r.get(&attribute).map(|v| wanted.contains(v)).unwrap_or(false)
            });
            Ok(predicate)
        })
    }

    /// Argument-less scope keeping rows where `f` holds.
    pub fn flag_scope<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        let f: RowPredicate = Arc::new(f);
        self.scope(name, move |_| Ok(f.clone()))
    }

    pub fn sort_by(mut self, name: &str, attribute: &str, descending: bool) -> Self {
        let attribute = attribute.to_string();
        let f: SortFn = Arc::new(move |a: &Record, b: &Record| {
            let ord = compare_values(a.get(&attribute), b.get(&attribute));
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        self.sorts.insert(name.to_string(), f);
        self
    }

    pub fn association<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.associations.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn build(self) -> MemoryTable {
        let mut next = 1;
        let mut rows = self.rows;
        for row in &rows {
            if let Some(n) = row.id().and_then(Value::as_i64) {
                next = next.max(n + 1);
            }
        }
        for row in rows.iter_mut().filter(|r| r.is_new()) {
            row.set("id", next);
            next += 1;
        }
        MemoryTable {
            inner: Arc::new(TableInner {
                resource_type: self.resource_type,
                rows: RwLock::new(rows),
                next_id: AtomicI64::new(next),
                scopes: self.scopes,
                sorts: self.sorts,
                associations: self.associations,
                queries: AtomicUsize::new(0),
            }),
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

impl MemoryTable {
    pub fn builder(resource_type: impl Into<String>) -> MemoryTableBuilder {
        MemoryTableBuilder {
            resource_type: resource_type.into(),
            rows: Vec::new(),
            scopes: HashMap::new(),
            sorts: HashMap::new(),
            associations: HashMap::new(),
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.inner.resource_type
    }

    /// Unfiltered relation over the table.
    pub fn relation(&self) -> MemoryRelation {
        MemoryRelation {
            table: self.clone(),
            predicates: Vec::new(),
            sort: None,
            includes: Vec::new(),
        }
    }

    /// Number of queries run against this table so far.
    pub fn query_count(&self) -> usize {
        self.inner.queries.load(atomic::Ordering::SeqCst)
    }

    pub fn rows(&self) -> Vec<Record> {
        self.inner
            .rows
            .read()
            .map(|rows| rows.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn get(&self, id: &Value) -> Option<Record> {
        let key = id_key(id);
        self.rows().into_iter().find(|r| r.id().map(id_key).as_deref() == Some(key.as_str()))
    }

    fn allocate_id(&self) -> i64 {
        self.inner.next_id.fetch_add(1, atomic::Ordering::SeqCst)
    }

    fn apply(&self, write: Write) {
        let mut rows = self
            .inner
            .rows
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match write {
            Write::Save(record) => {
                let key = record.id().map(id_key);
                match rows.iter_mut().find(|r| r.id().map(id_key) == key) {
                    Some(existing) => *existing = record,
                    None => rows.push(record),
                }
            }
            Write::Delete(id) => {
                let key = id_key(&id);
                rows.retain(|r| r.id().map(id_key).as_deref() != Some(key.as_str()));
            }
        }
    }
}

impl ScopeProvider for MemoryTable {
    fn accessible_scope(&self, _ctx: &RequestContext) -> Result<Box<dyn Relation>, ApiError> {
        Ok(Box::new(self.relation()))
    }
}

#[derive(Clone)]
pub struct MemoryRelation {
    table: MemoryTable,
    predicates: Vec<RowPredicate>,
    sort: Option<SortFn>,
    includes: Vec<String>,
}

impl MemoryRelation {
    /// Keep only rows where `f` holds.
    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(f));
        self
    }

    fn matching(&self) -> Vec<Record> {
        self.table.inner.queries.fetch_add(1, atomic::Ordering::SeqCst);
        self.table
            .rows()
            .into_iter()
            .filter(|r| self.predicates.iter().all(|p| p(r)))
            .collect()
    }

    fn load_associations(&self, mut record: Record) -> Record {
        for name in &self.includes {
            if let Some(f) = self.table.inner.associations.get(name) {
                let value = f(&record);
                record.set(name.clone(), value);
            }
        }
        record
    }
}

#[async_trait]
impl Relation for MemoryRelation {
    fn resource_type(&self) -> &str {
        self.table.resource_type()
    }

    fn preload(mut self: Box<Self>, includes: &[String]) -> Result<Box<dyn Relation>, ApiError> {
        // unknown associations are skipped, not rejected
        for name in includes {
            let root = name.split('.').next().unwrap_or(name);
            if self.table.inner.associations.contains_key(root) && !self.includes.iter().any(|i| i == root) {
                self.includes.push(root.to_string());
            }
        }
        Ok(self)
    }

    fn apply_scope(mut self: Box<Self>, name: &str, args: &ScopeArgs) -> Result<Box<dyn Relation>, ApiError> {
        let scope = self.table.inner.scopes.get(name).cloned().ok_or_else(|| {
            ConfigError::UnknownOperation {
                kind: "scope",
                name: name.to_string(),
                resource: self.table.resource_type().to_string(),
            }
        })?;
        self.predicates.push(scope(args)?);
        Ok(self)
    }

    fn apply_sort(mut self: Box<Self>, name: &str) -> Result<Box<dyn Relation>, ApiError> {
        let sort = self.table.inner.sorts.get(name).cloned().ok_or_else(|| {
            ConfigError::UnknownOperation {
                kind: "sort",
                name: name.to_string(),
                resource: self.table.resource_type().to_string(),
            }
        })?;
        self.sort = Some(sort);
        Ok(self)
    }

    async fn find(&self, id: &Value) -> Result<Option<Record>, ApiError> {
        let key = id_key(id);
        Ok(self
            .matching()
            .into_iter()
            .find(|r| r.id().map(id_key).as_deref() == Some(key.as_str()))
            .map(|r| self.load_associations(r)))
    }

    async fn fetch(&self, limit: u64, offset: u64) -> Result<Vec<Record>, ApiError> {
        let mut rows = self.matching();
        match &self.sort {
            Some(sort) => rows.sort_by(|a, b| sort(a, b)),
            None => rows.sort_by(|a, b| compare_values(a.id(), b.id())),
        }
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|r| self.load_associations(r))
            .collect())
    }

    async fn count_distinct(&self) -> Result<u64, ApiError> {
        Ok(self.matching().len() as u64)
    }
}

enum Write {
    Save(Record),
    Delete(Value),
}

/// Transactor over a set of memory tables. Writes are buffered until commit; every step is logged.
#[derive(Clone, Default)]
pub struct MemoryTransactor {
    tables: HashMap<String, MemoryTable>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MemoryTransactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: MemoryTable) -> Self {
        self.tables.insert(table.resource_type().to_string(), table);
        self
    }

    /// `begin`, `commit` and `rollback` in the order they happened.
    pub fn log(&self) -> Vec<String> {
        lock(&self.log).clone()
    }
}

#[async_trait]
impl Transactor for MemoryTransactor {
    async fn begin(&self) -> Result<Arc<dyn Transaction>, ApiError> {
        lock(&self.log).push("begin".into());
        Ok(Arc::new(MemoryTransaction {
            tables: self.tables.clone(),
            pending: Mutex::new(Vec::new()),
            log: self.log.clone(),
        }))
    }
}

pub struct MemoryTransaction {
    tables: HashMap<String, MemoryTable>,
    pending: Mutex<Vec<(MemoryTable, Write)>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MemoryTransaction {
    fn table(&self, resource_type: &str) -> Result<&MemoryTable, ApiError> {
        self.tables.get(resource_type).ok_or_else(|| {
            RequestError::api(format!("no table is registered for {}", resource_type)).into()
        })
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn save(&self, record: &mut Record) -> Result<(), ApiError> {
        let table = self.table(&record.resource_type)?.clone();
        if record.is_new() {
            record.set("id", table.allocate_id());
        }
        lock(&self.pending).push((table, Write::Save(record.clone())));
        Ok(())
    }

    async fn delete(&self, record: &Record) -> Result<(), ApiError> {
        let table = self.table(&record.resource_type)?.clone();
        let id = record.id().cloned().ok_or_else(RequestError::not_found)?;
        lock(&self.pending).push((table, Write::Delete(id)));
        Ok(())
    }

    async fn commit(&self) -> Result<(), ApiError> {
        let writes: Vec<_> = lock(&self.pending).drain(..).collect();
        for (table, write) in writes {
            table.apply(write);
        }
        lock(&self.log).push("commit".into());
        Ok(())
    }

    async fn rollback(&self) -> Result<(), ApiError> {
        lock(&self.pending).clear();
        lock(&self.log).push("rollback".into());
        Ok(())
    }
}

/// Authorizer backed by a closure.
pub struct FnAuthorizer<F>(pub F);

#[async_trait]
impl<F> Authorizer for FnAuthorizer<F>
where
    F: Fn(Option<&Actor>, &Record, &str) -> Result<(), ApiError> + Send + Sync,
{
    async fn authorize(&self, actor: Option<&Actor>, target: &Record, action: &str) -> Result<(), ApiError> {
        (self.0)(actor, target, action)
    }
}
