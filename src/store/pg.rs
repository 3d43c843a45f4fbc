//! PostgreSQL store over sqlx: table definitions with named scopes, sorts and includes.

use super::{Relation, ScopeArgs, Transaction, Transactor};
use crate::context::RequestContext;
use crate::error::{ApiError, ConfigError, RequestError};
use crate::record::Record;
use crate::responder::ScopeProvider;
use crate::sql::{self, PgBindValue, QueryBuf, MAIN_ALIAS};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Renders one condition into the query, pushing its bind values. The result is ANDed with the others.
pub type PgScopeFn = Arc<dyn Fn(&mut QueryBuf, &ScopeArgs) -> Result<String, ApiError> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct PgColumn {
    pub name: String,
    pub pg_type: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncludeDirection {
    ToOne,
    ToMany,
}

/// Association loaded as a JSON scalar subquery.
#[derive(Clone)]
pub struct PgInclude {
    pub name: String,
    pub direction: IncludeDirection,
    pub related: Arc<PgTable>,
    pub our_key: String,
    pub their_key: String,
}

pub struct PgTable {
    pub resource_type: String,
    pub schema: String,
    pub table: String,
    pub pk: String,
    pub columns: Vec<PgColumn>,
    pub includes: Vec<PgInclude>,
    scopes: HashMap<String, PgScopeFn>,
    /// name -> ORDER BY expression
    sorts: HashMap<String, String>,
}

impl PgTable {
    pub fn builder(resource_type: &str, schema: &str, table: &str) -> PgTableBuilder {
        PgTableBuilder {
            table: PgTable {
                resource_type: resource_type.to_string(),
                schema: schema.to_string(),
                table: table.to_string(),
                pk: "id".into(),
                columns: Vec::new(),
                includes: Vec::new(),
                scopes: HashMap::new(),
                sorts: HashMap::new(),
            },
        }
    }

    pub fn column(&self, name: &str) -> Option<&PgColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_type(&self, name: &str) -> Option<&str> {
        self.column(name).and_then(|c| c.pg_type.as_deref())
    }

    fn include(&self, name: &str) -> Option<&PgInclude> {
        self.includes.iter().find(|i| i.name == name)
    }
}

pub struct PgTableBuilder {
    table: PgTable,
}

impl PgTableBuilder {
    pub fn primary_key(mut self, pk: &str) -> Self {
        self.table.pk = pk.to_string();
        self
    }

    pub fn column(mut self, name: &str) -> Self {
        self.table.columns.push(PgColumn {
            name: name.to_string(),
            pg_type: None,
        });
        self
    }

    pub fn typed_column(mut self, name: &str, pg_type: &str) -> Self {
        self.table.columns.push(PgColumn {
            name: name.to_string(),
            pg_type: Some(pg_type.to_string()),
        });
        self
    }

    pub fn scope<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&mut QueryBuf, &ScopeArgs) -> Result<String, ApiError> + Send + Sync + 'static,
    {
        self.table.scopes.insert(name.to_string(), Arc::new(f));
        self
    }

    /// `main.<column> = $n`, or `IN (...)` for an array argument. The argument is looked up by the column name.
    pub fn equals_scope(self, name: &str, column: &str) -> Self {
        let column = column.to_string();
        let pg_type = self.table.column_type(&column).map(String::from);
        self.scope(name, move |q, args| {
            let target = format!("{}.{}", MAIN_ALIAS, sql::quoted(&column));
            match args.value(&column) {
                Some(Value::Array(items)) if items.is_empty() => Ok("FALSE".into()),
                Some(Value::Array(items)) => {
                    let phs: Vec<String> = items
                        .iter()
                        .map(|v| q.placeholder(v.clone(), pg_type.as_deref()))
                        .collect();
                    Ok(format!("{} IN ({})", target, phs.join(", ")))
                }
                Some(Value::Null) | None => Ok(format!("{} IS NULL", target)),
                Some(v) => Ok(format!("{} = {}", target, q.placeholder(v.clone(), pg_type.as_deref()))),
            }
        })
    }

    pub fn sort_by(mut self, name: &str, column: &str, descending: bool) -> Self {
        let dir = if descending { "DESC" } else { "ASC" };
        let expr = format!("{}.{} {}", MAIN_ALIAS, sql::quoted(column), dir);
        self.table.sorts.insert(name.to_string(), expr);
        self
    }

    pub fn include_one(self, name: &str, related: Arc<PgTable>, our_key: &str, their_key: &str) -> Self {
        self.include(name, IncludeDirection::ToOne, related, our_key, their_key)
    }

    pub fn include_many(self, name: &str, related: Arc<PgTable>, our_key: &str, their_key: &str) -> Self {
        self.include(name, IncludeDirection::ToMany, related, our_key, their_key)
    }

    fn include(
        mut self,
        name: &str,
        direction: IncludeDirection,
        related: Arc<PgTable>,
        our_key: &str,
        their_key: &str,
    ) -> Self {
        self.table.includes.push(PgInclude {
            name: name.to_string(),
            direction,
            related,
            our_key: our_key.to_string(),
            their_key: their_key.to_string(),
        });
        self
    }

    pub fn build(self) -> Arc<PgTable> {
        Arc::new(self.table)
    }
}

/// A table bound to a pool; registered as the resource type's scope provider.
#[derive(Clone)]
pub struct PgResource {
    pool: PgPool,
    table: Arc<PgTable>,
}

impl PgResource {
    pub fn new(pool: PgPool, table: Arc<PgTable>) -> Self {
        PgResource { pool, table }
    }

    pub fn relation(&self) -> PgRelation {
        PgRelation {
            pool: self.pool.clone(),
            table: self.table.clone(),
            scopes: Vec::new(),
            sort: None,
            includes: Vec::new(),
        }
    }
}

impl ScopeProvider for PgResource {
    fn accessible_scope(&self, _ctx: &RequestContext) -> Result<Box<dyn Relation>, ApiError> {
        Ok(Box::new(self.relation()))
    }
}

#[derive(Clone)]
pub struct PgRelation {
    pool: PgPool,
    table: Arc<PgTable>,
    scopes: Vec<(PgScopeFn, ScopeArgs)>,
    sort: Option<String>,
    includes: Vec<String>,
}

impl PgRelation {
    fn conditions(&self, q: &mut QueryBuf) -> Result<Vec<String>, ApiError> {
        self.scopes.iter().map(|(f, args)| f(q, args)).collect()
    }

    fn loaded_includes(&self) -> Vec<&PgInclude> {
        self.includes
            .iter()
            .filter_map(|name| self.table.include(name))
            .collect()
    }
}

fn unknown(kind: &'static str, name: &str, table: &PgTable) -> ApiError {
    ConfigError::UnknownOperation {
        kind,
        name: name.to_string(),
        resource: table.resource_type.clone(),
    }
    .into()
}

#[async_trait]
impl Relation for PgRelation {
    fn resource_type(&self) -> &str {
        &self.table.resource_type
    }

    fn preload(mut self: Box<Self>, includes: &[String]) -> Result<Box<dyn Relation>, ApiError> {
        // only top-level include names map to subqueries; the rest are skipped
        for name in includes {
            let root = name.split('.').next().unwrap_or(name);
            if self.table.include(root).is_some() && !self.includes.iter().any(|i| i == root) {
                self.includes.push(root.to_string());
            }
        }
        Ok(self)
    }

    fn apply_scope(mut self: Box<Self>, name: &str, args: &ScopeArgs) -> Result<Box<dyn Relation>, ApiError> {
        let f = self
            .table
            .scopes
            .get(name)
            .cloned()
            .ok_or_else(|| unknown("scope", name, &self.table))?;
        self.scopes.push((f, args.clone()));
        Ok(self)
    }

    fn apply_sort(mut self: Box<Self>, name: &str) -> Result<Box<dyn Relation>, ApiError> {
        let expr = self
            .table
            .sorts
            .get(name)
            .cloned()
            .ok_or_else(|| unknown("sort", name, &self.table))?;
        self.sort = Some(expr);
        Ok(self)
    }

    async fn find(&self, id: &Value) -> Result<Option<Record>, ApiError> {
        let mut q = QueryBuf::new();
        let mut conditions = self.conditions(&mut q)?;
        conditions.push(sql::pk_condition(&mut q, &self.table, id));
        sql::select(&mut q, &self.table, &self.loaded_includes(), &conditions, None, Some(1), None);
        let rows = query_many(&self.pool, &q).await?;
        Ok(rows
            .into_iter()
            .next()
            .map(|attrs| Record::with_attributes(self.table.resource_type.clone(), attrs)))
    }

    async fn fetch(&self, limit: u64, offset: u64) -> Result<Vec<Record>, ApiError> {
        let mut q = QueryBuf::new();
        let conditions = self.conditions(&mut q)?;
        sql::select(
            &mut q,
            &self.table,
            &self.loaded_includes(),
            &conditions,
            self.sort.as_deref(),
            Some(limit),
            Some(offset),
        );
        let rows = query_many(&self.pool, &q).await?;
        Ok(rows
            .into_iter()
            .map(|attrs| Record::with_attributes(self.table.resource_type.clone(), attrs))
            .collect())
    }

    async fn count_distinct(&self) -> Result<u64, ApiError> {
        let mut q = QueryBuf::new();
        let conditions = self.conditions(&mut q)?;
        sql::count_distinct(&mut q, &self.table, &conditions);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from(p));
        }
        let n = query.fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }
}

async fn query_many(pool: &PgPool, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, ApiError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from(p));
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows.iter().map(row_to_map).collect())
}

async fn execute_returning_one(conn: &mut PgConnection, q: &QueryBuf) -> Result<Option<Map<String, Value>>, ApiError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from(p));
    }
    let row = query.fetch_optional(&mut *conn).await?;
    Ok(row.map(|r| row_to_map(&r)))
}

fn row_to_map(row: &PgRow) -> Map<String, Value> {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

/// Opens pool transactions; saves and deletes resolve the table by the record's resource type.
#[derive(Clone)]
pub struct PgTransactor {
    pool: PgPool,
    tables: HashMap<String, Arc<PgTable>>,
}

impl PgTransactor {
    pub fn new(pool: PgPool) -> Self {
        PgTransactor {
            pool,
            tables: HashMap::new(),
        }
    }

    pub fn with_table(mut self, table: Arc<PgTable>) -> Self {
        self.tables.insert(table.resource_type.clone(), table);
        self
    }
}

#[async_trait]
impl Transactor for PgTransactor {
    async fn begin(&self) -> Result<Arc<dyn Transaction>, ApiError> {
        let tx = self.pool.begin().await?;
        Ok(Arc::new(PgTransaction {
            tables: self.tables.clone(),
            tx: Mutex::new(Some(tx)),
        }))
    }
}

pub struct PgTransaction {
    tables: HashMap<String, Arc<PgTable>>,
    /// `None` once committed or rolled back.
    tx: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

impl PgTransaction {
    fn table(&self, resource_type: &str) -> Result<Arc<PgTable>, ApiError> {
        self.tables.get(resource_type).cloned().ok_or_else(|| {
            RequestError::api(format!("no table is registered for {}", resource_type)).into()
        })
    }

    fn closed() -> ApiError {
        RequestError::api("transaction is already closed").into()
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn save(&self, record: &mut Record) -> Result<(), ApiError> {
        let table = self.table(&record.resource_type)?;
        let q = match record.id() {
            Some(id) => sql::update(&table, id, &record.attributes),
            None => sql::insert(&table, &record.attributes),
        };
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed)?;
        let row = execute_returning_one(&mut **tx, &q)
            .await?
            .ok_or_else(RequestError::not_found)?;
        for (k, v) in row {
            record.attributes.insert(k, v);
        }
        Ok(())
    }

    async fn delete(&self, record: &Record) -> Result<(), ApiError> {
        let table = self.table(&record.resource_type)?;
        let id = record.id().ok_or_else(RequestError::not_found)?;
        let q = sql::delete(&table, id);
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::closed)?;
        execute_returning_one(&mut **tx, &q).await?;
        Ok(())
    }

    async fn commit(&self) -> Result<(), ApiError> {
        match self.tx.lock().await.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(Self::closed()),
        }
    }

    async fn rollback(&self) -> Result<(), ApiError> {
        match self.tx.lock().await.take() {
            Some(tx) => Ok(tx.rollback().await?),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equals_scope_renders_conditions() {
        let table = PgTable::builder("Ticket", "app", "tickets")
            .typed_column("id", "bigint")
            .column("status")
            .typed_column("priority", "integer")
            .equals_scope("status", "status")
            .equals_scope("priority", "priority")
            .build();
        let status = table.scopes.get("status").cloned().unwrap();
        let priority = table.scopes.get("priority").cloned().unwrap();

        let mut q = QueryBuf::new();
        let a = status(&mut q, &ScopeArgs::Positional(vec![json!("open")])).unwrap();
        let mut keyed = Map::new();
        keyed.insert("priority".into(), json!([1, 2]));
        let b = priority(&mut q, &ScopeArgs::Keyed(keyed)).unwrap();
        assert_eq!(a, "main.\"status\" = $1");
        assert_eq!(b, "main.\"priority\" IN ($2::integer, $3::integer)");
        assert_eq!(q.params, vec![json!("open"), json!(1), json!(2)]);
    }

    #[test]
    fn sort_expressions_are_quoted() {
        let table = PgTable::builder("Ticket", "app", "tickets")
            .column("created_at")
            .sort_by("newest", "created_at", true)
            .build();
        assert_eq!(table.sorts.get("newest").map(String::as_str), Some("main.\"created_at\" DESC"));
    }
}
