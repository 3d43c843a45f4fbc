//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE for a [`PgTable`].

use crate::store::pg::{IncludeDirection, PgInclude, PgTable};
use serde_json::{Map, Value};

pub const MAIN_ALIAS: &str = "main";

/// Quote identifier for PostgreSQL (safe: identifiers come from table definitions only).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Push a value and return its placeholder, cast when the column type is known (e.g. `$2::timestamptz`).
    pub fn placeholder(&mut self, v: Value, pg_type: Option<&str>) -> String {
        let n = self.push_param(v);
        match pg_type {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

/// Column expression; custom enums (schema.typename) and numeric come back as text so sqlx returns String.
fn column_expr(alias: Option<&str>, name: &str, pg_type: Option<&str>) -> String {
    let q = match alias {
        Some(a) => format!("{}.{}", a, quoted(name)),
        None => quoted(name),
    };
    let pg_type = pg_type.unwrap_or("");
    if pg_type.contains('.') || pg_type == "numeric" {
        format!("{}::text", q)
    } else {
        q
    }
}

fn select_column_list(table: &PgTable) -> String {
    table
        .columns
        .iter()
        .map(|c| column_expr(None, &c.name, c.pg_type.as_deref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Main columns aliased under `main`, plus one scalar subquery per include
/// (row_to_json for to_one, json_agg for to_many).
pub fn select_list_with_includes(table: &PgTable, includes: &[&PgInclude]) -> String {
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} AS {}", column_expr(Some(MAIN_ALIAS), &c.name, c.pg_type.as_deref()), quoted(&c.name)))
        .collect();
    for inc in includes {
        let rel_table = qualified_table(&inc.related.schema, &inc.related.table);
        let rel_cols = select_column_list(&inc.related);
        let sub_from = format!(
            "{} WHERE {} = {}.{}",
            rel_table,
            quoted(&inc.their_key),
            MAIN_ALIAS,
            quoted(&inc.our_key)
        );
        let subquery = match inc.direction {
            IncludeDirection::ToOne => format!(
                "(SELECT row_to_json(sub) FROM (SELECT {} FROM {} LIMIT 1) sub)",
                rel_cols, sub_from
            ),
            IncludeDirection::ToMany => format!(
                "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT {} FROM {}) sub)",
                rel_cols, sub_from
            ),
        };
        parts.push(format!("{} AS {}", subquery, quoted(&inc.name)));
    }
    parts.join(", ")
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        let wrapped: Vec<String> = conditions.iter().map(|c| format!("({})", c)).collect();
        format!(" WHERE {}", wrapped.join(" AND "))
    }
}

/// SELECT with includes, conditions (already rendered into `q`), ORDER BY sort or pk, LIMIT/OFFSET.
pub fn select(
    q: &mut QueryBuf,
    table: &PgTable,
    includes: &[&PgInclude],
    conditions: &[String],
    order_by: Option<&str>,
    limit: Option<u64>,
    offset: Option<u64>,
) {
    let order = order_by
        .map(String::from)
        .unwrap_or_else(|| format!("{}.{}", MAIN_ALIAS, quoted(&table.pk)));
    let limit_clause = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} {}{} ORDER BY {}{}{}",
        select_list_with_includes(table, includes),
        qualified_table(&table.schema, &table.table),
        MAIN_ALIAS,
        where_clause(conditions),
        order,
        limit_clause,
        offset_clause
    );
}

/// Condition matching the primary key of `main`.
pub fn pk_condition(q: &mut QueryBuf, table: &PgTable, id: &Value) -> String {
    let ph = q.placeholder(id.clone(), table.column_type(&table.pk));
    format!("{}.{} = {}", MAIN_ALIAS, quoted(&table.pk), ph)
}

/// Minimal, unordered count of distinct primary keys.
pub fn count_distinct(q: &mut QueryBuf, table: &PgTable, conditions: &[String]) {
    q.sql = format!(
        "SELECT COUNT(DISTINCT {}.{}) FROM {} {}{}",
        MAIN_ALIAS,
        quoted(&table.pk),
        qualified_table(&table.schema, &table.table),
        MAIN_ALIAS,
        where_clause(conditions)
    );
}

/// INSERT the known columns present in `attrs`. A null or missing pk is left to the database default.
pub fn insert(table: &PgTable, attrs: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &table.columns {
        let Some(val) = attrs.get(&c.name) else { continue };
        if c.name == table.pk && val.is_null() {
            continue;
        }
        placeholders.push(q.placeholder(val.clone(), c.pg_type.as_deref()));
        cols.push(quoted(&c.name));
    }
    let target = qualified_table(&table.schema, &table.table);
    let returning = select_column_list(table);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", target, returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            target,
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE by id: SET only known columns present in `attrs`. Touches `updated_at` when the table has one.
pub fn update(table: &PgTable, id: &Value, attrs: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let target = qualified_table(&table.schema, &table.table);
    let mut sets = Vec::new();
    for (k, v) in attrs {
        if *k == table.pk || k == "updated_at" {
            continue;
        }
        let Some(c) = table.column(k) else { continue };
        let rhs = q.placeholder(v.clone(), c.pg_type.as_deref());
        sets.push(format!("{} = {}", quoted(k), rhs));
    }
    if table.column("updated_at").is_some() {
        sets.push(format!("{} = NOW()", quoted("updated_at")));
    }
    let returning = select_column_list(table);
    if sets.is_empty() {
        let ph = q.placeholder(id.clone(), table.column_type(&table.pk));
        q.sql = format!("SELECT {} FROM {} WHERE {} = {}", returning, target, quoted(&table.pk), ph);
        return q;
    }
    let id_ph = q.placeholder(id.clone(), table.column_type(&table.pk));
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        target,
        sets.join(", "),
        quoted(&table.pk),
        id_ph,
        returning
    );
    q
}

/// DELETE by id.
pub fn delete(table: &PgTable, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(id.clone(), table.column_type(&table.pk));
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        qualified_table(&table.schema, &table.table),
        quoted(&table.pk),
        ph
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn users() -> Arc<PgTable> {
        PgTable::builder("User", "app", "users")
            .typed_column("id", "bigint")
            .column("name")
            .typed_column("balance", "numeric")
            .typed_column("updated_at", "timestamptz")
            .build()
    }

    fn posts(author: Arc<PgTable>) -> Arc<PgTable> {
        PgTable::builder("Post", "app", "posts")
            .typed_column("id", "bigint")
            .column("title")
            .typed_column("user_id", "bigint")
            .include_one("author", author, "user_id", "id")
            .build()
    }

    #[test]
    fn select_with_include_and_conditions() {
        let table = posts(users());
        let mut q = QueryBuf::new();
        let ph = q.placeholder(json!("hello"), None);
        let cond = format!("{}.{} = {}", MAIN_ALIAS, quoted("title"), ph);
        let includes: Vec<&PgInclude> = table.includes.iter().collect();
        select(&mut q, &table, &includes, &[cond], None, Some(10), Some(20));
        assert_eq!(
            q.sql,
            "SELECT main.\"id\" AS \"id\", main.\"title\" AS \"title\", main.\"user_id\" AS \"user_id\", \
             (SELECT row_to_json(sub) FROM (SELECT \"id\", \"name\", \"balance\"::text, \"updated_at\" \
             FROM \"app\".\"users\" WHERE \"id\" = main.\"user_id\" LIMIT 1) sub) AS \"author\" \
             FROM \"app\".\"posts\" main WHERE (main.\"title\" = $1) ORDER BY main.\"id\" LIMIT 10 OFFSET 20"
        );
        assert_eq!(q.params, vec![json!("hello")]);
    }

    #[test]
    fn count_is_distinct_and_unordered() {
        let table = users();
        let mut q = QueryBuf::new();
        count_distinct(&mut q, &table, &[]);
        assert_eq!(q.sql, "SELECT COUNT(DISTINCT main.\"id\") FROM \"app\".\"users\" main");
    }

    #[test]
    fn insert_skips_null_pk_and_unknown_columns() {
        let table = users();
        let attrs = json!({"id": null, "name": "Ada", "nickname": "x"});
        let q = insert(&table, attrs.as_object().unwrap());
        assert_eq!(
            q.sql,
            "INSERT INTO \"app\".\"users\" (\"name\") VALUES ($1) RETURNING \"id\", \"name\", \"balance\"::text, \"updated_at\""
        );
        assert_eq!(q.params, vec![json!("Ada")]);
    }

    #[test]
    fn update_touches_updated_at() {
        let table = users();
        let attrs = json!({"id": 4, "name": "Ada"});
        let q = update(&table, &json!(4), attrs.as_object().unwrap());
        assert_eq!(
            q.sql,
            "UPDATE \"app\".\"users\" SET \"name\" = $1, \"updated_at\" = NOW() WHERE \"id\" = $2::bigint \
             RETURNING \"id\", \"name\", \"balance\"::text, \"updated_at\""
        );
        assert_eq!(q.params, vec![json!("Ada"), json!(4)]);
    }
}
