//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE and pivot statements from a resource.
//! Identifiers only ever come from the resolved model; values are always parameters.

use crate::config::{Field, FieldType, PivotTable, Resource};
use crate::query::{CompareOp, FindOptions, WhereOptions};
use crate::service::Entity;
use crate::sql::PgBindValue;
use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: only from config).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        Self::default()
    }

    fn push_param(&mut self, v: PgBindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Bind `v` and return its placeholder cast to the column type, e.g. `$2::bigint`.
    fn placeholder(&mut self, v: &Value, type_: FieldType) -> String {
        let n = self.push_param(PgBindValue::for_type(v, type_));
        format!("${}::{}", n, type_.sql_type())
    }
}

/// `"column" AS "field"` for every column field in the projection (all when `fields` is empty).
fn select_column_list(resource: &Resource, fields: &[String]) -> String {
    resource
        .column_fields()
        .filter(|f| fields.is_empty() || fields.contains(&f.name))
        .map(|f| format!("{} AS {}", quoted(&f.column), quoted(&f.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn pk_clause(q: &mut QueryBuf, resource: &Resource, id: &Value) -> String {
    let pk = resource.pk_field();
    let ph = q.placeholder(id, pk.type_);
    format!("{} = {}", quoted(&pk.column), ph)
}

fn compare_sql(q: &mut QueryBuf, field: &Field, op: CompareOp, value: &Value) -> String {
    let col = quoted(&field.column);
    match op {
        CompareOp::Eq if value.is_null() => format!("{} IS NULL", col),
        CompareOp::Ne if value.is_null() => format!("{} IS NOT NULL", col),
        CompareOp::Null => {
            if matches!(value, Value::Bool(false)) {
                format!("{} IS NOT NULL", col)
            } else {
                format!("{} IS NULL", col)
            }
        }
        CompareOp::In | CompareOp::Nin => {
            // Items the column type cannot hold never match.
            let items: Vec<Value> = match value {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            }
            .into_iter()
            .filter(|v| PgBindValue::fits(v, field.type_))
            .collect();
            if items.is_empty() {
                return if op == CompareOp::In { "FALSE".into() } else { "TRUE".into() };
            }
            let phs: Vec<String> = items.iter().map(|v| q.placeholder(v, field.type_)).collect();
            let not = if op == CompareOp::Nin { "NOT " } else { "" };
            format!("{} {}IN ({})", col, not, phs.join(", "))
        }
        CompareOp::Like | CompareOp::Ilike => {
            let pattern = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let n = q.push_param(PgBindValue::String(pattern));
            let kw = if op == CompareOp::Like { "LIKE" } else { "ILIKE" };
            format!("{}::text {} ${}", col, kw, n)
        }
        CompareOp::Ne if !PgBindValue::fits(value, field.type_) => "TRUE".into(),
        _ if !PgBindValue::fits(value, field.type_) => "FALSE".into(),
        _ => {
            let sym = match op {
                CompareOp::Eq => "=",
                CompareOp::Ne => "<>",
                CompareOp::Gt => ">",
                CompareOp::Gte => ">=",
                CompareOp::Lt => "<",
                _ => "<=",
            };
            let ph = q.placeholder(value, field.type_);
            format!("{} {} {}", col, sym, ph)
        }
    }
}

/// Render a where predicate; comparisons on non-column names render as TRUE.
fn where_sql(q: &mut QueryBuf, resource: &Resource, w: &WhereOptions) -> String {
    match w {
        WhereOptions::And(parts) if parts.is_empty() => "TRUE".into(),
        WhereOptions::Or(parts) if parts.is_empty() => "FALSE".into(),
        WhereOptions::And(parts) => parts
            .iter()
            .map(|p| format!("({})", where_sql(q, resource, p)))
            .collect::<Vec<_>>()
            .join(" AND "),
        WhereOptions::Or(parts) => parts
            .iter()
            .map(|p| format!("({})", where_sql(q, resource, p)))
            .collect::<Vec<_>>()
            .join(" OR "),
        WhereOptions::Not(inner) => format!("NOT ({})", where_sql(q, resource, inner)),
        WhereOptions::Compare { field, op, value } => match resource.field(field).filter(|f| f.has_column()) {
            Some(f) => compare_sql(q, f, *op, value),
            None => "TRUE".into(),
        },
    }
}

fn where_clause(q: &mut QueryBuf, resource: &Resource, filter: &WhereOptions) -> String {
    if filter.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_sql(q, resource, filter))
    }
}

fn order_clause(resource: &Resource, options: &FindOptions) -> String {
    let mut parts: Vec<String> = options
        .order_by
        .iter()
        .filter_map(|(name, dir)| {
            let f = resource.field(name).filter(|f| f.has_column())?;
            Some(format!("{} {}", quoted(&f.column), dir.as_sql()))
        })
        .collect();
    if !options.order_by.iter().any(|(name, _)| *name == resource.primary_key) {
        parts.push(format!("{} ASC", quoted(&resource.pk_field().column)));
    }
    format!(" ORDER BY {}", parts.join(", "))
}

/// SELECT by primary key.
pub fn select_by_id(resource: &Resource, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cond = pk_clause(&mut q, resource, id);
    q.sql = format!(
        "SELECT {} FROM {} WHERE {}",
        select_column_list(resource, &[]),
        quoted(&resource.table_name),
        cond
    );
    q
}

/// SELECT with where predicate, ORDER BY (primary key as tiebreak), projection and LIMIT/OFFSET.
pub fn select_list(resource: &Resource, options: &FindOptions, filter: &WhereOptions) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_clause = where_clause(&mut q, resource, filter);
    let limit_clause = options.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = if options.offset > 0 {
        format!(" OFFSET {}", options.offset)
    } else {
        String::new()
    };
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        select_column_list(resource, &options.fields),
        quoted(&resource.table_name),
        where_clause,
        order_clause(resource, options),
        limit_clause,
        offset_clause
    );
    q
}

pub fn count(resource: &Resource, filter: &WhereOptions) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_clause = where_clause(&mut q, resource, filter);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", quoted(&resource.table_name), where_clause);
    q
}

/// INSERT only the columns present in body, so the database applies its own defaults
/// (serial/uuid keys, declared defaults, timestamps).
pub fn insert(resource: &Resource, body: &Entity) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for f in resource.column_fields() {
        if f.managed {
            continue;
        }
        let Some(v) = body.get(&f.name) else { continue };
        placeholders.push(q.placeholder(v, f.type_));
        cols.push(quoted(&f.column));
    }
    let table = quoted(&resource.table_name);
    let returning = select_column_list(resource, &[]);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE by id: SET only columns present in body; managed `updated_at` is stamped.
/// With nothing to set this degrades to a SELECT by id.
pub fn update(resource: &Resource, id: &Value, body: &Entity) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for f in resource.column_fields() {
        if f.primary_key || f.managed {
            continue;
        }
        let Some(v) = body.get(&f.name) else { continue };
        let ph = q.placeholder(v, f.type_);
        sets.push(format!("{} = {}", quoted(&f.column), ph));
    }
    if sets.is_empty() {
        return select_by_id(resource, id);
    }
    if let Some(f) = resource.field("updated_at").filter(|f| f.managed) {
        sets.push(format!("{} = NOW()", quoted(&f.column)));
    }
    let cond = pk_clause(&mut q, resource, id);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} RETURNING {}",
        quoted(&resource.table_name),
        sets.join(", "),
        cond,
        select_column_list(resource, &[])
    );
    q
}

/// DELETE by id, returning the key so callers can tell whether a row existed.
pub fn delete(resource: &Resource, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cond = pk_clause(&mut q, resource, id);
    q.sql = format!(
        "DELETE FROM {} WHERE {} RETURNING {}",
        quoted(&resource.table_name),
        cond,
        quoted(&resource.pk_field().column)
    );
    q
}

/// Ids on the far side of a pivot for one id on our side.
pub fn select_pivot_ids(pivot: &PivotTable, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(id, pivot.our_type);
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {}",
        quoted(&pivot.their_column),
        quoted(&pivot.table),
        quoted(&pivot.our_column),
        ph
    );
    q
}

pub fn delete_pivot_rows(pivot: &PivotTable, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(id, pivot.our_type);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        quoted(&pivot.table),
        quoted(&pivot.our_column),
        ph
    );
    q
}

pub fn insert_pivot_row(pivot: &PivotTable, id: &Value, related: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ours = q.placeholder(id, pivot.our_type);
    let theirs = q.placeholder(related, pivot.their_type);
    q.sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ({}, {}) ON CONFLICT DO NOTHING",
        quoted(&pivot.table),
        quoted(&pivot.our_column),
        quoted(&pivot.their_column),
        ours,
        theirs
    );
    q
}
