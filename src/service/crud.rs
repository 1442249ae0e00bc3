//! Entity manager over PostgreSQL, executing statements from the SQL builder.

use crate::config::{Field, FieldType, PivotTable, Resource};
use crate::error::AppError;
use crate::query::{FindOptions, WhereOptions};
use crate::service::manager::{pivot_assignments, Entity, EntityManager};
use crate::sql::{self, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres, Row};

pub struct PgManager {
    pool: PgPool,
}

impl PgManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn bind_all(q: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    query
}

/// Write a row, then replace the pivot rows for every many-to-many field present in body.
async fn write_row(
    conn: &mut PgConnection,
    resource: &Resource,
    q: &QueryBuf,
    body: &Entity,
) -> Result<Option<Entity>, AppError> {
    let Some(row) = bind_all(q).fetch_optional(&mut *conn).await? else {
        return Ok(None);
    };
    let row = row_to_entity(&row, resource);
    let id = row.get(&resource.primary_key).cloned().unwrap_or(Value::Null);
    for (pivot, ids) in pivot_assignments(resource, body) {
        bind_all(&sql::delete_pivot_rows(pivot, &id)).execute(&mut *conn).await?;
        for related in &ids {
            bind_all(&sql::insert_pivot_row(pivot, &id, related))
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(Some(row))
}

#[async_trait]
impl EntityManager for PgManager {
    async fn count(&self, resource: &Resource, filter: &WhereOptions) -> Result<u64, AppError> {
        let q = sql::count(resource, filter);
        let row = bind_all(&q).fetch_one(&self.pool).await?;
        let n: i64 = row.try_get(0usize)?;
        Ok(n.max(0) as u64)
    }

    async fn find(
        &self,
        resource: &Resource,
        options: &FindOptions,
        filter: &WhereOptions,
    ) -> Result<Vec<Entity>, AppError> {
        let q = sql::select_list(resource, options, filter);
        let rows = bind_all(&q).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| row_to_entity(r, resource)).collect())
    }

    async fn find_one(&self, resource: &Resource, id: &Value) -> Result<Option<Entity>, AppError> {
        let q = sql::select_by_id(resource, id);
        let row = bind_all(&q).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| row_to_entity(&r, resource)))
    }

    async fn insert(&self, resource: &Resource, body: &Entity) -> Result<Entity, AppError> {
        let mut tx = self.pool.begin().await?;
        let row = write_row(&mut tx, resource, &sql::insert(resource, body), body)
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
        tx.commit().await?;
        Ok(row)
    }

    async fn insert_many(&self, resource: &Resource, bodies: &[Entity]) -> Result<Vec<Entity>, AppError> {
        let mut out = Vec::with_capacity(bodies.len());
        let mut tx = self.pool.begin().await?;
        for body in bodies {
            let row = write_row(&mut tx, resource, &sql::insert(resource, body), body)
                .await?
                .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
            out.push(row);
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn update(&self, resource: &Resource, id: &Value, body: &Entity) -> Result<Option<Entity>, AppError> {
        let mut tx = self.pool.begin().await?;
        let row = write_row(&mut tx, resource, &sql::update(resource, id, body), body).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn remove(&self, resource: &Resource, id: &Value) -> Result<bool, AppError> {
        let q = sql::delete(resource, id);
        Ok(bind_all(&q).fetch_optional(&self.pool).await?.is_some())
    }

    async fn pivot_ids(&self, pivot: &PivotTable, id: &Value) -> Result<Vec<Value>, AppError> {
        let q = sql::select_pivot_ids(pivot, id);
        let rows = bind_all(&q).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| decode_cell(r, 0usize, pivot.their_type))
            .collect()
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Decode the projected columns of `row` (aliased to field names) by their declared type.
fn row_to_entity(row: &PgRow, resource: &Resource) -> Entity {
    let mut map = Entity::new();
    for field in resource.column_fields() {
        if let Some(v) = field_value(row, field) {
            map.insert(field.name.clone(), v);
        }
    }
    map
}

fn field_value(row: &PgRow, field: &Field) -> Option<Value> {
    // Absent from the projection.
    row.try_column(field.name.as_str()).ok()?;
    match decode_cell(row, field.name.as_str(), field.type_) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(field = %field.name, error = %e, "could not decode column");
            Some(Value::Null)
        }
    }
}

fn decode_cell<I>(row: &PgRow, index: I, type_: FieldType) -> Result<Value, AppError>
where
    I: sqlx::ColumnIndex<PgRow>,
{
    let v = match type_ {
        FieldType::Integer => row.try_get::<Option<i32>, _>(index)?.map(Value::from),
        FieldType::Bigint => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
        FieldType::Float => row
            .try_get::<Option<f64>, _>(index)?
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        FieldType::Boolean => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        FieldType::Timestamp => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(|d| Value::String(d.to_rfc3339())),
        FieldType::Date => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)?
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        FieldType::Json => row.try_get::<Option<Value>, _>(index)?,
        FieldType::Uuid => row
            .try_get::<Option<uuid::Uuid>, _>(index)?
            .map(|u| Value::String(u.to_string())),
        FieldType::String | FieldType::Text => row.try_get::<Option<String>, _>(index)?.map(Value::String),
    };
    Ok(v.unwrap_or(Value::Null))
}
