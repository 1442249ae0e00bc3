//! Create the tables behind the resource model: one table per resource, foreign keys for owning
//! relations and a pivot table per many-to-many pair. Idempotent (IF NOT EXISTS).

use crate::config::{Field, FieldType, PivotTable, PkType, ResolvedModel, Resource};
use crate::error::AppError;
use crate::sql::quoted;
use serde_json::Value;
use sqlx::{ConnectOptions, PgPool};
use std::collections::HashSet;
use std::str::FromStr;

/// SQL literal for a declared default, or None when it cannot be expressed as one.
fn default_literal(value: &Value, type_: FieldType) -> Option<String> {
    let text = |s: &str| format!("'{}'", s.replace('\'', "''"));
    match (type_, value) {
        (_, Value::Null) => None,
        (FieldType::Json, v) => Some(format!("{}::jsonb", text(&v.to_string()))),
        (_, Value::String(s)) => Some(text(s)),
        (_, Value::Bool(b)) => Some(b.to_string()),
        (_, Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn column_def(resource: &Resource, field: &Field) -> String {
    let mut def = quoted(&field.column);
    def.push(' ');
    if field.primary_key && field.has_default {
        match (resource.pk_type, field.type_) {
            (PkType::Int, FieldType::Integer) => def.push_str("SERIAL"),
            (PkType::Int, _) => def.push_str("BIGSERIAL"),
            (PkType::Uuid, _) => def.push_str("uuid DEFAULT gen_random_uuid()"),
            (PkType::Text, t) => def.push_str(t.sql_type()),
        }
        return def;
    }
    def.push_str(field.type_.sql_type());
    if !field.nullable {
        def.push_str(" NOT NULL");
    }
    if field.managed {
        def.push_str(" DEFAULT NOW()");
    } else if let Some(lit) = field.default.as_ref().and_then(|v| default_literal(v, field.type_)) {
        def.push_str(" DEFAULT ");
        def.push_str(&lit);
    }
    def
}

/// CREATE TABLE for one resource (without foreign keys; those are added once every table exists).
pub fn create_table_sql(resource: &Resource) -> String {
    let mut defs: Vec<String> = resource.column_fields().map(|f| column_def(resource, f)).collect();
    defs.push(format!("PRIMARY KEY ({})", quoted(&resource.pk_field().column)));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        quoted(&resource.table_name),
        defs.join(",\n  ")
    )
}

/// ALTER TABLE ... ADD CONSTRAINT for every owning relation of `resource`.
pub fn foreign_key_sql(model: &ResolvedModel, resource: &Resource) -> Vec<String> {
    resource
        .column_fields()
        .filter_map(|f| {
            let rel = f.relation.as_ref()?;
            let target = model.resource(&rel.resource)?;
            Some(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE SET NULL",
                quoted(&resource.table_name),
                quoted(&format!("fk_{}_{}", resource.table_name, f.column)),
                quoted(&f.column),
                quoted(&target.table_name),
                quoted(&target.pk_field().column)
            ))
        })
        .collect()
}

/// CREATE TABLE for a pivot; rows go away with either side.
pub fn pivot_table_sql(pivot: &PivotTable, ours: &Resource, theirs: &Resource) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n  \
         {a} {a_type} NOT NULL REFERENCES {a_table} ({a_pk}) ON DELETE CASCADE,\n  \
         {b} {b_type} NOT NULL REFERENCES {b_table} ({b_pk}) ON DELETE CASCADE,\n  \
         PRIMARY KEY ({a}, {b})\n)",
        table = quoted(&pivot.table),
        a = quoted(&pivot.our_column),
        a_type = pivot.our_type.sql_type(),
        a_table = quoted(&ours.table_name),
        a_pk = quoted(&ours.pk_field().column),
        b = quoted(&pivot.their_column),
        b_type = pivot.their_type.sql_type(),
        b_table = quoted(&theirs.table_name),
        b_pk = quoted(&theirs.pk_field().column),
    )
}

/// Apply the model to the database: tables, then foreign keys, then pivot tables.
pub async fn apply_migrations(pool: &PgPool, model: &ResolvedModel) -> Result<(), AppError> {
    for resource in &model.resources {
        let sql = create_table_sql(resource);
        tracing::debug!(sql = %sql, "migration");
        sqlx::query(&sql).execute(pool).await?;
    }

    for resource in &model.resources {
        for sql in foreign_key_sql(model, resource) {
            // Fails when the constraint already exists.
            if let Err(e) = sqlx::query(&sql).execute(pool).await {
                tracing::debug!(resource = %resource.name, error = %e, "foreign key not added");
            }
        }
    }

    let mut created = HashSet::new();
    for resource in &model.resources {
        for field in resource.relation_fields() {
            let Some(rel) = &field.relation else { continue };
            let Some(pivot) = &rel.pivot else { continue };
            if !created.insert(pivot.table.clone()) {
                continue;
            }
            let theirs = model.resource(&rel.resource).ok_or_else(|| {
                AppError::Config(crate::error::ConfigError::MissingReference {
                    kind: "resource",
                    id: rel.resource.clone(),
                })
            })?;
            let sql = pivot_table_sql(pivot, resource, theirs);
            tracing::debug!(sql = %sql, "migration");
            sqlx::query(&sql).execute(pool).await?;
        }
    }

    tracing::info!(resources = model.resources.len(), pivots = created.len(), "schema up to date");
    Ok(())
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};

    fn model() -> ResolvedModel {
        resolve(
            &parse_config(
                r#"[
                { "name": "User", "timestamps": false, "fields": [
                    { "name": "id", "type": "uuid", "primary_key": true },
                    { "name": "email", "nullable": false },
                    { "name": "settings", "type": "json", "default": { "theme": "dark" } }
                ]},
                { "name": "Post", "fields": [
                    { "name": "title", "nullable": false, "default": "untitled" },
                    { "name": "author", "relation": { "cardinality": "many_to_one", "resource": "User" } },
                    { "name": "tags", "relation": { "cardinality": "many_to_many", "resource": "Tag" } }
                ]},
                { "name": "Tag", "timestamps": false, "fields": [ { "name": "name" } ] }
            ]"#,
            )
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn table_ddl() {
        let model = model();
        let users = create_table_sql(model.resource("User").unwrap());
        assert!(users.contains("\"id\" uuid DEFAULT gen_random_uuid()"));
        assert!(users.contains("\"email\" text NOT NULL"));
        assert!(users.contains("\"settings\" jsonb DEFAULT '{\"theme\":\"dark\"}'::jsonb"));

        let posts = create_table_sql(model.resource("Post").unwrap());
        assert!(posts.starts_with("CREATE TABLE IF NOT EXISTS \"posts\""));
        assert!(posts.contains("\"id\" BIGSERIAL"));
        assert!(posts.contains("\"title\" text NOT NULL DEFAULT 'untitled'"));
        assert!(posts.contains("\"author_id\" uuid"));
        assert!(posts.contains("\"created_at\" timestamptz NOT NULL DEFAULT NOW()"));
        assert!(!posts.contains("\"tags\""));
    }

    #[test]
    fn foreign_keys_and_pivots() {
        let model = model();
        let post = model.resource("Post").unwrap();
        let fks = foreign_key_sql(&model, post);
        assert_eq!(fks.len(), 1);
        assert!(fks[0].contains("REFERENCES \"users\" (\"id\")"));

        let pivot = post.field("tags").unwrap().relation.as_ref().unwrap().pivot.clone().unwrap();
        let sql = pivot_table_sql(&pivot, post, model.resource("Tag").unwrap());
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"posts_tags\""));
        assert!(sql.contains("PRIMARY KEY (\"post_id\", \"tag_id\")"));
    }

    #[test]
    fn admin_url_from_database_url() {
        let (admin, db) = parse_db_name_from_url("postgres://u:p@localhost:5432/blog?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(db, "blog");
    }
}
