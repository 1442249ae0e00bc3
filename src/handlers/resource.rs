//! Resource handlers: insert (one or many), fetch many, fetch one, fetch relation, update, delete.

use crate::config::{PkType, Resource};
use crate::error::AppError;
use crate::query::{page_meta, QueryOptions};
use crate::response::{success_created, success_many, success_one};
use crate::service::{fetch_relation as follow_relation, populate, strip_hidden, Entity, RelationData, RequestValidator};
use crate::state::ResourceContext;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

/// Body key that turns a POST into a bulk insert.
const OBJECTS_KEY: &str = "objects";

type QueryPairs = Query<Vec<(String, String)>>;

fn parse_id(id_str: &str, pk_type: PkType) -> Result<Value, AppError> {
    Ok(match pk_type {
        PkType::Uuid => {
            let u = uuid::Uuid::parse_str(id_str).map_err(|_| AppError::BadRequest("invalid uuid".into()))?;
            Value::String(u.to_string())
        }
        PkType::Int => {
            let n: i64 = id_str.parse().map_err(|_| AppError::BadRequest("invalid id".into()))?;
            Value::Number(n.into())
        }
        PkType::Text => Value::String(id_str.to_string()),
    })
}

fn body_to_map(value: Value) -> Result<Entity, AppError> {
    match value {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, AppError> {
    body.map(|Json(v)| v)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

/// Owning relations accept either the related id or an object carrying it.
fn normalize_relations(body: &mut Entity, resource: &Resource) {
    for field in resource.relation_fields() {
        let Some(rel) = &field.relation else { continue };
        if !rel.is_owning() {
            continue;
        }
        if let Some(Value::Object(obj)) = body.get(&field.name) {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            body.insert(field.name.clone(), id);
        }
    }
}

async fn find_entity(ctx: &ResourceContext, id_str: &str) -> Result<(Value, Entity), AppError> {
    let resource = &ctx.resource;
    let id = parse_id(id_str, resource.pk_type)?;
    let entity = ctx
        .app
        .manager
        .find_one(resource, &id)
        .await?
        .ok_or_else(|| AppError::entity_not_found(&resource.pascal_name, id_str))?;
    Ok((id, entity))
}

/// POST /{plural}: insert one entity, or many when the body carries `objects`.
pub async fn insert(
    State(ctx): State<ResourceContext>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let body = body_to_map(json_body(body)?)?;
    let bulk = body.contains_key(OBJECTS_KEY) && ctx.resource.field(OBJECTS_KEY).is_none();
    if bulk {
        insert_many(&ctx, body).await
    } else {
        insert_one(&ctx, body).await
    }
}

async fn insert_one(ctx: &ResourceContext, mut body: Entity) -> Result<Response, AppError> {
    let resource = &ctx.resource;
    normalize_relations(&mut body, resource);
    RequestValidator::validate(&body, resource)?;
    let mut row = ctx.app.manager.insert(resource, &body).await?;
    tracing::debug!(resource = %resource.name, id = ?row.get(&resource.primary_key), "inserted");
    strip_hidden(&mut row, resource);
    Ok(success_created(row).into_response())
}

async fn insert_many(ctx: &ResourceContext, mut body: Entity) -> Result<Response, AppError> {
    let resource = &ctx.resource;
    let objects = match body.remove(OBJECTS_KEY) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(AppError::BadRequest(format!("{} must be an array", OBJECTS_KEY))),
    };
    let mut items = Vec::with_capacity(objects.len());
    for v in objects {
        let mut item = body_to_map(v)?;
        normalize_relations(&mut item, resource);
        RequestValidator::validate(&item, resource)?;
        items.push(item);
    }
    let mut rows = ctx.app.manager.insert_many(resource, &items).await?;
    tracing::debug!(resource = %resource.name, count = rows.len(), "inserted many");
    for row in &mut rows {
        strip_hidden(row, resource);
    }
    Ok(success_created(rows).into_response())
}

/// GET /{plural}: paginated list with count.
pub async fn fetch_many(
    State(ctx): State<ResourceContext>,
    Query(pairs): QueryPairs,
) -> Result<Response, AppError> {
    let resource = &ctx.resource;
    let manager = ctx.app.manager.as_ref();
    let options = QueryOptions::parse(&pairs, resource);
    let total = manager.count(resource, &options.filter).await?;
    let mut rows = manager.find(resource, &options.find, &options.filter).await?;
    populate(manager, &ctx.app.model, resource, &mut rows, &options.find.populate).await?;
    for row in &mut rows {
        strip_hidden(row, resource);
    }
    let meta = page_meta(total, options.find.limit, options.find.offset);
    Ok(success_many(rows, meta).into_response())
}

/// GET /{plural}/:id with optional `populate` and `fields`.
pub async fn fetch_one(
    State(ctx): State<ResourceContext>,
    Path(id_str): Path<String>,
    Query(pairs): QueryPairs,
) -> Result<Response, AppError> {
    let resource = &ctx.resource;
    let (_, entity) = find_entity(&ctx, &id_str).await?;
    let options = QueryOptions::parse(&pairs, resource);
    let mut rows = vec![entity];
    populate(ctx.app.manager.as_ref(), &ctx.app.model, resource, &mut rows, &options.find.populate).await?;
    let mut entity = rows.pop().unwrap_or_default();
    let fields = &options.find.fields;
    if !fields.is_empty() {
        let populated: Vec<&str> = options
            .find
            .populate
            .iter()
            .filter_map(|p| p.split('.').next())
            .collect();
        entity.retain(|k, _| fields.contains(k) || populated.contains(&k.as_str()));
    }
    strip_hidden(&mut entity, resource);
    Ok(success_one(entity).into_response())
}

/// GET /{plural}/:id/:related: a page of related entities (to-many) or the related entity (to-one).
pub async fn fetch_relation(
    State(ctx): State<ResourceContext>,
    Path((id_str, related)): Path<(String, String)>,
    Query(pairs): QueryPairs,
) -> Result<Response, AppError> {
    let resource = &ctx.resource;
    let model = &ctx.app.model;
    let field = model.relation_field(resource, &related).ok_or_else(|| {
        AppError::NotFound(format!("{} has no relation {}", resource.pascal_name, related))
    })?;
    let (_, entity) = find_entity(&ctx, &id_str).await?;
    let data = follow_relation(ctx.app.manager.as_ref(), model, resource, &entity, field, &pairs)
        .await
        .map_err(|e| match e {
            AppError::NotFound(_) => e,
            other => {
                tracing::debug!(resource = %resource.name, relation = %related, error = %other, "relation fetch failed");
                AppError::BadRequest(other.to_string())
            }
        })?;
    Ok(match data {
        RelationData::Many { rows, meta } => success_many(rows, meta).into_response(),
        RelationData::One(one) => success_one(one).into_response(),
    })
}

/// PUT /{plural}/:id: merge present fields into the entity.
pub async fn update(
    State(ctx): State<ResourceContext>,
    Path(id_str): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let resource = &ctx.resource;
    let (id, _) = find_entity(&ctx, &id_str).await?;
    let mut body = body_to_map(json_body(body)?)?;
    normalize_relations(&mut body, resource);
    RequestValidator::validate_partial(&body, resource)?;
    let mut row = ctx
        .app
        .manager
        .update(resource, &id, &body)
        .await?
        .ok_or_else(|| AppError::entity_not_found(&resource.pascal_name, &id_str))?;
    strip_hidden(&mut row, resource);
    Ok(success_one(row).into_response())
}

/// DELETE /{plural}/:id: 404 without touching storage when the entity does not exist.
pub async fn delete(
    State(ctx): State<ResourceContext>,
    Path(id_str): Path<String>,
) -> Result<StatusCode, AppError> {
    let resource = &ctx.resource;
    let (id, _) = find_entity(&ctx, &id_str).await?;
    if !ctx.app.manager.remove(resource, &id).await? {
        return Err(AppError::entity_not_found(&resource.pascal_name, &id_str));
    }
    tracing::debug!(resource = %resource.name, id = %id_str, "removed");
    Ok(StatusCode::NO_CONTENT)
}
