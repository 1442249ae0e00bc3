//! Following relations: the related-rows endpoint and `populate` embedding.

use crate::config::{Field, Relation, ResolvedModel, Resource};
use crate::error::AppError;
use crate::query::{page_meta, CompareOp, FindOptions, PageMeta, QueryOptions, WhereOptions};
use crate::service::manager::{Entity, EntityManager};
use async_recursion::async_recursion;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of following one relation from one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationData {
    /// many_to_one / one_to_one: the related entity, if any.
    One(Option<Entity>),
    /// one_to_many / many_to_many: a page of related entities.
    Many { rows: Vec<Entity>, meta: PageMeta },
}

/// Remove the resource's hidden fields from an entity before it leaves the service.
pub fn strip_hidden(entity: &mut Entity, resource: &Resource) {
    if resource.hidden_fields.is_empty() {
        return;
    }
    entity.retain(|k, _| !resource.hidden_fields.contains(k));
}

fn relation_of(field: &Field) -> Result<&Relation, AppError> {
    field
        .relation
        .as_ref()
        .ok_or_else(|| AppError::BadRequest(format!("{} is not a relation", field.name)))
}

fn related_resource<'m>(model: &'m ResolvedModel, rel: &Relation) -> Result<&'m Arc<Resource>, AppError> {
    model
        .resource(&rel.resource)
        .ok_or_else(|| AppError::Internal(format!("unknown related resource {}", rel.resource)))
}

/// Predicate on the related resource selecting the rows linked to `entity` through `field`.
async fn relation_scope(
    manager: &dyn EntityManager,
    resource: &Resource,
    related: &Resource,
    entity: &Entity,
    field: &Field,
    rel: &Relation,
) -> Result<WhereOptions, AppError> {
    let own_id = entity.get(&resource.primary_key).cloned().unwrap_or(Value::Null);
    if let Some(pivot) = &rel.pivot {
        let ids = manager.pivot_ids(pivot, &own_id).await?;
        return Ok(WhereOptions::Compare {
            field: related.primary_key.clone(),
            op: CompareOp::In,
            value: Value::Array(ids),
        });
    }
    if rel.is_owning() {
        let fk = entity.get(&field.name).cloned().unwrap_or(Value::Null);
        return Ok(WhereOptions::eq(related.primary_key.clone(), fk));
    }
    match &rel.inverse {
        Some(inverse) => Ok(WhereOptions::eq(inverse.clone(), own_id)),
        None => Err(AppError::Internal(format!(
            "relation {}.{} has no inverse",
            resource.name, field.name
        ))),
    }
}

/// Fetch the entities related to `entity` through `field`, applying the request's query options
/// (pagination, sort, fields, where, populate) against the related resource.
pub async fn fetch_relation(
    manager: &dyn EntityManager,
    model: &ResolvedModel,
    resource: &Resource,
    entity: &Entity,
    field: &Field,
    pairs: &[(String, String)],
) -> Result<RelationData, AppError> {
    let rel = relation_of(field)?;
    let related = related_resource(model, rel)?;
    let options = QueryOptions::parse(pairs, related);
    let scope = relation_scope(manager, resource, related, entity, field, rel).await?;

    if rel.is_to_many() {
        let filter = scope.and(options.filter);
        let total = manager.count(related, &filter).await?;
        let mut rows = manager.find(related, &options.find, &filter).await?;
        populate(manager, model, related, &mut rows, &options.find.populate).await?;
        for row in &mut rows {
            strip_hidden(row, related);
        }
        let meta = page_meta(total, options.find.limit, options.find.offset);
        Ok(RelationData::Many { rows, meta })
    } else {
        let find = FindOptions {
            limit: Some(1),
            offset: 0,
            ..options.find
        };
        let filter = scope.and(options.filter);
        let mut rows = manager.find(related, &find, &filter).await?;
        populate(manager, model, related, &mut rows, &find.populate).await?;
        let mut one = rows.into_iter().next();
        if let Some(row) = one.as_mut() {
            strip_hidden(row, related);
        }
        Ok(RelationData::One(one))
    }
}

/// Embed related entities into `rows` for each populate path. Dotted paths (`author.company`)
/// populate nested relations of the embedded entities.
#[async_recursion]
pub async fn populate(
    manager: &dyn EntityManager,
    model: &ResolvedModel,
    resource: &Resource,
    rows: &mut [Entity],
    paths: &[String],
) -> Result<(), AppError> {
    if paths.is_empty() || rows.is_empty() {
        return Ok(());
    }
    let mut nested: HashMap<&str, Vec<String>> = HashMap::new();
    for path in paths {
        let (head, rest) = match path.split_once('.') {
            Some((h, r)) => (h, Some(r)),
            None => (path.as_str(), None),
        };
        let entry = nested.entry(head).or_default();
        if let Some(rest) = rest.filter(|r| !r.is_empty()) {
            entry.push(rest.to_string());
        }
    }

    for (head, rest) in nested {
        let Some(field) = resource.field(head).filter(|f| f.is_relation()) else {
            tracing::debug!(resource = %resource.name, relation = %head, "skipping unknown populate");
            continue;
        };
        let rel = relation_of(field)?;
        let related = related_resource(model, rel)?;
        for row in rows.iter_mut() {
            let scope = relation_scope(manager, resource, related, row, field, rel).await?;
            let find = FindOptions {
                limit: (!rel.is_to_many()).then_some(1),
                ..Default::default()
            };
            let mut found = manager.find(related, &find, &scope).await?;
            populate(manager, model, related, &mut found, &rest).await?;
            for r in &mut found {
                strip_hidden(r, related);
            }
            let value = if rel.is_to_many() {
                Value::Array(found.into_iter().map(Value::Object).collect())
            } else {
                found.into_iter().next().map(Value::Object).unwrap_or(Value::Null)
            };
            row.insert(field.name.clone(), value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};
    use crate::service::MemoryManager;
    use serde_json::json;

    fn model() -> ResolvedModel {
        resolve(
            &parse_config(
                r#"[
                { "name": "User", "timestamps": false, "hidden_fields": ["password"], "fields": [
                    { "name": "name" },
                    { "name": "password" },
                    { "name": "posts", "relation": { "cardinality": "one_to_many", "resource": "Post", "inverse": "author" } }
                ]},
                { "name": "Post", "timestamps": false, "fields": [
                    { "name": "title" },
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

    fn body(v: Value) -> Entity {
        v.as_object().cloned().unwrap()
    }

    async fn seed(m: &MemoryManager, model: &ResolvedModel) -> (Entity, Entity) {
        let user = model.resource("User").unwrap();
        let post = model.resource("Post").unwrap();
        let tag = model.resource("Tag").unwrap();
        let u = m.insert(user, &body(json!({ "name": "ann", "password": "x" }))).await.unwrap();
        let t = m.insert(tag, &body(json!({ "name": "rust" }))).await.unwrap();
        let mut first = None;
        for title in ["a", "b", "c"] {
            let p = m
                .insert(post, &body(json!({ "title": title, "author": u["id"], "tags": [t["id"]] })))
                .await
                .unwrap();
            first.get_or_insert(p);
        }
        (u, first.unwrap())
    }

    #[tokio::test]
    async fn to_many_is_paginated_page() {
        let model = model();
        let m = MemoryManager::new();
        let (u, _) = seed(&m, &model).await;
        let user = model.resource("User").unwrap();
        let field = user.field("posts").unwrap();
        let pairs = vec![("page".to_string(), "1".to_string()), ("per_page".to_string(), "2".to_string())];
        match fetch_relation(&m, &model, user, &u, field, &pairs).await.unwrap() {
            RelationData::Many { rows, meta } => {
                assert_eq!(rows.len(), 2);
                assert_eq!(meta.total, 3);
                assert_eq!(meta.page_count, 2);
            }
            other => panic!("expected many, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn to_one_hides_fields() {
        let model = model();
        let m = MemoryManager::new();
        let (_, p) = seed(&m, &model).await;
        let post = model.resource("Post").unwrap();
        let field = post.field("author").unwrap();
        match fetch_relation(&m, &model, post, &p, field, &[]).await.unwrap() {
            RelationData::One(Some(author)) => {
                assert_eq!(author["name"], json!("ann"));
                assert!(author.get("password").is_none());
            }
            other => panic!("expected one, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn populate_nested_paths() {
        let model = model();
        let m = MemoryManager::new();
        let (_, p) = seed(&m, &model).await;
        let post = model.resource("Post").unwrap();
        let mut rows = vec![p];
        populate(&m, &model, post, &mut rows, &["author.posts".to_string(), "tags".to_string()])
            .await
            .unwrap();
        assert_eq!(rows[0]["tags"].as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["author"]["posts"].as_array().unwrap().len(), 3);
    }
}
