//! Route generator: every resource gets the same seven route definitions, each carrying the
//! documentation metadata rendered into the OpenAPI document. The two POST definitions share one
//! mounted route; the handler tells them apart by the `objects` body key.

use crate::config::{Field, Resource};
use crate::handlers::resource::{delete, fetch_many, fetch_one, fetch_relation, insert, update};
use crate::state::{AppState, ResourceContext};
use axum::http::Method;
use axum::routing::{self, MethodRouter};
use axum::Router;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteAction {
    InsertOne,
    InsertMany,
    FetchMany,
    FetchOne,
    FetchRelation,
    Update,
    Delete,
}

impl RouteAction {
    pub fn operation_id(&self) -> &'static str {
        match self {
            RouteAction::InsertOne => "insert_one",
            RouteAction::InsertMany => "insert_many",
            RouteAction::FetchMany => "fetch_many",
            RouteAction::FetchOne => "fetch_one",
            RouteAction::FetchRelation => "fetch_relation",
            RouteAction::Update => "update",
            RouteAction::Delete => "delete",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Body,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteParameter {
    pub name: String,
    pub location: ParamLocation,
    pub description: String,
    pub required: bool,
}

impl RouteParameter {
    fn new(name: &str, location: ParamLocation, description: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.to_string(),
            location,
            description: description.into(),
            required,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RouteDefinition {
    pub method: Method,
    /// axum path template, e.g. `/posts/:id`.
    pub path: String,
    pub action: RouteAction,
    pub resource: String,
    pub summary: String,
    pub description: String,
    pub parameters: Vec<RouteParameter>,
}

fn query_parameters(resource: &Resource) -> Vec<RouteParameter> {
    use ParamLocation::Query;
    vec![
        RouteParameter::new("page", Query, "Page number (1-based); -1 disables pagination", false),
        RouteParameter::new(
            "per_page",
            Query,
            format!("Page size, default {}", resource.default_per_page()),
            false,
        ),
        RouteParameter::new("populate", Query, "Comma-separated relations to embed", false),
        RouteParameter::new("fields", Query, "Comma-separated fields to return", false),
        RouteParameter::new("filters", Query, "Comma-separated named filters", false),
        RouteParameter::new("sort", Query, "Comma-separated field:asc|desc pairs", false),
        RouteParameter::new("where", Query, "Filter object in bracket notation, e.g. where[title][$like]=%a%", false),
    ]
}

fn body_parameters(resource: &Resource, enforce_required: bool) -> Vec<RouteParameter> {
    resource
        .fields
        .iter()
        .filter(|f| !f.primary_key && !f.managed)
        .map(|f| {
            RouteParameter::new(
                &f.name,
                ParamLocation::Body,
                field_description(f),
                enforce_required && f.is_required(),
            )
        })
        .collect()
}

fn field_description(field: &Field) -> String {
    let kind = match &field.relation {
        Some(rel) => format!("{} relation to {}", rel.cardinality.as_str(), rel.resource),
        None => field.type_.sql_type().to_string(),
    };
    match &field.help_text {
        Some(help) => format!("{} ({})", help, kind),
        None => kind,
    }
}

fn id_parameter(resource: &Resource) -> RouteParameter {
    RouteParameter::new(
        "id",
        ParamLocation::Path,
        format!("{} primary key ({})", resource.pascal_name, resource.primary_key),
        true,
    )
}

/// The route definitions of one resource, in mounting order.
pub fn resource_route_definitions(resource: &Resource) -> Vec<RouteDefinition> {
    let name = &resource.pascal_name;
    let plural = format!("/{}", resource.slug_plural);
    let item = format!("{}/:id", plural);
    let related = format!("{}/:related", item);
    let def = |method: Method, path: &str, action, summary: String, description: String, parameters| {
        RouteDefinition {
            method,
            path: path.to_string(),
            action,
            resource: resource.name.clone(),
            summary,
            description,
            parameters,
        }
    };

    let mut insert_many_params = vec![RouteParameter::new(
        "objects",
        ParamLocation::Body,
        format!("Array of {} objects", name),
        true,
    )];
    insert_many_params.extend(body_parameters(resource, false));
    let mut one_params = vec![id_parameter(resource)];
    one_params.extend(
        query_parameters(resource)
            .into_iter()
            .filter(|p| p.name == "populate" || p.name == "fields"),
    );
    let mut relation_params = vec![
        id_parameter(resource),
        RouteParameter::new(
            "related",
            ParamLocation::Path,
            "Relation field name or related resource slug",
            true,
        ),
    ];
    relation_params.extend(query_parameters(resource));
    let mut update_params = vec![id_parameter(resource)];
    update_params.extend(body_parameters(resource, false));

    vec![
        def(
            Method::POST,
            &plural,
            RouteAction::InsertOne,
            format!("Create a {}", name),
            format!("Validates the body against the {} fields and stores a new entity.", name),
            body_parameters(resource, true),
        ),
        def(
            Method::POST,
            &plural,
            RouteAction::InsertMany,
            format!("Create many {}", resource.slug_plural),
            format!("Stores every object in `objects` as a new {}; all or nothing.", name),
            insert_many_params,
        ),
        def(
            Method::GET,
            &plural,
            RouteAction::FetchMany,
            format!("List {}", resource.slug_plural),
            "Returns a page of entities with pagination metadata.".to_string(),
            query_parameters(resource),
        ),
        def(
            Method::GET,
            &item,
            RouteAction::FetchOne,
            format!("Get a {}", name),
            format!("Returns one {} by primary key.", name),
            one_params,
        ),
        def(
            Method::GET,
            &related,
            RouteAction::FetchRelation,
            format!("Get entities related to a {}", name),
            "To-many relations return a page with metadata; to-one relations return an object or null."
                .to_string(),
            relation_params,
        ),
        def(
            Method::PUT,
            &item,
            RouteAction::Update,
            format!("Update a {}", name),
            "Merges the given fields into the entity.".to_string(),
            update_params,
        ),
        def(
            Method::DELETE,
            &item,
            RouteAction::Delete,
            format!("Delete a {}", name),
            format!("Removes one {} by primary key.", name),
            vec![id_parameter(resource)],
        ),
    ]
}

fn method_router(action: RouteAction) -> Option<MethodRouter<ResourceContext>> {
    Some(match action {
        RouteAction::InsertOne => routing::post(insert),
        // Served by the insert-one route.
        RouteAction::InsertMany => return None,
        RouteAction::FetchMany => routing::get(fetch_many),
        RouteAction::FetchOne => routing::get(fetch_one),
        RouteAction::FetchRelation => routing::get(fetch_relation),
        RouteAction::Update => routing::put(update),
        RouteAction::Delete => routing::delete(delete),
    })
}

/// Mount the routes of every resource in the model.
pub fn resource_routes(state: AppState) -> Router {
    let mut router = Router::new();
    for resource in &state.model.resources {
        let mut by_path: BTreeMap<String, MethodRouter<ResourceContext>> = BTreeMap::new();
        for def in resource_route_definitions(resource) {
            let Some(handler) = method_router(def.action) else { continue };
            let merged = match by_path.remove(&def.path) {
                Some(existing) => existing.merge(handler),
                None => handler,
            };
            by_path.insert(def.path, merged);
        }
        let ctx = ResourceContext {
            app: state.clone(),
            resource: resource.clone(),
        };
        let mut resource_router = Router::new();
        for (path, handler) in by_path {
            resource_router = resource_router.route(&path, handler);
        }
        tracing::debug!(resource = %resource.name, path = %resource.slug_plural, "mounted resource routes");
        router = router.merge(resource_router.with_state(ctx));
    }
    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};

    #[test]
    fn seven_definitions_per_resource() {
        let model = resolve(
            &parse_config(
                r#"[{ "name": "BlogPost", "fields": [
                    { "name": "title", "nullable": false, "help_text": "Headline" },
                    { "name": "body", "type": "text" }
                ]}]"#,
            )
            .unwrap(),
        )
        .unwrap();
        let defs = resource_route_definitions(model.resource("BlogPost").unwrap());
        let shape: Vec<(Method, &str)> = defs.iter().map(|d| (d.method.clone(), d.path.as_str())).collect();
        assert_eq!(
            shape,
            vec![
                (Method::POST, "/blog-posts"),
                (Method::POST, "/blog-posts"),
                (Method::GET, "/blog-posts"),
                (Method::GET, "/blog-posts/:id"),
                (Method::GET, "/blog-posts/:id/:related"),
                (Method::PUT, "/blog-posts/:id"),
                (Method::DELETE, "/blog-posts/:id"),
            ]
        );
        let insert = &defs[0];
        let names: Vec<&str> = insert.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["title", "body"]);
        assert!(insert.parameters[0].required);
        assert_eq!(insert.parameters[0].description, "Headline (text)");
        assert!(!insert.parameters[1].required);
    }
}
