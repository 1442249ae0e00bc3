//! OpenAPI 3.1 document generated from the route definitions of every resource, served at
//! `GET /openapi.json`.

use crate::config::{Field, FieldType, ResolvedModel, Resource};
use crate::routes::{resource_route_definitions, ParamLocation, RouteAction, RouteDefinition, RouteParameter};
use crate::state::AppState;
use axum::http::Method;
use axum::{routing::get, Json, Router};
use std::collections::BTreeMap;
use std::sync::Arc;
use utoipa::openapi::path::{HttpMethod, Operation, OperationBuilder, ParameterBuilder, ParameterIn, PathItemBuilder};
use utoipa::openapi::request_body::RequestBodyBuilder;
use utoipa::openapi::schema::{
    ArrayBuilder, KnownFormat, ObjectBuilder, OneOfBuilder, Ref, Schema, SchemaFormat, SchemaType, Type,
};
use utoipa::openapi::{
    ComponentsBuilder, ContentBuilder, InfoBuilder, OpenApi, OpenApiBuilder, PathsBuilder, RefOr, Required,
    ResponseBuilder,
};

const JSON: &str = "application/json";

/// `/posts/:id/:related` -> `/posts/{id}/{related}`.
fn openapi_path(path: &str) -> String {
    path.split('/')
        .map(|seg| match seg.strip_prefix(':') {
            Some(name) => format!("{{{}}}", name),
            None => seg.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn http_method(method: &Method) -> HttpMethod {
    if *method == Method::POST {
        HttpMethod::Post
    } else if *method == Method::PUT {
        HttpMethod::Put
    } else if *method == Method::DELETE {
        HttpMethod::Delete
    } else if *method == Method::PATCH {
        HttpMethod::Patch
    } else {
        HttpMethod::Get
    }
}

fn typed(type_: Type, format: Option<KnownFormat>) -> RefOr<Schema> {
    ObjectBuilder::new()
        .schema_type(type_)
        .format(format.map(SchemaFormat::KnownFormat))
        .into()
}

fn scalar_schema(type_: FieldType) -> RefOr<Schema> {
    match type_ {
        FieldType::String | FieldType::Text => typed(Type::String, None),
        FieldType::Integer => typed(Type::Integer, Some(KnownFormat::Int32)),
        FieldType::Bigint => typed(Type::Integer, Some(KnownFormat::Int64)),
        FieldType::Float => typed(Type::Number, Some(KnownFormat::Double)),
        FieldType::Boolean => typed(Type::Boolean, None),
        FieldType::Timestamp => typed(Type::String, Some(KnownFormat::DateTime)),
        FieldType::Date => typed(Type::String, Some(KnownFormat::Date)),
        FieldType::Uuid => typed(Type::String, Some(KnownFormat::Uuid)),
        FieldType::Json => ObjectBuilder::new().schema_type(SchemaType::AnyValue).into(),
    }
}

fn entity_ref(model: &ResolvedModel, resource_name: &str) -> RefOr<Schema> {
    let pascal = model
        .resource(resource_name)
        .map(|r| r.pascal_name.as_str())
        .unwrap_or(resource_name);
    Ref::from_schema_name(pascal).into()
}

fn field_schema(model: &ResolvedModel, field: &Field) -> RefOr<Schema> {
    match &field.relation {
        Some(rel) if rel.is_to_many() => ArrayBuilder::new().items(entity_ref(model, &rel.resource)).into(),
        Some(rel) if !rel.is_owning() => entity_ref(model, &rel.resource),
        _ => scalar_schema(field.type_),
    }
}

/// Component schema of one resource's entities.
fn entity_schema(model: &ResolvedModel, resource: &Resource) -> RefOr<Schema> {
    let mut object = ObjectBuilder::new().schema_type(Type::Object);
    for field in &resource.fields {
        if resource.hidden_fields.contains(&field.name) {
            continue;
        }
        object = object.property(&field.name, field_schema(model, field));
        if field.primary_key || field.managed {
            object = object.required(&field.name);
        }
    }
    object.into()
}

fn page_meta_schema() -> RefOr<Schema> {
    let count = || typed(Type::Integer, Some(KnownFormat::Int64));
    ObjectBuilder::new()
        .schema_type(Type::Object)
        .property("total", count())
        .property("page", count())
        .property("per_page", count())
        .property("page_count", count())
        .required("total")
        .required("page_count")
        .into()
}

fn error_schema() -> RefOr<Schema> {
    let detail = ObjectBuilder::new()
        .schema_type(Type::Object)
        .property("code", typed(Type::String, None))
        .property("message", typed(Type::String, None))
        .required("code")
        .required("message");
    ObjectBuilder::new()
        .schema_type(Type::Object)
        .property("error", detail)
        .required("error")
        .into()
}

fn one_envelope(data: RefOr<Schema>) -> RefOr<Schema> {
    ObjectBuilder::new()
        .schema_type(Type::Object)
        .property("data", data)
        .required("data")
        .into()
}

fn many_envelope(item: RefOr<Schema>) -> RefOr<Schema> {
    ObjectBuilder::new()
        .schema_type(Type::Object)
        .property("data", ArrayBuilder::new().items(item))
        .property("meta", Ref::from_schema_name("PageMeta"))
        .required("data")
        .required("meta")
        .into()
}

/// Request body schema from the body parameters of a route definition.
fn body_schema(model: &ResolvedModel, resource: &Resource, params: &[RouteParameter]) -> RefOr<Schema> {
    let mut object = ObjectBuilder::new().schema_type(Type::Object);
    for p in params.iter().filter(|p| p.location == ParamLocation::Body) {
        let schema = match resource.field(&p.name) {
            Some(field) => field_schema(model, field),
            None => ArrayBuilder::new()
                .items(Ref::from_schema_name(&resource.pascal_name))
                .into(),
        };
        object = object.property(&p.name, schema);
        if p.required {
            object = object.required(&p.name);
        }
    }
    object.into()
}

fn response(description: &str, schema: Option<RefOr<Schema>>) -> utoipa::openapi::Response {
    let builder = ResponseBuilder::new().description(description);
    match schema {
        Some(schema) => builder
            .content(JSON, ContentBuilder::new().schema(Some(schema)).build())
            .build(),
        None => builder.build(),
    }
}

fn error_response(description: &str) -> utoipa::openapi::Response {
    response(description, Some(Ref::from_schema_name("Error").into()))
}

fn operation(
    model: &ResolvedModel,
    resource: &Resource,
    def: &RouteDefinition,
    bulk: Option<&RouteDefinition>,
) -> Operation {
    let entity = || -> RefOr<Schema> { Ref::from_schema_name(&resource.pascal_name).into() };
    let mut description = def.description.clone();
    if let Some(bulk) = bulk {
        description = format!("{} With an `objects` array: {}", description, bulk.description);
    }
    let mut op = OperationBuilder::new()
        .operation_id(Some(format!("{}_{}", resource.snake_name, def.action.operation_id())))
        .summary(Some(def.summary.clone()))
        .description(Some(description))
        .tag(resource.pascal_name.clone());

    for p in def.parameters.iter().filter(|p| p.location != ParamLocation::Body) {
        let location = match p.location {
            ParamLocation::Path => ParameterIn::Path,
            _ => ParameterIn::Query,
        };
        let schema = if p.name == "id" {
            scalar_schema(resource.pk_field().type_)
        } else {
            typed(Type::String, None)
        };
        op = op.parameter(
            ParameterBuilder::new()
                .name(&p.name)
                .parameter_in(location)
                .required(if p.required { Required::True } else { Required::False })
                .description(Some(p.description.clone()))
                .schema(Some(schema)),
        );
    }

    if def.parameters.iter().any(|p| p.location == ParamLocation::Body) {
        let one = body_schema(model, resource, &def.parameters);
        let schema: RefOr<Schema> = match bulk {
            Some(bulk) => OneOfBuilder::new()
                .item(one)
                .item(body_schema(model, resource, &bulk.parameters))
                .into(),
            None => one,
        };
        op = op.request_body(Some(
            RequestBodyBuilder::new()
                .content(JSON, ContentBuilder::new().schema(Some(schema)).build())
                .required(Some(Required::True))
                .build(),
        ));
    }

    op = match def.action {
        RouteAction::InsertOne | RouteAction::InsertMany => op
            .response("201", response("Created", Some(one_envelope(entity()))))
            .response("400", error_response("Malformed body"))
            .response("422", error_response("Validation failed")),
        RouteAction::FetchMany => op.response("200", response("A page of entities", Some(many_envelope(entity())))),
        RouteAction::FetchOne => op
            .response("200", response("The entity", Some(one_envelope(entity()))))
            .response("404", error_response("No entity with this id")),
        RouteAction::FetchRelation => op
            .response(
                "200",
                response(
                    "Related entities",
                    Some(ObjectBuilder::new().schema_type(SchemaType::AnyValue).into()),
                ),
            )
            .response("400", error_response("Relation could not be loaded"))
            .response("404", error_response("No entity with this id or no such relation")),
        RouteAction::Update => op
            .response("200", response("The updated entity", Some(one_envelope(entity()))))
            .response("404", error_response("No entity with this id"))
            .response("422", error_response("Validation failed")),
        RouteAction::Delete => op
            .response("204", response("Deleted", None))
            .response("404", error_response("No entity with this id")),
    };
    op.build()
}

/// Build the OpenAPI document for every resource in the model.
pub fn document(model: &ResolvedModel) -> OpenApi {
    let mut components = ComponentsBuilder::new()
        .schema("PageMeta", page_meta_schema())
        .schema("Error", error_schema());
    let mut operations: BTreeMap<String, Vec<(HttpMethod, Operation)>> = BTreeMap::new();

    for resource in &model.resources {
        components = components.schema(resource.pascal_name.clone(), entity_schema(model, resource));
        let defs = resource_route_definitions(resource);
        let bulk = defs.iter().find(|d| d.action == RouteAction::InsertMany);
        for def in defs.iter().filter(|d| d.action != RouteAction::InsertMany) {
            let bulk = (def.action == RouteAction::InsertOne).then_some(bulk).flatten();
            operations
                .entry(openapi_path(&def.path))
                .or_default()
                .push((http_method(&def.method), operation(model, resource, def, bulk)));
        }
    }

    let mut paths = PathsBuilder::new();
    for (path, ops) in operations {
        let mut item = PathItemBuilder::new();
        for (method, op) in ops {
            item = item.operation(method, op);
        }
        paths = paths.path(path, item.build());
    }

    OpenApiBuilder::new()
        .info(
            InfoBuilder::new()
                .title(env!("CARGO_PKG_NAME"))
                .version(env!("CARGO_PKG_VERSION"))
                .description(Some(env!("CARGO_PKG_DESCRIPTION")))
                .build(),
        )
        .paths(paths.build())
        .components(Some(components.build()))
        .build()
}

/// GET /openapi.json. The document is built once from the immutable model.
pub fn openapi_routes(state: AppState) -> Router {
    let doc = Arc::new(document(&state.model));
    Router::new().route(
        "/openapi.json",
        get(move || {
            let doc = doc.clone();
            async move { Json(doc.as_ref().clone()) }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};

    #[test]
    fn converts_path_params() {
        assert_eq!(openapi_path("/posts/:id/:related"), "/posts/{id}/{related}");
        assert_eq!(openapi_path("/posts"), "/posts");
    }

    #[test]
    fn documents_every_route() {
        let model = resolve(
            &parse_config(
                r#"[
                { "name": "Post", "fields": [ { "name": "title", "nullable": false } ] }
            ]"#,
            )
            .unwrap(),
        )
        .unwrap();
        let doc = serde_json::to_value(document(&model)).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths["/posts"]["post"].is_object());
        assert!(paths["/posts"]["get"].is_object());
        assert!(paths["/posts/{id}"]["put"].is_object());
        assert!(paths["/posts/{id}"]["delete"].is_object());
        assert!(paths["/posts/{id}/{related}"]["get"].is_object());
        assert_eq!(paths["/posts/{id}"]["get"]["operationId"], "post_fetch_one");
        assert!(doc["components"]["schemas"]["Post"]["properties"]["title"].is_object());
    }
}
