//! Route builders: operational routes, generated resource routes and the OpenAPI document.

pub mod common;
pub mod resource;

pub use common::common_routes;
pub use resource::{resource_route_definitions, resource_routes, ParamLocation, RouteAction, RouteDefinition, RouteParameter};

use crate::openapi::openapi_routes;
use crate::state::AppState;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Default request body limit in bytes.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// The full application: resource routes, `/openapi.json` and operational routes, with request
/// tracing and a body size limit.
pub fn app_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .merge(common_routes(state.clone()))
        .merge(openapi_routes(state.clone()))
        .merge(resource_routes(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(body_limit)),
        )
}
