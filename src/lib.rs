//! Resource REST: declared resources become paginated CRUD APIs over an entity manager.

pub mod case;
pub mod config;
pub mod error;
pub mod handlers;
pub mod migration;
pub mod openapi;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;

pub use config::{load_from_path, parse_config, resolve, FullConfig, ResolvedModel, Resource};
pub use error::{AppError, ConfigError};
pub use migration::{apply_migrations, ensure_database_exists};
pub use query::{page_meta, FindOptions, PageMeta, QueryOptions, WhereOptions};
pub use routes::{app_router, common_routes, resource_route_definitions, resource_routes, RouteDefinition};
pub use service::{EntityManager, MemoryManager, PgManager};
pub use settings::Settings;
pub use state::AppState;
