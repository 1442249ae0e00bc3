//! Entity managers, request validation and relation traversal.

mod crud;
mod manager;
mod memory;
pub mod relations;
mod validation;
pub use crud::PgManager;
pub use manager::{Entity, EntityManager};
pub use memory::MemoryManager;
pub use relations::{fetch_relation, populate, strip_hidden, RelationData};
pub use validation::RequestValidator;
