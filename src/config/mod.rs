//! Resource declarations: raw JSON types, declaration checks and the resolved runtime model.

pub mod loader;
pub mod resolved;
pub mod types;
pub mod validator;

pub use loader::{load_from_path, parse_config, resolve};
pub use resolved::{Field, PivotTable, PkType, Relation, ResolvedModel, Resource};
pub use types::*;
pub use validator::validate;
