//! The persistence seam behind the REST handlers.

use crate::config::{PivotTable, Resource};
use crate::error::AppError;
use crate::query::{FindOptions, WhereOptions};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One row, keyed by field name. Owning relations hold the related id; to-many relations are absent
/// unless populated.
pub type Entity = Map<String, Value>;

/// ORM-style entity manager. Implementations translate resource-level operations into storage calls;
/// where predicates and find options only ever name fields of the resource they are applied to.
#[async_trait]
pub trait EntityManager: Send + Sync {
    async fn count(&self, resource: &Resource, filter: &WhereOptions) -> Result<u64, AppError>;

    /// Rows matching `filter`, ordered, paginated and projected per `options` (populate is ignored here).
    async fn find(
        &self,
        resource: &Resource,
        options: &FindOptions,
        filter: &WhereOptions,
    ) -> Result<Vec<Entity>, AppError>;

    async fn find_one(&self, resource: &Resource, id: &Value) -> Result<Option<Entity>, AppError>;

    /// Persist a new row. Many-to-many fields in `body` (arrays of ids) are written to their pivot tables.
    async fn insert(&self, resource: &Resource, body: &Entity) -> Result<Entity, AppError>;

    /// Persist several rows as one unit.
    async fn insert_many(&self, resource: &Resource, bodies: &[Entity]) -> Result<Vec<Entity>, AppError>;

    /// Merge `body` into the row with `id`. Returns None when no such row exists.
    async fn update(&self, resource: &Resource, id: &Value, body: &Entity) -> Result<Option<Entity>, AppError>;

    /// Remove the row with `id`. Returns whether a row was removed.
    async fn remove(&self, resource: &Resource, id: &Value) -> Result<bool, AppError>;

    /// Ids linked to `id` through a many-to-many pivot table.
    async fn pivot_ids(&self, pivot: &PivotTable, id: &Value) -> Result<Vec<Value>, AppError>;

    /// Storage liveness check for readiness probes.
    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Many-to-many fields present in `body` with the ids they should link to.
pub(crate) fn pivot_assignments<'a>(
    resource: &'a Resource,
    body: &'a Entity,
) -> impl Iterator<Item = (&'a PivotTable, Vec<Value>)> + 'a {
    resource.relation_fields().filter_map(move |f| {
        let pivot = f.relation.as_ref()?.pivot.as_ref()?;
        let ids = match body.get(&f.name)? {
            Value::Array(items) => items.iter().map(related_id).collect(),
            Value::Null => Vec::new(),
            other => vec![related_id(other)],
        };
        Some((pivot, ids))
    })
}

/// Accept either a bare id or an object carrying `id`.
pub(crate) fn related_id(v: &Value) -> Value {
    match v {
        Value::Object(map) => map.get("id").cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}
