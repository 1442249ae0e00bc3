//! In-process entity manager. Rows live in per-table vectors behind a lock; useful for embedding
//! the REST layer without a database and for tests.

use crate::config::{PivotTable, PkType, Resource};
use crate::error::AppError;
use crate::query::filter::{compare_values, loose_eq};
use crate::query::{FindOptions, SortDirection, WhereOptions};
use crate::service::manager::{pivot_assignments, Entity, EntityManager};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Table {
    rows: Vec<Entity>,
    next_id: i64,
}

#[derive(Default)]
struct Store {
    tables: HashMap<String, Table>,
    /// Pivot table name -> rows of (column -> id).
    pivots: HashMap<String, Vec<Entity>>,
}

#[derive(Default)]
pub struct MemoryManager {
    store: RwLock<Store>,
}

fn now() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339())
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Store>, AppError> {
        self.store
            .read()
            .map_err(|_| AppError::Internal("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Store>, AppError> {
        self.store
            .write()
            .map_err(|_| AppError::Internal("memory store lock poisoned".into()))
    }
}

impl Store {
    fn insert_row(&mut self, resource: &Resource, body: &Entity) -> Result<Entity, AppError> {
        let table = self.tables.entry(resource.table_name.clone()).or_default();
        let mut row = Entity::new();
        for field in resource.column_fields() {
            let value = if field.managed {
                now()
            } else if let Some(v) = body.get(&field.name) {
                v.clone()
            } else if field.primary_key && field.has_default {
                match resource.pk_type {
                    PkType::Int => Value::from(table.next_id + 1),
                    PkType::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
                    PkType::Text => Value::Null,
                }
            } else {
                field.default.clone().unwrap_or(Value::Null)
            };
            row.insert(field.name.clone(), value);
        }

        let id = row.get(&resource.primary_key).cloned().unwrap_or(Value::Null);
        if id.is_null() {
            return Err(AppError::Validation(format!("{} is required", resource.primary_key)));
        }
        if table
            .rows
            .iter()
            .any(|r| r.get(&resource.primary_key).map(|v| loose_eq(v, &id)).unwrap_or(false))
        {
            return Err(AppError::BadRequest(format!(
                "{} with ID {} already exists",
                resource.pascal_name, id
            )));
        }
        if let Some(n) = id.as_i64() {
            table.next_id = table.next_id.max(n);
        }
        table.rows.push(row.clone());
        self.assign_pivots(resource, &id, body);
        Ok(row)
    }

    fn assign_pivots(&mut self, resource: &Resource, id: &Value, body: &Entity) {
        for (pivot, ids) in pivot_assignments(resource, body) {
            let rows = self.pivots.entry(pivot.table.clone()).or_default();
            rows.retain(|r| !r.get(&pivot.our_column).map(|v| loose_eq(v, id)).unwrap_or(false));
            for their in ids {
                let mut link = Entity::new();
                link.insert(pivot.our_column.clone(), id.clone());
                link.insert(pivot.their_column.clone(), their);
                rows.push(link);
            }
        }
    }

    fn position(&self, resource: &Resource, id: &Value) -> Option<usize> {
        self.tables.get(&resource.table_name)?.rows.iter().position(|r| {
            r.get(&resource.primary_key)
                .map(|v| loose_eq(v, id))
                .unwrap_or(false)
        })
    }
}

fn order_rows(rows: &mut [Entity], order_by: &[(String, SortDirection)], pk: &str) {
    rows.sort_by(|a, b| {
        for (field, direction) in order_by {
            let ord = compare_values(
                a.get(field).unwrap_or(&Value::Null),
                b.get(field).unwrap_or(&Value::Null),
            );
            let ord = match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        compare_values(a.get(pk).unwrap_or(&Value::Null), b.get(pk).unwrap_or(&Value::Null))
    });
}

fn project(row: Entity, fields: &[String]) -> Entity {
    if fields.is_empty() {
        return row;
    }
    row.into_iter().filter(|(k, _)| fields.contains(k)).collect()
}

#[async_trait]
impl EntityManager for MemoryManager {
    async fn count(&self, resource: &Resource, filter: &WhereOptions) -> Result<u64, AppError> {
        let store = self.read()?;
        Ok(store
            .tables
            .get(&resource.table_name)
            .map(|t| t.rows.iter().filter(|r| filter.matches(r)).count() as u64)
            .unwrap_or(0))
    }

    async fn find(
        &self,
        resource: &Resource,
        options: &FindOptions,
        filter: &WhereOptions,
    ) -> Result<Vec<Entity>, AppError> {
        let mut rows: Vec<Entity> = {
            let store = self.read()?;
            match store.tables.get(&resource.table_name) {
                Some(t) => t.rows.iter().filter(|r| filter.matches(r)).cloned().collect(),
                None => Vec::new(),
            }
        };
        order_rows(&mut rows, &options.order_by, &resource.primary_key);
        let limit = options.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(usize::try_from(options.offset).unwrap_or(usize::MAX))
            .take(limit)
            .map(|r| project(r, &options.fields))
            .collect())
    }

    async fn find_one(&self, resource: &Resource, id: &Value) -> Result<Option<Entity>, AppError> {
        let store = self.read()?;
        Ok(store
            .position(resource, id)
            .and_then(|i| store.tables.get(&resource.table_name).map(|t| t.rows[i].clone())))
    }

    async fn insert(&self, resource: &Resource, body: &Entity) -> Result<Entity, AppError> {
        self.write()?.insert_row(resource, body)
    }

    async fn insert_many(&self, resource: &Resource, bodies: &[Entity]) -> Result<Vec<Entity>, AppError> {
        let mut store = self.write()?;
        let snapshot_rows = store.tables.get(&resource.table_name).map(|t| (t.rows.len(), t.next_id));
        let snapshot_pivots = store.pivots.clone();
        let mut out = Vec::with_capacity(bodies.len());
        for body in bodies {
            match store.insert_row(resource, body) {
                Ok(row) => out.push(row),
                Err(e) => {
                    // Roll back the rows written so far.
                    if let Some(table) = store.tables.get_mut(&resource.table_name) {
                        let (len, next_id) = snapshot_rows.unwrap_or((0, 0));
                        table.rows.truncate(len);
                        table.next_id = next_id;
                    }
                    store.pivots = snapshot_pivots;
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    async fn update(&self, resource: &Resource, id: &Value, body: &Entity) -> Result<Option<Entity>, AppError> {
        let mut store = self.write()?;
        let Some(i) = store.position(resource, id) else {
            return Ok(None);
        };
        let updated = {
            let Some(table) = store.tables.get_mut(&resource.table_name) else {
                return Ok(None);
            };
            let row = &mut table.rows[i];
            for field in resource.column_fields() {
                if field.primary_key {
                    continue;
                }
                if field.managed {
                    if field.name == "updated_at" {
                        row.insert(field.name.clone(), now());
                    }
                    continue;
                }
                if let Some(v) = body.get(&field.name) {
                    row.insert(field.name.clone(), v.clone());
                }
            }
            row.clone()
        };
        store.assign_pivots(resource, id, body);
        Ok(Some(updated))
    }

    async fn remove(&self, resource: &Resource, id: &Value) -> Result<bool, AppError> {
        let mut store = self.write()?;
        let Some(i) = store.position(resource, id) else {
            return Ok(false);
        };
        if let Some(table) = store.tables.get_mut(&resource.table_name) {
            table.rows.remove(i);
        }
        // Pivot rows pointing at this resource, whichever side declared the relation.
        let column = format!("{}_id", resource.snake_name);
        for rows in store.pivots.values_mut() {
            rows.retain(|r| !r.get(&column).map(|v| loose_eq(v, id)).unwrap_or(false));
        }
        Ok(true)
    }

    async fn pivot_ids(&self, pivot: &PivotTable, id: &Value) -> Result<Vec<Value>, AppError> {
        let store = self.read()?;
        Ok(store
            .pivots
            .get(&pivot.table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.get(&pivot.our_column).map(|v| loose_eq(v, id)).unwrap_or(false))
                    .filter_map(|r| r.get(&pivot.their_column).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}
