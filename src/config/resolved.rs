//! Resolved resource model: declarations validated and flattened for runtime use.

use crate::config::{Cardinality, FieldType, ValidationRule};
use crate::query::WhereOptions;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Primary key type for parsing path/body ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkType {
    Int,
    Uuid,
    Text,
}

impl PkType {
    /// Field type used for columns that hold a key of this type (primary or foreign).
    pub fn field_type(&self) -> FieldType {
        match self {
            PkType::Int => FieldType::Bigint,
            PkType::Uuid => FieldType::Uuid,
            PkType::Text => FieldType::Text,
        }
    }
}

/// Join table backing a many-to-many relation, seen from the declaring resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PivotTable {
    pub table: String,
    /// Column holding the declaring resource's id.
    pub our_column: String,
    /// Column holding the related resource's id.
    pub their_column: String,
    pub our_type: FieldType,
    pub their_type: FieldType,
}

#[derive(Clone, Debug)]
pub struct Relation {
    pub cardinality: Cardinality,
    /// Related resource name.
    pub resource: String,
    /// Owning field on the related resource, for one_to_many and inverse one_to_one.
    pub inverse: Option<String>,
    pub pivot: Option<PivotTable>,
}

impl Relation {
    /// The foreign key lives on the declaring resource's table.
    pub fn is_owning(&self) -> bool {
        match self.cardinality {
            Cardinality::ManyToOne => true,
            Cardinality::OneToOne => self.inverse.is_none(),
            Cardinality::OneToMany | Cardinality::ManyToMany => false,
        }
    }

    pub fn is_to_many(&self) -> bool {
        self.cardinality.is_to_many()
    }
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub column: String,
    pub type_: FieldType,
    pub nullable: bool,
    pub has_default: bool,
    pub default: Option<serde_json::Value>,
    pub primary_key: bool,
    /// Written by the framework (timestamps), never taken from request bodies.
    pub managed: bool,
    pub relation: Option<Relation>,
    pub rule: ValidationRule,
    pub help_text: Option<String>,
}

impl Field {
    /// Whether the field is stored as a column on its resource's table.
    pub fn has_column(&self) -> bool {
        self.relation.as_ref().map(Relation::is_owning).unwrap_or(true)
    }

    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }

    /// Must be present on insert: explicitly required, or a non-nullable column with no default.
    pub fn is_required(&self) -> bool {
        if self.managed || (self.primary_key && self.has_default) {
            return false;
        }
        self.rule.required == Some(true) || (self.has_column() && !self.nullable && !self.has_default)
    }
}

#[derive(Clone, Debug)]
pub struct Resource {
    pub name: String,
    pub pascal_name: String,
    pub snake_name: String,
    pub snake_plural: String,
    pub slug_singular: String,
    /// URL path segment.
    pub slug_plural: String,
    pub table_name: String,
    pub primary_key: String,
    pub pk_type: PkType,
    pub fields: Vec<Field>,
    pub display_field: String,
    pub per_page_options: Vec<u32>,
    pub filters: HashMap<String, WhereOptions>,
    pub hidden_fields: HashSet<String>,
}

impl Resource {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn pk_field(&self) -> &Field {
        self.fields
            .iter()
            .find(|f| f.primary_key)
            .unwrap_or(&self.fields[0])
    }

    /// Page size used when `per_page` is missing: the first per-page option.
    pub fn default_per_page(&self) -> u64 {
        self.per_page_options.first().copied().unwrap_or(10) as u64
    }

    /// Fields stored as columns on this resource's table, in declaration order.
    pub fn column_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.has_column())
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_relation())
    }

    /// Whether `name` is a field stored on this table (filterable, sortable, projectable).
    pub fn is_column(&self, name: &str) -> bool {
        self.field(name).map(Field::has_column).unwrap_or(false)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedModel {
    pub resources: Vec<Arc<Resource>>,
    by_name: HashMap<String, usize>,
    by_slug: HashMap<String, usize>,
}

impl ResolvedModel {
    pub fn new(resources: Vec<Resource>) -> Self {
        let resources: Vec<Arc<Resource>> = resources.into_iter().map(Arc::new).collect();
        let by_name = resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
        let by_slug = resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.slug_plural.clone(), i))
            .collect();
        ResolvedModel {
            resources,
            by_name,
            by_slug,
        }
    }

    pub fn resource(&self, name: &str) -> Option<&Arc<Resource>> {
        self.by_name.get(name).map(|&i| &self.resources[i])
    }

    pub fn resource_by_slug(&self, slug: &str) -> Option<&Arc<Resource>> {
        self.by_slug.get(slug).map(|&i| &self.resources[i])
    }

    /// Find a relation field of `resource` by field name, or by the related resource's slug
    /// (singular or plural) when no field carries that name.
    pub fn relation_field<'a>(&self, resource: &'a Resource, name: &str) -> Option<&'a Field> {
        if let Some(field) = resource.field(name) {
            return field.is_relation().then_some(field);
        }
        resource.relation_fields().find(|f| {
            let Some(rel) = &f.relation else { return false };
            self.resource(&rel.resource)
                .map(|r| r.slug_plural == name || r.slug_singular == name)
                .unwrap_or(false)
        })
    }
}
