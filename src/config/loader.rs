//! Load resource declarations from JSON and resolve them into the runtime model.

use crate::case::{slug_forms, SlugForms};
use crate::config::resolved::{Field, PivotTable, PkType, Relation, ResolvedModel, Resource};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use crate::query::WhereOptions;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Build the resolved model from declarations (validates first).
pub fn resolve(config: &FullConfig) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;

    let forms: HashMap<&str, SlugForms> = config
        .resources
        .iter()
        .map(|r| (r.name.as_str(), slug_forms(&r.name)))
        .collect();
    let pk_types: HashMap<&str, PkType> = config
        .resources
        .iter()
        .map(|r| (r.name.as_str(), declared_pk_type(r)))
        .collect();

    let mut resources = Vec::with_capacity(config.resources.len());
    for r in &config.resources {
        let names = &forms[r.name.as_str()];
        let pk_type = pk_types[r.name.as_str()];

        let mut fields = Vec::with_capacity(r.fields.len() + 3);
        if !r.fields.iter().any(|f| f.primary_key || f.name == "id") {
            fields.push(implicit_id());
        }
        for f in &r.fields {
            let relation = f.relation.as_ref().map(|rel| Relation {
                cardinality: rel.cardinality,
                resource: rel.resource.clone(),
                inverse: rel.inverse.clone(),
                pivot: (rel.cardinality == Cardinality::ManyToMany).then(|| {
                    let theirs = &forms[rel.resource.as_str()];
                    pivot_table(names, pk_type, theirs, pk_types[rel.resource.as_str()])
                }),
            });
            let owning = relation.as_ref().map(Relation::is_owning);
            let type_ = match (&relation, owning) {
                (Some(rel), Some(true)) => pk_types[rel.resource.as_str()].field_type(),
                _ => f.type_,
            };
            let column = match (&f.database_field, owning) {
                (Some(col), _) => col.clone(),
                (None, Some(true)) => format!("{}_id", f.name),
                (None, _) => f.name.clone(),
            };
            let primary_key = f.primary_key || (f.name == "id" && !r.fields.iter().any(|o| o.primary_key));
            fields.push(Field {
                name: f.name.clone(),
                column,
                type_,
                nullable: f.nullable && !primary_key,
                has_default: f.default.is_some()
                    || (primary_key && matches!(pk_type, PkType::Int | PkType::Uuid)),
                default: f.default.clone(),
                primary_key,
                managed: false,
                relation,
                rule: f.rules.clone(),
                help_text: f.help_text.clone(),
            });
        }
        if r.timestamps {
            for name in ["created_at", "updated_at"] {
                if fields.iter().all(|f| f.name != name) {
                    fields.push(timestamp_field(name));
                }
            }
        }

        let primary_key = fields
            .iter()
            .find(|f| f.primary_key)
            .map(|f| f.name.clone())
            .ok_or_else(|| ConfigError::InvalidPrimaryKey {
                resource: r.name.clone(),
                field: "id".into(),
            })?;
        let display_field = r
            .display_field
            .clone()
            .or_else(|| {
                fields
                    .iter()
                    .find(|f| !f.primary_key && f.relation.is_none() && f.type_ == FieldType::String)
                    .map(|f| f.name.clone())
            })
            .unwrap_or_else(|| primary_key.clone());
        let filters = r
            .filters
            .iter()
            .map(|fc| (fc.name.clone(), WhereOptions::from_value(&fc.where_)))
            .collect();

        resources.push(Resource {
            name: r.name.clone(),
            pascal_name: names.pascal.clone(),
            snake_name: names.snake.clone(),
            snake_plural: names.snake_plural.clone(),
            slug_singular: names.singular.clone(),
            slug_plural: names.plural.clone(),
            table_name: r.table.clone().unwrap_or_else(|| names.snake_plural.clone()),
            primary_key,
            pk_type,
            fields,
            display_field,
            per_page_options: r.per_page_options.clone(),
            filters,
            hidden_fields: r.hidden_fields.iter().cloned().collect(),
        });
    }

    Ok(ResolvedModel::new(resources))
}

fn declared_pk_type(r: &ResourceConfig) -> PkType {
    let pk = r
        .fields
        .iter()
        .find(|f| f.primary_key)
        .or_else(|| r.fields.iter().find(|f| f.name == "id"));
    match pk.map(|f| f.type_) {
        None | Some(FieldType::Integer) | Some(FieldType::Bigint) => PkType::Int,
        Some(FieldType::Uuid) => PkType::Uuid,
        Some(_) => PkType::Text,
    }
}

fn implicit_id() -> Field {
    Field {
        name: "id".into(),
        column: "id".into(),
        type_: FieldType::Bigint,
        nullable: false,
        has_default: true,
        default: None,
        primary_key: true,
        managed: false,
        relation: None,
        rule: ValidationRule::default(),
        help_text: None,
    }
}

fn timestamp_field(name: &str) -> Field {
    Field {
        name: name.into(),
        column: name.into(),
        type_: FieldType::Timestamp,
        nullable: false,
        has_default: true,
        default: None,
        primary_key: false,
        managed: true,
        relation: None,
        rule: ValidationRule::default(),
        help_text: None,
    }
}

/// Both sides of a many-to-many share one table named after the sorted snake plurals.
fn pivot_table(ours: &SlugForms, our_pk: PkType, theirs: &SlugForms, their_pk: PkType) -> PivotTable {
    let mut parts = [ours.snake_plural.as_str(), theirs.snake_plural.as_str()];
    parts.sort();
    PivotTable {
        table: parts.join("_"),
        our_column: format!("{}_id", ours.snake),
        their_column: format!("{}_id", theirs.snake),
        our_type: our_pk.field_type(),
        their_type: their_pk.field_type(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigFile {
    Wrapped(FullConfig),
    List(Vec<ResourceConfig>),
}

/// Parse declarations from JSON text: either `{"resources": [...]}` or a bare array.
pub fn parse_config(text: &str) -> Result<FullConfig, ConfigError> {
    let file: ConfigFile = serde_json::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))?;
    Ok(match file {
        ConfigFile::Wrapped(c) => c,
        ConfigFile::List(resources) => FullConfig { resources },
    })
}

/// Load declarations from a JSON file.
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    tracing::debug!(path = %path.display(), "loaded resource declarations");
    parse_config(&text)
}
