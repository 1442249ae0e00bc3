//! Declaration validation: referential integrity of relations and slug uniqueness.

use crate::case::slug_forms;
use crate::config::{Cardinality, FieldType, FullConfig, ResourceConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

fn invalid_relation(resource: &str, field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidRelation {
        resource: resource.to_string(),
        field: field.to_string(),
        reason: reason.into(),
    }
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let by_name: HashMap<&str, &ResourceConfig> =
        config.resources.iter().map(|r| (r.name.as_str(), r)).collect();

    let mut names = HashSet::new();
    let mut slugs = HashSet::new();
    for r in &config.resources {
        if r.name.trim().is_empty() {
            return Err(ConfigError::Validation("resource name must not be empty".into()));
        }
        if !names.insert(r.name.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate resource name: {}", r.name)));
        }
        let slug = slug_forms(&r.name).plural;
        if !slugs.insert(slug.clone()) {
            return Err(ConfigError::DuplicateSlug(slug));
        }
        validate_resource(r, &by_name)?;
    }
    Ok(())
}

fn validate_resource(
    r: &ResourceConfig,
    by_name: &HashMap<&str, &ResourceConfig>,
) -> Result<(), ConfigError> {
    let mut field_names = HashSet::new();
    for f in &r.fields {
        if !field_names.insert(f.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate field {}.{}",
                r.name, f.name
            )));
        }
    }

    let pks: Vec<_> = r.fields.iter().filter(|f| f.primary_key).collect();
    if pks.len() > 1 {
        return Err(ConfigError::InvalidPrimaryKey {
            resource: r.name.clone(),
            field: pks[1].name.clone(),
        });
    }
    if let Some(pk) = pks.first() {
        let key_type = matches!(
            pk.type_,
            FieldType::Integer | FieldType::Bigint | FieldType::Uuid | FieldType::String | FieldType::Text
        );
        if pk.relation.is_some() || !key_type {
            return Err(ConfigError::InvalidPrimaryKey {
                resource: r.name.clone(),
                field: pk.name.clone(),
            });
        }
    }

    if let Some(display) = &r.display_field {
        if !field_names.contains(display.as_str()) && display != "id" {
            return Err(ConfigError::MissingReference {
                kind: "display field",
                id: format!("{}.{}", r.name, display),
            });
        }
    }

    if r.per_page_options.is_empty() || r.per_page_options.contains(&0) {
        return Err(ConfigError::Validation(format!(
            "{}: per_page_options must be non-empty positive numbers",
            r.name
        )));
    }

    for hidden in &r.hidden_fields {
        if !field_names.contains(hidden.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "hidden field",
                id: format!("{}.{}", r.name, hidden),
            });
        }
    }

    for filter in &r.filters {
        if !filter.where_.is_object() {
            return Err(ConfigError::Validation(format!(
                "{}: filter '{}' must be an object",
                r.name, filter.name
            )));
        }
    }

    for f in &r.fields {
        let Some(rel) = &f.relation else { continue };
        let target = by_name
            .get(rel.resource.as_str())
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "resource",
                id: rel.resource.clone(),
            })?;
        match rel.cardinality {
            Cardinality::OneToMany => {
                let inverse = rel
                    .inverse
                    .as_deref()
                    .ok_or_else(|| invalid_relation(&r.name, &f.name, "one_to_many requires inverse"))?;
                expect_owning(r, &f.name, target, inverse, Cardinality::ManyToOne)?;
            }
            Cardinality::OneToOne => {
                if let Some(inverse) = rel.inverse.as_deref() {
                    expect_owning(r, &f.name, target, inverse, Cardinality::OneToOne)?;
                }
            }
            Cardinality::ManyToMany => {
                if rel.resource == r.name {
                    return Err(invalid_relation(
                        &r.name,
                        &f.name,
                        "self-referencing many_to_many is not supported",
                    ));
                }
            }
            Cardinality::ManyToOne => {}
        }
    }
    Ok(())
}

/// The inverse side of a relation must name an owning relation on the target pointing back at us.
fn expect_owning(
    r: &ResourceConfig,
    field: &str,
    target: &ResourceConfig,
    inverse: &str,
    cardinality: Cardinality,
) -> Result<(), ConfigError> {
    let owning = target
        .fields
        .iter()
        .find(|tf| tf.name == inverse)
        .and_then(|tf| tf.relation.as_ref())
        .ok_or_else(|| {
            invalid_relation(&r.name, field, format!("inverse {}.{} is not a relation", target.name, inverse))
        })?;
    if owning.cardinality != cardinality || owning.resource != r.name || owning.inverse.is_some() {
        return Err(invalid_relation(
            &r.name,
            field,
            format!(
                "inverse {}.{} must be an owning {} relation to {}",
                target.name,
                inverse,
                cardinality.as_str(),
                r.name
            ),
        ));
    }
    Ok(())
}
