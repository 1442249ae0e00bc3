//! Request body validation from field declarations and their rules.

use crate::config::{Field, FieldType, Resource, ValidationRule};
use crate::error::AppError;
use crate::service::manager::related_id;
use crate::service::Entity;
use regex::Regex;
use serde_json::Value;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate an insert body: every required field must be present and non-null.
    pub fn validate(body: &Entity, resource: &Resource) -> Result<(), AppError> {
        for field in &resource.fields {
            let val = body.get(&field.name);
            if field.is_required() && val.map(Value::is_null).unwrap_or(true) {
                return Err(AppError::Validation(format!("{} is required", field.name)));
            }
            if let Some(v) = val {
                validate_field(field, v)?;
            }
        }
        Ok(())
    }

    /// Validate only the fields present in body (for updates). Required is not enforced for missing fields.
    pub fn validate_partial(body: &Entity, resource: &Resource) -> Result<(), AppError> {
        for (name, v) in body {
            if let Some(field) = resource.field(name) {
                if v.is_null() && field.is_required() {
                    return Err(AppError::Validation(format!("{} is required", field.name)));
                }
                validate_field(field, v)?;
            }
        }
        Ok(())
    }
}

fn validate_field(field: &Field, v: &Value) -> Result<(), AppError> {
    if v.is_null() || field.managed {
        return Ok(());
    }
    let name = field.name.as_str();
    match &field.relation {
        Some(rel) if rel.is_to_many() => {
            if let Some(pivot) = &rel.pivot {
                let Some(ids) = v.as_array() else {
                    return Err(AppError::Validation(format!("{} must be an array of ids", name)));
                };
                for id in ids.iter().map(related_id) {
                    if !id.is_null() {
                        validate_type(name, &id, pivot.their_type)?;
                    }
                }
            }
            return Ok(());
        }
        Some(_) => return validate_type(name, v, field.type_),
        None => validate_type(name, v, field.type_)?,
    }
    validate_rule(name, v, &field.rule)
}

fn validate_type(name: &str, v: &Value, type_: FieldType) -> Result<(), AppError> {
    let ok = match type_ {
        FieldType::Integer => v.as_i64().is_some_and(|i| i32::try_from(i).is_ok()),
        FieldType::Bigint => v.is_i64(),
        FieldType::Float => v.is_number(),
        FieldType::Boolean => v.is_boolean(),
        FieldType::String | FieldType::Text => v.is_string(),
        FieldType::Timestamp | FieldType::Date | FieldType::Uuid => v.as_str().is_some_and(|s| type_.parses(s)),
        FieldType::Json => true,
    };
    if ok {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "{} must be of type {}",
            name,
            type_.sql_type()
        )))
    }
}

fn validate_rule(col: &str, v: &Value, rule: &ValidationRule) -> Result<(), AppError> {
    if let Some(format) = &rule.format {
        validate_format(col, v, format)?;
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length {
            if len > max as usize {
                return Err(AppError::Validation(format!(
                    "{} must be at most {} characters",
                    col, max
                )));
            }
        }
        if let Some(min) = rule.min_length {
            if len < min as usize {
                return Err(AppError::Validation(format!(
                    "{} must be at least {} characters",
                    col, min
                )));
            }
        }
        if let Some(pattern) = &rule.pattern {
            let re = Regex::new(pattern)
                .map_err(|_| AppError::Validation(format!("invalid pattern for {}", col)))?;
            if !re.is_match(s) {
                return Err(AppError::Validation(format!("{} does not match required pattern", col)));
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| crate::query::filter::loose_eq(v, a)) {
            return Err(AppError::Validation(format!(
                "{} must be one of: {:?}",
                col,
                allowed.iter().take(5).collect::<Vec<_>>()
            )));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                return Err(AppError::Validation(format!("{} must be at least {}", col, min)));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                return Err(AppError::Validation(format!("{} must be at most {}", col, max)));
            }
        }
    }
    Ok(())
}

fn validate_format(col: &str, v: &Value, format: &str) -> Result<(), AppError> {
    let Some(s) = v.as_str() else { return Ok(()) };
    match format.to_lowercase().as_str() {
        "email" => {
            let valid = s
                .split_once('@')
                .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.ends_with('.'))
                .unwrap_or(false);
            if !valid {
                return Err(AppError::Validation(format!("{} must be a valid email", col)));
            }
        }
        "uuid" => {
            if uuid::Uuid::parse_str(s).is_err() {
                return Err(AppError::Validation(format!("{} must be a valid UUID", col)));
            }
        }
        other => tracing::debug!(field = %col, format = %other, "unknown format rule"),
    }
    Ok(())
}
