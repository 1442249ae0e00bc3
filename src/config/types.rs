//! Raw resource declarations as they appear in the JSON config.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Scalar type of a field. Relation fields take the type of the related primary key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    String,
    Text,
    Integer,
    Bigint,
    Float,
    Boolean,
    Timestamp,
    Date,
    Json,
    Uuid,
}

impl FieldType {
    /// PostgreSQL type used for columns and parameter casts.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::String | FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Bigint => "bigint",
            FieldType::Float => "double precision",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamptz",
            FieldType::Date => "date",
            FieldType::Json => "jsonb",
            FieldType::Uuid => "uuid",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Bigint | FieldType::Float)
    }

    /// Whether PostgreSQL accepts `s` as a literal of this type.
    pub fn parses(&self, s: &str) -> bool {
        let s = s.trim();
        match self {
            FieldType::String | FieldType::Text | FieldType::Json => true,
            FieldType::Integer => s.parse::<i32>().is_ok(),
            FieldType::Bigint => s.parse::<i64>().is_ok(),
            FieldType::Float => s.parse::<f64>().is_ok(),
            FieldType::Boolean => matches!(
                s.to_ascii_lowercase().as_str(),
                "t" | "f" | "true" | "false" | "yes" | "no" | "on" | "off" | "1" | "0"
            ),
            FieldType::Timestamp => parses_timestamp(s),
            FieldType::Date => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
            FieldType::Uuid => uuid::Uuid::parse_str(s).is_ok(),
        }
    }
}

fn parses_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToMany,
    ManyToOne,
}

impl Cardinality {
    pub fn is_to_many(&self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinality::OneToOne => "one_to_one",
            Cardinality::OneToMany => "one_to_many",
            Cardinality::ManyToMany => "many_to_many",
            Cardinality::ManyToOne => "many_to_one",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationConfig {
    pub cardinality: Cardinality,
    /// Name of the related resource.
    pub resource: String,
    /// Owning field on the related resource (one_to_many, inverse side of one_to_one).
    #[serde(default)]
    pub inverse: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_: FieldType,
    /// Column name; defaults to the field name, or `{name}_id` for owning relations.
    #[serde(default)]
    pub database_field: Option<String>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub relation: Option<RelationConfig>,
    #[serde(default)]
    pub rules: ValidationRule,
    #[serde(default)]
    pub help_text: Option<String>,
    #[serde(default, deserialize_with = "deserialize_default")]
    pub default: Option<Value>,
}

/// Distinguishes an explicit `"default": null` from an absent key.
fn deserialize_default<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn default_true() -> bool {
    true
}

/// A named where predicate that requests can switch on with `?filters=name`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterConfig {
    pub name: String,
    #[serde(rename = "where")]
    pub where_: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub display_field: Option<String>,
    #[serde(default = "default_per_page_options")]
    pub per_page_options: Vec<u32>,
    /// Table name; defaults to the snake_case plural of the resource name.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    /// Field names that must never be exposed in API responses (e.g. password hashes).
    #[serde(default)]
    pub hidden_fields: Vec<String>,
    /// Adds managed `created_at` / `updated_at` fields.
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

pub fn default_per_page_options() -> Vec<u32> {
    vec![10, 25, 50]
}

/// All resource declarations for one application.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    pub resources: Vec<ResourceConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_defaults() {
        let f: FieldConfig = serde_json::from_value(serde_json::json!({ "name": "title" })).unwrap();
        assert_eq!(f.type_, FieldType::String);
        assert!(f.nullable);
        assert!(!f.primary_key);
        assert!(f.default.is_none());
        assert_eq!(f.rules, ValidationRule::default());
    }

    #[test]
    fn literal_parsing_per_type() {
        assert!(FieldType::Integer.parses(" 42 "));
        assert!(!FieldType::Integer.parses("3000000000"));
        assert!(FieldType::Bigint.parses("3000000000"));
        assert!(!FieldType::Bigint.parses("abc"));
        assert!(FieldType::Boolean.parses("Yes"));
        assert!(!FieldType::Boolean.parses("maybe"));
        assert!(FieldType::Timestamp.parses("2024-01-02T03:04:05Z"));
        assert!(FieldType::Timestamp.parses("2024-01-02 03:04:05"));
        assert!(FieldType::Timestamp.parses("2024-01-02"));
        assert!(!FieldType::Timestamp.parses("soon"));
        assert!(FieldType::Date.parses("2024-02-29"));
        assert!(!FieldType::Date.parses("2023-02-29"));
        assert!(!FieldType::Uuid.parses("x"));
        assert!(FieldType::Text.parses("anything"));
    }

    #[test]
    fn explicit_null_default_is_kept() {
        let f: FieldConfig =
            serde_json::from_value(serde_json::json!({ "name": "bio", "default": null })).unwrap();
        assert_eq!(f.default, Some(Value::Null));
    }

    #[test]
    fn relation_declaration() {
        let f: FieldConfig = serde_json::from_value(serde_json::json!({
            "name": "posts",
            "relation": { "cardinality": "one_to_many", "resource": "Post", "inverse": "author" }
        }))
        .unwrap();
        let rel = f.relation.unwrap();
        assert_eq!(rel.cardinality, Cardinality::OneToMany);
        assert!(rel.cardinality.is_to_many());
        assert_eq!(rel.inverse.as_deref(), Some("author"));
    }

    #[test]
    fn resource_defaults() {
        let r: ResourceConfig =
            serde_json::from_value(serde_json::json!({ "name": "Tag", "fields": [] })).unwrap();
        assert_eq!(r.per_page_options, vec![10, 25, 50]);
        assert!(r.timestamps);
        assert!(r.filters.is_empty());
    }
}
