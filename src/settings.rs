//! Process settings from the environment (a `.env` file is honored).

use crate::error::ConfigError;
use crate::routes::DEFAULT_BODY_LIMIT;
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// PostgreSQL connection string; without it resources are served from memory.
    pub database_url: Option<String>,
    /// JSON file with the resource declarations.
    pub resources_path: PathBuf,
    pub bind_addr: String,
    pub max_connections: u32,
    /// Request body limit in bytes.
    pub body_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            resources_path: PathBuf::from("resources.json"),
            bind_addr: "0.0.0.0:3000".into(),
            max_connections: 5,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl Settings {
    /// Read `DATABASE_URL`, `RESOURCES_PATH`, `BIND_ADDR`, `MAX_CONNECTIONS` and `BODY_LIMIT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let number = |key: &str| -> Result<Option<u64>, ConfigError> {
            lookup(key)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .map_err(|_| ConfigError::Load(format!("{} must be a positive integer, got {:?}", key, v)))
                })
                .transpose()
        };
        Ok(Settings {
            database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            resources_path: lookup("RESOURCES_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.resources_path),
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_connections: number("MAX_CONNECTIONS")?
                .map(|n| n as u32)
                .unwrap_or(defaults.max_connections),
            body_limit: number("BODY_LIMIT")?
                .map(|n| n as usize)
                .unwrap_or(defaults.body_limit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_unset() {
        let s = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn reads_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "postgres://localhost/blog"),
            ("MAX_CONNECTIONS", "12"),
            ("BODY_LIMIT", "1024"),
        ]);
        let s = Settings::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(s.database_url.as_deref(), Some("postgres://localhost/blog"));
        assert_eq!(s.max_connections, 12);
        assert_eq!(s.body_limit, 1024);
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = Settings::from_lookup(|k| (k == "MAX_CONNECTIONS").then(|| "many".to_string()));
        assert!(matches!(err, Err(ConfigError::Load(_))));
    }
}
