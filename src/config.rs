use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::KeyConvention;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub population: PopulationConfig,
    pub schema: SchemaConfig,
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PopulationConfig {
    pub key_convention: KeyConvention,
    /// Request key carrying the root identifier; the type's identifier when unset.
    pub root_id_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// JSON file with entity type definitions. The demo schema is used when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfig {
    pub load: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self { load: true }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `config` file and `CRUD_*` variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("config").required(false));

        // CRUD_SERVER__PORT=8080, CRUD_POPULATION__KEY_CONVENTION=snake
        config = config.add_source(
            config::Environment::with_prefix("CRUD")
                .separator("__")
                .prefix_separator("_")
                .try_parsing(true),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_config() {
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .build()
            .unwrap();
        let loaded: AppConfig = config.try_deserialize().unwrap();

        assert_eq!(loaded.server_address(), "127.0.0.1:3001");
        assert_eq!(loaded.population.key_convention, KeyConvention::Both);
        assert!(loaded.population.root_id_key.is_none());
        assert!(loaded.schema.path.is_none());
        assert!(loaded.seed.load);
    }

    #[test]
    fn test_overrides_are_layered_on_defaults() {
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .set_override("server.port", 8080)
            .unwrap()
            .set_override("population.key_convention", "snake")
            .unwrap()
            .build()
            .unwrap();
        let loaded: AppConfig = config.try_deserialize().unwrap();

        assert_eq!(loaded.server.port, 8080);
        assert_eq!(loaded.server.host, "127.0.0.1");
        assert_eq!(loaded.population.key_convention, KeyConvention::Snake);
    }
}
