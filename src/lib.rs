pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use error::*;

pub use logic::{EntityPopulator, EntityService, MetadataResolver, SaveContext, ServiceHooks, Target};

// Export all model types
pub use model::*;

// Export store types
pub use store::{EntityStore, MemoryRepository, Repository, UnitOfWork};

use std::sync::Arc;

use crate::api::handlers::AppState;
use crate::config::AppConfig;

/// Builds the schema registry from the configured file, or the demo schema.
pub fn load_registry(config: &AppConfig) -> anyhow::Result<SchemaRegistry> {
    match &config.schema.path {
        Some(path) => {
            log::info!("Loading entity schema from {}", path.display());
            Ok(SchemaRegistry::load_file(path)?)
        }
        None => {
            log::info!("No schema file configured, using the demo invoicing schema");
            seed::demo_registry()
        }
    }
}

/// Wires registry, in-memory repository and hooks into the shared API state.
pub fn build_state(config: &AppConfig) -> anyhow::Result<AppState<MemoryRepository>> {
    let registry = Arc::new(load_registry(config)?);
    let repository = Arc::new(MemoryRepository::new(registry.clone()));

    let using_demo_schema = config.schema.path.is_none();
    if config.seed.load && using_demo_schema {
        seed::load_seed_data(repository.as_ref())?;
    }

    let mut state = AppState::new(registry, repository)
        .with_convention(config.population.key_convention)
        .with_root_id_key(config.population.root_id_key.clone());
    if using_demo_schema {
        for (entity_type, hooks) in seed::demo_hooks() {
            state = state.with_hooks(entity_type, hooks);
        }
    }
    Ok(state)
}

// Function for integration testing
pub async fn run_server(listener: tokio::net::TcpListener, config: AppConfig) -> anyhow::Result<()> {
    let state = build_state(&config)?;
    let app = crate::api::routes::create_router().with_state(Arc::new(state));

    axum::serve(listener, app).await?;

    Ok(())
}
