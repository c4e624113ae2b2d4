use entity_crud::config::AppConfig;
use entity_crud::run_server;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    log::info!("Entity CRUD server starting");

    let config = AppConfig::load()?;
    log::info!(
        "Configuration loaded: server={}:{} key_convention={:?} seed={}",
        config.server.host,
        config.server.port,
        config.population.key_convention,
        config.seed.load
    );

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("Entity CRUD server running on http://{}", bind_address);

    run_server(listener, config).await?;

    Ok(())
}
