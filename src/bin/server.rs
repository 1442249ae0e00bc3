//! Server: loads resource declarations from `RESOURCES_PATH`, serves them from PostgreSQL when
//! `DATABASE_URL` is set (creating database and tables as needed), else from memory.

use resource_rest::{
    app_router, apply_migrations, ensure_database_exists, load_from_path, resolve, AppState, EntityManager,
    MemoryManager, PgManager, Settings,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("resource_rest=info,tower_http=info")),
        )
        .init();

    let config = load_from_path(&settings.resources_path).await?;
    let model = resolve(&config)?;
    tracing::info!(
        path = %settings.resources_path.display(),
        resources = model.resources.len(),
        "loaded resources"
    );

    let manager: Arc<dyn EntityManager> = match &settings.database_url {
        Some(database_url) => {
            ensure_database_exists(database_url).await?;
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .connect(database_url)
                .await?;
            apply_migrations(&pool, &model).await?;
            Arc::new(PgManager::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; serving resources from memory");
            Arc::new(MemoryManager::new())
        }
    };

    let app = app_router(AppState::new(manager, model), settings.body_limit);
    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
