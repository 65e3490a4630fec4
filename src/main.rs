use dm_service::policy::{AccessPolicy, UserDirectory};
use dm_service::services::social_client::SocialClient;
use dm_service::websocket::SessionRegistry;
use dm_service::{config, db, error, logging, migrations, routes, state::AppState};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let db = db::init_pool(&cfg.database_url).await?;

    // Schema must be in sync before serving traffic
    migrations::run_all(&db).await?;

    let registry = SessionRegistry::new();

    let (policy, directory): (Arc<dyn AccessPolicy>, Arc<dyn UserDirectory>) =
        match cfg.social_api_url.as_deref() {
            Some(url) => {
                tracing::info!(social_api = %url, "using platform social API for policy checks");
                let client = Arc::new(SocialClient::new(url));
                (client.clone(), client)
            }
            None => {
                tracing::warn!(
                    "SOCIAL_API_URL not set; falling back to permissive in-process policy"
                );
                (
                    Arc::new(dm_service::policy::Unrestricted),
                    Arc::new(dm_service::policy::StaticDirectory::standard()),
                )
            }
        };

    let state = AppState {
        db,
        registry,
        policy,
        directory,
        config: cfg.clone(),
    };

    let router = routes::build_router(state);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting dm-service");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::Config(format!("bind {bind_addr}: {e}")))?;
    axum::serve(listener, router)
        .await
        .map_err(|e| error::AppError::Config(format!("server: {e}")))?;

    Ok(())
}
