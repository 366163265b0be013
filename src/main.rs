use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use electora_api::{config::Config, router, services::users::UserService, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let users = UserService::from_config(&config).map(Arc::new);
    if users.is_some() {
        info!("Supabase backend configured");
    } else {
        warn!("SUPABASE_URL / SUPABASE_SERVICE_ROLE_KEY not set — user management disabled");
    }

    let state = AppState {
        config: config.clone(),
        users,
    };
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("electora API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
