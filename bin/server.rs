// Corta-Mato Registration System - Web Server
// REST API with Axum; arrivals arrive via GET /chegada?processo=<id>

use anyhow::{Context, Result};
use corta_mato::api::{build_router, AppState};
use corta_mato::{init_tracing, Config, RegistrationDesk, TokenMode};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env();
    let desk = RegistrationDesk::open(&config)?;

    if config.admin_token.is_none() {
        warn!("CORTA_MATO_ADMIN_TOKEN not set, admin operations are disabled");
    }
    if let TokenMode::ArrivalUrl { base_url } = &config.token_mode {
        info!(%base_url, "dorsais encode arrival URLs");
    }

    let addr = config.bind_addr.clone();
    let app = build_router(AppState::new(desk, config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, "server running");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/inscricoes", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
