//! Traffic Survey server.
//!
//! Serves the survey HTTP API for a single browser session. See the library
//! crate for the endpoint list and [`trafficsurvey::config`] for settings.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use trafficsurvey::api::{AppState, router};
use trafficsurvey::config::AppConfig;
use trafficsurvey::controller::SurveyState;
use trafficsurvey::insight::GenerativeInsightClient;
use trafficsurvey::session::spawn_session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Remarks are free text; keep the default level at INFO so they never reach the logs
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("trafficsurvey=info".parse()?))
        .init();

    let config = AppConfig::from_env();

    info!(
        port = config.port,
        reset_policy = ?config.reset_policy,
        default_duration_minutes = config.default_duration_minutes,
        insight_url = %config.insight.base_url,
        insight_model = %config.insight.model,
        "Starting Traffic Survey server"
    );
    if config.insight.api_key.is_none() {
        warn!("INSIGHT_API_KEY is not set; insight requests will be sent without credentials");
    }

    let service = Arc::new(GenerativeInsightClient::new(config.insight.clone()));
    let session = spawn_session(
        service,
        SurveyState::new(config.reset_policy, config.default_duration_minutes),
    );

    let app = router(AppState {
        session: session.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Traffic Survey is listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    session.shutdown().await;
    info!("Session closed");

    Ok(())
}
