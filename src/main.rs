mod api;
mod config;
mod data;
mod drivers;
mod error;
mod multiplexer;
mod service;
#[cfg(test)]
mod testutil;

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use log::{debug, error, info};
use tower_http::cors::CorsLayer;

use crate::api::{create_api_router, ApiState};
use crate::config::{Config, STATS_INTERVAL_SECS};
use crate::data::FeedEvent;
use crate::multiplexer::FeedMultiplexer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    config.log_config();

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e.into());
    }

    let multiplexer = FeedMultiplexer::new(&config);
    multiplexer.start_health_monitor();
    start_background_tasks(multiplexer.clone());

    if config.auto_start {
        for (service, response) in multiplexer.start_all_services().await {
            match response.error {
                Some(e) => error!("{} failed to start: {}", service, e),
                None => info!("{}: {}", service, response.message.unwrap_or_default()),
            }
        }
    } else {
        info!("📊 Feeds idle - POST /api/feeds/:service/start to begin streaming");
    }

    let api_router = create_api_router(ApiState { multiplexer: multiplexer.clone() })
        .layer(CorsLayer::permissive());

    let api_listener = TcpListener::bind(&config.api_bind_address).await?;
    info!("🌐 HTTP API server running at http://{}", config.api_bind_address);

    axum::serve(api_listener, api_router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    multiplexer.stop_all_services();
    info!("Feed multiplexer shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, stopping feeds");
}

fn start_background_tasks(multiplexer: Arc<FeedMultiplexer>) {
    // Event log
    let mut events = multiplexer.subscribe_events();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                FeedEvent::DataUpdated { record, .. } => {
                    if let Ok(json) = record.to_json() {
                        debug!("[{}] {}", event.service(), json);
                    }
                }
                other => debug!("[{}] {:?}", event.service(), other),
            }
        }
    });

    // Stats task
    tokio::spawn(async move {
        let mut interval_timer = interval(Duration::from_secs(STATS_INTERVAL_SECS));

        loop {
            interval_timer.tick().await;
            debug!("Stats - event listeners: {}", multiplexer.event_listener_count());
            for status in multiplexer.get_all_services_status().values().filter(|s| s.is_active) {
                info!(
                    "Stats - {}: {:?}, {} cached, {} subscribers, {} reconnect attempts",
                    status.service,
                    status.state,
                    status.cached_symbols,
                    status.subscriber_count,
                    status.reconnect_attempts
                );
            }
        }
    });

    info!("📈 Started stats monitoring task (every {} seconds)", STATS_INTERVAL_SECS);
}
