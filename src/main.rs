use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use jarvis_ocr_worker::config::Config;
use jarvis_ocr_worker::controller::{ControllerConfig, TierController};
use jarvis_ocr_worker::dequeue::DequeueLoop;
use jarvis_ocr_worker::image_resolver::ServiceImageResolver;
use jarvis_ocr_worker::judge::GatewayJudgeClient;
use jarvis_ocr_worker::ocr::engine::{HttpEngine, TesseractEngine};
use jarvis_ocr_worker::orchestrator::Orchestrator;
use jarvis_ocr_worker::queue::RedisJobQueue;
use jarvis_ocr_worker::state_store::RedisStateStore;
use jarvis_ocr_worker::tiers::{enabled_tier_order, Tier, TierRegistry};
use jarvis_ocr_worker::{routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let config = Config::from_env()?;
    info!(bind_address = %config.bind_address, "starting jarvis-ocr-worker");

    let job_queue = Arc::new(RedisJobQueue::connect(&config.redis_url).await?);
    let state_store = Arc::new(RedisStateStore::connect(&config.redis_url, config.validation_state_ttl_seconds).await?);
    let judge = Arc::new(GatewayJudgeClient::new(
        config.llm_gateway_url.clone(),
        config.llm_app_id.clone(),
        config.llm_app_key.clone(),
        config.judge_model.clone(),
        config.judge_timeout,
    ));

    #[cfg_attr(not(feature = "s3"), allow(unused_mut))]
    let mut resolver = ServiceImageResolver::new(config.image_mount_root.clone());
    #[cfg(feature = "s3")]
    {
        let aws_cfg = aws_config::load_from_env().await;
        resolver = resolver.with_s3_client(aws_sdk_s3::Client::new(&aws_cfg));
    }
    let resolver = Arc::new(resolver);

    let registry = build_tier_registry(&config);
    let tier_order = enabled_tier_order(&config.enabled_tiers);

    let controller = Arc::new(TierController::new(
        Arc::new(registry),
        resolver,
        judge,
        state_store.clone(),
        ControllerConfig {
            max_output_bytes: config.max_output_bytes,
            min_valid_chars: config.min_valid_chars,
            min_confidence_floor: config.min_confidence_floor,
            default_language: config.default_language.clone(),
            callback_url: config.callback_url(),
        },
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        controller,
        job_queue.clone(),
        config.job_queue_name.clone(),
        tier_order,
        config.max_retry_attempts,
    ));

    let app_state = AppState { state_store, orchestrator: orchestrator.clone() };
    let app = routes::router(app_state).layer(TraceLayer::new_for_http());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let dequeue_loop = DequeueLoop::new(job_queue, config.job_queue_name.clone(), orchestrator);
    let dequeue_task = tokio::spawn(dequeue_loop.run(shutdown_rx));

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(bind_address = %config.bind_address, "listening for validation callbacks");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = dequeue_task.await {
        warn!(error = %e, "dequeue loop task panicked");
    }

    Ok(())
}

fn build_tier_registry(config: &Config) -> TierRegistry {
    let mut registry = TierRegistry::new();
    for tier in &config.enabled_tiers {
        match tier {
            Tier::Tesseract => {
                registry.register(*tier, Arc::new(TesseractEngine::new("tesseract", Duration::from_secs(30))));
            }
            other => {
                let base_url = std::env::var(format!("OCR_{}_URL", other.as_str().to_uppercase()))
                    .unwrap_or_else(|_| format!("http://{}:8000", other.as_str().replace('_', "-")));
                registry.register(*tier, Arc::new(HttpEngine::new(base_url, Duration::from_secs(30))));
            }
        }
    }
    registry
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
