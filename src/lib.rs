pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod prompt;
pub mod segmenter;
pub mod state;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use config::{EngineKind, Settings, SettingsError};
use engine::{
    batched::{BatchConfig, BatchedEngine},
    local::LocalEngine,
    remote::RemoteEngine,
    Engine, EngineHost,
};
use tracing::info;

pub fn build_engine(settings: &Settings) -> Result<Arc<dyn Engine>, SettingsError> {
    let engine: Arc<dyn Engine> = match settings.engine_type {
        EngineKind::Local => Arc::new(LocalEngine::echo(settings.model_name.clone())),
        EngineKind::Remote => {
            let base_url = settings
                .remote_base_url
                .clone()
                .ok_or(SettingsError::MissingRemoteUrl)?;
            Arc::new(RemoteEngine::new(
                settings.model_name.clone(),
                base_url,
                settings.remote_api_key.clone(),
                settings.remote_timeout,
            ))
        }
    };

    if settings.batch_enabled {
        info!(
            max_batch_size = settings.batch_max_size,
            max_wait_ms = settings.batch_max_wait.as_millis() as u64,
            "request batching enabled"
        );
        return Ok(Arc::new(BatchedEngine::new(
            engine,
            BatchConfig::from_settings(settings),
        )));
    }

    Ok(engine)
}

pub fn build_state(
    host: Arc<EngineHost>,
    settings: &Settings,
) -> Result<state::AppState, prometheus::Error> {
    info!(
        model = host.model_name(),
        engine = ?settings.engine_type,
        workers = settings.max_concurrent_requests,
        timeout_secs = settings.request_timeout.as_secs(),
        "application state configured"
    );
    state::AppState::new(host, settings)
}

pub fn build_app(state: state::AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/v1/chat/completions", post(handlers::chat_completions));

    if state.metrics_enabled {
        router = router
            .route("/metrics", get(handlers::metrics))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                handlers::track_requests,
            ));
    }

    router.with_state(state)
}
