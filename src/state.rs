use std::{sync::Arc, time::Instant};

use crate::{
    config::Settings,
    engine::EngineHost,
    executor::{ExecutorConfig, GenerationExecutor},
    metrics::AppMetrics,
    models::GenerationParams,
    segmenter::SegmentPolicy,
};

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<GenerationExecutor>,
    pub metrics: Arc<AppMetrics>,
    pub segment_policy: SegmentPolicy,
    pub defaults: GenerationParams,
    pub metrics_enabled: bool,
    pub app_name: String,
    pub version: String,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(host: Arc<EngineHost>, settings: &Settings) -> Result<Self, prometheus::Error> {
        Ok(Self {
            executor: Arc::new(GenerationExecutor::new(
                host,
                ExecutorConfig::from_settings(settings),
            )),
            metrics: Arc::new(AppMetrics::new()?),
            segment_policy: SegmentPolicy::from_settings(settings),
            defaults: GenerationParams {
                temperature: settings.default_temperature,
                max_tokens: settings.default_max_tokens,
            },
            metrics_enabled: settings.enable_metrics,
            app_name: settings.app_name.clone(),
            version: settings.app_version.clone(),
            started_at: Instant::now(),
        })
    }

    pub fn engine_host(&self) -> &EngineHost {
        self.executor.host()
    }
}
