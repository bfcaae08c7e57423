use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{sync::Semaphore, time::timeout};
use tracing::{debug, warn};

use crate::{
    config::Settings,
    engine::{EngineError, EngineHost},
    models::{GenerationParams, Message, Usage},
};

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Worker-pool size; doubles as the ceiling on simultaneous generations.
    pub max_concurrent: usize,
    pub request_timeout: Duration,
}

impl ExecutorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_concurrent: settings.max_concurrent_requests.max(1),
            request_timeout: settings.request_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub usage: Usage,
    pub elapsed: Duration,
}

/// Runs engine generations on spawned tasks bounded by a semaphore, so the
/// request-handling side only ever awaits a handle.
pub struct GenerationExecutor {
    host: Arc<EngineHost>,
    workers: Arc<Semaphore>,
    config: ExecutorConfig,
}

impl GenerationExecutor {
    pub fn new(host: Arc<EngineHost>, config: ExecutorConfig) -> Self {
        Self {
            host,
            workers: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
        }
    }

    pub fn host(&self) -> &EngineHost {
        &self.host
    }

    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// One generation per call. When the timeout fires the spawned task keeps its
    /// worker slot until the backend returns; there is no cooperative cancel.
    pub async fn execute(
        &self,
        messages: &[Message],
        params: GenerationParams,
    ) -> Result<GenerationResult, EngineError> {
        let engine = self.host.engine()?;
        let started = Instant::now();
        let workers = self.workers.clone();
        let owned_messages = messages.to_vec();

        let run = async move {
            let permit = workers
                .acquire_owned()
                .await
                .map_err(|_| EngineError::Unavailable("worker pool closed".to_owned()))?;
            let handle = tokio::spawn(async move {
                let _permit = permit;
                engine.generate(&owned_messages, params).await
            });
            let text = handle
                .await
                .map_err(|error| EngineError::Worker(error.to_string()))??;
            Ok::<String, EngineError>(text)
        };

        let text = match timeout(self.config.request_timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    timeout_ms = self.config.request_timeout.as_millis() as u64,
                    "generation timed out"
                );
                return Err(EngineError::Timeout(self.config.request_timeout));
            }
        };

        let text = text.trim().to_owned();
        let usage = Usage::estimate(messages, &text);
        let elapsed = started.elapsed();
        debug!(
            completion_tokens = usage.completion_tokens,
            elapsed_ms = elapsed.as_millis() as u64,
            "generation finished"
        );

        Ok(GenerationResult {
            text,
            usage,
            elapsed,
        })
    }
}
