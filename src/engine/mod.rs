pub mod batched;
pub mod local;
pub mod mock;
pub mod remote;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    models::{GenerationParams, Message},
    segmenter::{self, SegmentPolicy},
};

pub type FragmentStream = BoxStream<'static, Result<String, EngineError>>;

/// Decoding mode derived from the request temperature. Zero is greedy; anything
/// above zero samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    Greedy,
    Stochastic { temperature: f32 },
}

impl Sampling {
    pub fn for_temperature(temperature: f32) -> Self {
        if temperature > 0.0 {
            Sampling::Stochastic { temperature }
        } else {
            Sampling::Greedy
        }
    }
}

/// A generation backend. The orchestrator only ever talks to this trait.
#[async_trait]
pub trait Engine: Send + Sync {
    fn model_name(&self) -> &str;

    /// One-time setup such as loading weights. Must finish before any `generate`.
    async fn initialize(&self) -> Result<(), EngineError>;

    /// Returns the generated continuation only, without the prompt.
    async fn generate(
        &self,
        messages: &[Message],
        params: GenerationParams,
    ) -> Result<String, EngineError>;

    /// Same content as `generate`, delivered as fragments paced by `policy`. The
    /// default runs a full generation and re-segments it.
    ///
    /// The HTTP orchestrator does not call this: it generates through
    /// `GenerationExecutor` (pool and timeout) and paces with `segmenter::frames`.
    async fn generate_stream(
        &self,
        messages: &[Message],
        params: GenerationParams,
        policy: SegmentPolicy,
    ) -> Result<FragmentStream, EngineError> {
        let text = self.generate(messages, params).await?;
        Ok(segmenter::paced_fragments(text, policy).map(Ok).boxed())
    }

    /// Releases backend resources. Calling it with nothing held is a no-op.
    async fn shutdown(&self) -> Result<(), EngineError>;
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not ready")]
    NotReady,
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("model failure: {0}")]
    Model(String),
    #[error("generation worker failed: {0}")]
    Worker(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotReady => "not_ready",
            EngineError::Unavailable(_) => "unavailable",
            EngineError::Timeout(_) => "timeout",
            EngineError::InvalidResponse(_) => "invalid_response",
            EngineError::Model(_) => "model",
            EngineError::Worker(_) => "worker",
        }
    }

    /// Fixed text safe to return to callers. The `Display` form carries backend
    /// detail (panic payloads, upstream bodies) and is only logged.
    pub fn client_message(&self) -> String {
        match self {
            EngineError::NotReady => "engine is not ready".to_owned(),
            EngineError::Unavailable(_) => "engine is temporarily unavailable".to_owned(),
            EngineError::Timeout(limit) => format!("generation timed out after {limit:?}"),
            EngineError::InvalidResponse(_) => "engine returned an invalid response".to_owned(),
            EngineError::Model(_) => "model failed to generate a response".to_owned(),
            EngineError::Worker(_) => "generation worker failed".to_owned(),
        }
    }
}

/// Owns the process-wide engine instance and gates access on readiness.
pub struct EngineHost {
    engine: Arc<dyn Engine>,
    ready: AtomicBool,
}

impl EngineHost {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            ready: AtomicBool::new(false),
        }
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        info!(model = self.engine.model_name(), "initializing engine");
        self.engine.initialize().await?;
        self.ready.store(true, Ordering::Release);
        info!(model = self.engine.model_name(), "engine ready");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        let was_ready = self.ready.swap(false, Ordering::AcqRel);
        debug!(was_ready, "stopping engine");
        self.engine.shutdown().await?;
        info!(model = self.engine.model_name(), "engine shut down");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn model_name(&self) -> &str {
        self.engine.model_name()
    }

    pub fn engine(&self) -> Result<Arc<dyn Engine>, EngineError> {
        if self.is_ready() {
            Ok(self.engine.clone())
        } else {
            Err(EngineError::NotReady)
        }
    }
}
