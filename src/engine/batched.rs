use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::{
    config::Settings,
    engine::{Engine, EngineError},
    models::{GenerationParams, Message},
};

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub max_wait: Duration,
}

impl BatchConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_batch_size: settings.batch_max_size.max(1),
            max_wait: settings.batch_max_wait,
        }
    }
}

/// Groups concurrent requests that share sampling parameters and flushes them
/// to the inner engine together.
pub struct BatchedEngine {
    inner: Arc<dyn Engine>,
    config: BatchConfig,
    tx: Mutex<Option<mpsc::Sender<BatchItem>>>,
}

struct BatchItem {
    class: BatchClass,
    messages: Vec<Message>,
    params: GenerationParams,
    response_tx: oneshot::Sender<Result<String, EngineError>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BatchClass {
    max_tokens: u32,
    temperature_repr: String,
}

impl BatchClass {
    fn from_params(params: &GenerationParams) -> Self {
        Self {
            max_tokens: params.max_tokens,
            temperature_repr: format!("{:.4}", params.temperature),
        }
    }
}

impl BatchedEngine {
    pub fn new(inner: Arc<dyn Engine>, config: BatchConfig) -> Self {
        Self {
            inner,
            config,
            tx: Mutex::new(None),
        }
    }

    async fn submit(
        &self,
        messages: Vec<Message>,
        params: GenerationParams,
    ) -> Result<String, EngineError> {
        let tx = self.tx.lock().await.clone().ok_or(EngineError::NotReady)?;
        let (response_tx, response_rx) = oneshot::channel();
        tx.send(BatchItem {
            class: BatchClass::from_params(&params),
            messages,
            params,
            response_tx,
        })
        .await
        .map_err(|_| EngineError::Unavailable("batch queue closed".to_owned()))?;

        response_rx
            .await
            .map_err(|_| EngineError::Unavailable("batch response channel closed".to_owned()))?
    }
}

#[async_trait]
impl Engine for BatchedEngine {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        self.inner.initialize().await?;
        let mut tx = self.tx.lock().await;
        if tx.is_none() {
            let (sender, rx) = mpsc::channel(1_024);
            tokio::spawn(run_batch_worker(self.inner.clone(), rx, self.config));
            *tx = Some(sender);
        }
        Ok(())
    }

    async fn generate(
        &self,
        messages: &[Message],
        params: GenerationParams,
    ) -> Result<String, EngineError> {
        self.submit(messages.to_vec(), params).await
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        // Dropping the sender lets the worker drain and exit.
        self.tx.lock().await.take();
        self.inner.shutdown().await
    }
}

async fn run_batch_worker(
    engine: Arc<dyn Engine>,
    mut rx: mpsc::Receiver<BatchItem>,
    config: BatchConfig,
) {
    let mut pending = VecDeque::new();
    loop {
        let first = if let Some(item) = pending.pop_front() {
            item
        } else {
            match rx.recv().await {
                Some(item) => item,
                None => break,
            }
        };

        let class = first.class.clone();
        let deadline = Instant::now() + config.max_wait;
        let mut batch = vec![first];

        while batch.len() < config.max_batch_size {
            if let Some(position) = pending.iter().position(|item| item.class == class) {
                if let Some(item) = pending.remove(position) {
                    batch.push(item);
                    continue;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match tokio::time::timeout(deadline - now, rx.recv()).await {
                Ok(Some(item)) if item.class == class => batch.push(item),
                Ok(Some(item)) => pending.push_back(item),
                Ok(None) | Err(_) => break,
            }
        }

        debug!(
            batch_size = batch.len(),
            max_tokens = class.max_tokens,
            temperature = %class.temperature_repr,
            "flushing batch"
        );

        join_all(batch.into_iter().map(|item| {
            let engine = engine.clone();
            async move {
                let result = engine.generate(&item.messages, item.params).await;
                let _ = item.response_tx.send(result);
            }
        }))
        .await;
    }
    debug!("batch worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::mock::MockEngine, models::Role};

    fn config() -> BatchConfig {
        BatchConfig {
            max_batch_size: 4,
            max_wait: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn requests_before_initialize_are_rejected() {
        let engine = BatchedEngine::new(Arc::new(MockEngine::default()), config());
        let error = engine
            .generate(
                &[Message::new(Role::User, "hi")],
                GenerationParams {
                    temperature: 0.0,
                    max_tokens: 8,
                },
            )
            .await
            .expect_err("worker not running");
        assert!(matches!(error, EngineError::NotReady));
    }

    #[tokio::test]
    async fn each_request_receives_its_own_result() {
        let inner = Arc::new(MockEngine::default().named("batched"));
        let engine = Arc::new(BatchedEngine::new(inner.clone(), config()));
        engine.initialize().await.expect("initialize");

        let handles = ["alpha", "beta", "gamma"]
            .into_iter()
            .enumerate()
            .map(|(index, word)| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let params = GenerationParams {
                        temperature: if index == 2 { 0.5 } else { 0.0 },
                        max_tokens: 64,
                    };
                    engine
                        .generate(&[Message::new(Role::User, word)], params)
                        .await
                        .map(|text| (word, text))
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            let (word, text) = handle.await.expect("join").expect("generation");
            assert_eq!(text, format!("Mock response for model batched: {word}"));
        }
        assert_eq!(inner.calls(), 3);

        engine.shutdown().await.expect("shutdown");
        assert!(!inner.is_initialized());
    }
}
