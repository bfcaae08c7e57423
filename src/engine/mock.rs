use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;

use crate::{
    engine::{Engine, EngineError},
    models::{GenerationParams, Message, Role},
};

/// Deterministic engine for tests and local wiring checks.
#[derive(Debug)]
pub struct MockEngine {
    name: String,
    reply: MockReply,
    delay: Duration,
    initialized: AtomicBool,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

#[derive(Debug, Clone)]
enum MockReply {
    EchoLastUser,
    Text(String),
    Fail(String),
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            name: "mock-engine".to_owned(),
            reply: MockReply::EchoLastUser,
            delay: Duration::ZERO,
            initialized: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        }
    }
}

impl MockEngine {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            reply: MockReply::Text(text.into()),
            ..Self::default()
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: MockReply::Fail(message.into()),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `generate` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of `generate` calls observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn render(&self, messages: &[Message], max_tokens: u32) -> Result<String, EngineError> {
        let text = match &self.reply {
            MockReply::Text(text) => text.clone(),
            MockReply::Fail(message) => return Err(EngineError::Model(message.clone())),
            MockReply::EchoLastUser => {
                let prompt = messages
                    .iter()
                    .rev()
                    .find(|message| message.role == Role::User)
                    .map(|message| message.content.as_str())
                    .unwrap_or("hello");
                format!("Mock response for model {}: {}", self.name, prompt)
            }
        };
        Ok(truncate_words(text, max_tokens as usize))
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn generate(
        &self,
        messages: &[Message],
        params: GenerationParams,
    ) -> Result<String, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        let result = self.render(messages, params.max_tokens);

        self.active.fetch_sub(1, Ordering::SeqCst);
        debug!(engine = %self.name, ok = result.is_ok(), "mock generation finished");
        result
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn truncate_words(text: String, max_words: usize) -> String {
    if text.split_whitespace().count() <= max_words {
        return text;
    }
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}
