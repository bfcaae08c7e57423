//! In-process engine. The model itself is an opaque, blocking [`TextModel`]; every
//! call into it runs on tokio's blocking pool so request I/O keeps moving.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{sync::RwLock, task};
use tracing::{debug, info};

use crate::{
    engine::{Engine, EngineError, Sampling},
    models::{GenerationParams, Message, Role},
    prompt,
};

/// A loaded model. Output may include the prompt; the engine strips it.
pub trait TextModel: Send + Sync {
    fn complete(
        &self,
        prompt: &str,
        sampling: Sampling,
        max_new_tokens: u32,
    ) -> Result<String, EngineError>;
}

type ModelLoader = Arc<dyn Fn() -> Result<Arc<dyn TextModel>, EngineError> + Send + Sync>;

pub struct LocalEngine {
    model_name: String,
    loader: ModelLoader,
    model: RwLock<Option<Arc<dyn TextModel>>>,
}

impl LocalEngine {
    pub fn new<F>(model_name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn TextModel>, EngineError> + Send + Sync + 'static,
    {
        Self {
            model_name: model_name.into(),
            loader: Arc::new(loader),
            model: RwLock::new(None),
        }
    }

    /// The built-in weightless model; useful for wiring and smoke tests.
    pub fn echo(model_name: impl Into<String>) -> Self {
        Self::new(model_name, || Ok(Arc::new(EchoModel) as Arc<dyn TextModel>))
    }
}

#[async_trait]
impl Engine for LocalEngine {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        info!(model = %self.model_name, "loading model");
        let loader = self.loader.clone();
        let model = task::spawn_blocking(move || loader())
            .await
            .map_err(|error| EngineError::Worker(error.to_string()))??;
        *self.model.write().await = Some(model);
        info!(model = %self.model_name, "model loaded");
        Ok(())
    }

    async fn generate(
        &self,
        messages: &[Message],
        params: GenerationParams,
    ) -> Result<String, EngineError> {
        let model = self
            .model
            .read()
            .await
            .clone()
            .ok_or(EngineError::NotReady)?;
        let rendered = prompt::assemble(messages);
        let sampling = Sampling::for_temperature(params.temperature);
        debug!(model = %self.model_name, ?sampling, max_tokens = params.max_tokens, "running local generation");

        let output = {
            let rendered = rendered.clone();
            task::spawn_blocking(move || model.complete(&rendered, sampling, params.max_tokens))
                .await
                .map_err(|error| EngineError::Worker(error.to_string()))??
        };

        Ok(prompt::strip_prompt_echo(&rendered, &output).to_owned())
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        if self.model.write().await.take().is_some() {
            info!(model = %self.model_name, "model released");
        }
        Ok(())
    }
}

/// Continues the conversation by repeating the last user turn, echoing the prompt
/// first the way full-sequence decoders do.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoModel;

impl TextModel for EchoModel {
    fn complete(
        &self,
        prompt: &str,
        _sampling: Sampling,
        max_new_tokens: u32,
    ) -> Result<String, EngineError> {
        let user_prefix = format!("{}: ", prompt::role_label(Role::User));
        let last_user = prompt
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix(user_prefix.as_str()))
            .unwrap_or_default();
        let continuation = last_user
            .split_whitespace()
            .take(max_new_tokens as usize)
            .collect::<Vec<_>>()
            .join(" ");
        Ok(format!("{prompt} {continuation}"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct RecordingModel {
        seen: Mutex<Vec<(String, Sampling, u32)>>,
    }

    impl TextModel for RecordingModel {
        fn complete(
            &self,
            prompt: &str,
            sampling: Sampling,
            max_new_tokens: u32,
        ) -> Result<String, EngineError> {
            self.seen
                .lock()
                .expect("lock")
                .push((prompt.to_owned(), sampling, max_new_tokens));
            Ok(format!("{prompt}  reply \n"))
        }
    }

    fn recording_engine() -> (LocalEngine, Arc<RecordingModel>) {
        let model = Arc::new(RecordingModel {
            seen: Mutex::new(Vec::new()),
        });
        let shared = model.clone();
        let engine = LocalEngine::new("recording", move || {
            Ok(shared.clone() as Arc<dyn TextModel>)
        });
        (engine, model)
    }

    fn params(temperature: f32) -> GenerationParams {
        GenerationParams {
            temperature,
            max_tokens: 12,
        }
    }

    #[tokio::test]
    async fn generate_before_initialize_is_not_ready() {
        let engine = LocalEngine::echo("echo");
        let error = engine
            .generate(&[Message::new(Role::User, "hi")], params(0.0))
            .await
            .expect_err("model is not loaded");
        assert!(matches!(error, EngineError::NotReady));
    }

    #[tokio::test]
    async fn prompt_echo_is_stripped_and_sampling_follows_temperature() {
        let (engine, model) = recording_engine();
        engine.initialize().await.expect("load");
        let messages = vec![Message::new(Role::User, "Hi")];

        let greedy = engine.generate(&messages, params(0.0)).await.expect("greedy");
        let sampled = engine.generate(&messages, params(0.9)).await.expect("sampled");

        assert_eq!(greedy, "reply");
        assert_eq!(sampled, "reply");

        let seen = model.seen.lock().expect("lock");
        assert_eq!(seen[0].0, "User: Hi\nAssistant:");
        assert_eq!(seen[0].1, Sampling::Greedy);
        assert_eq!(seen[1].1, Sampling::Stochastic { temperature: 0.9 });
        assert_eq!(seen[1].2, 12);
    }

    #[tokio::test]
    async fn echo_model_is_deterministic_at_zero_temperature() {
        let engine = LocalEngine::echo("echo");
        engine.initialize().await.expect("load");
        let messages = vec![
            Message::new(Role::System, "be terse"),
            Message::new(Role::User, "one two three four"),
        ];
        let limited = GenerationParams {
            temperature: 0.0,
            max_tokens: 3,
        };

        let first = engine.generate(&messages, limited).await.expect("first");
        let second = engine.generate(&messages, limited).await.expect("second");

        assert_eq!(first, "one two three");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn loader_failure_surfaces_from_initialize() {
        let engine = LocalEngine::new("broken", || {
            Err(EngineError::Model("weights missing".to_owned()))
        });
        let error = engine.initialize().await.expect_err("load fails");
        assert_eq!(error.to_string(), "model failure: weights missing");
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let engine = LocalEngine::echo("echo");
        engine.shutdown().await.expect("nothing held");
        engine.initialize().await.expect("load");
        engine.shutdown().await.expect("release");
        engine.shutdown().await.expect("already released");
        assert!(engine
            .generate(&[Message::new(Role::User, "hi")], params(0.0))
            .await
            .is_err());
    }
}
