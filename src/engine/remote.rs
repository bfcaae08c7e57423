use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    engine::{Engine, EngineError},
    models::{GenerationParams, Message},
};

/// Delegates generation to an OpenAI-compatible inference service.
pub struct RemoteEngine {
    model_name: String,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: RwLock<Option<reqwest::Client>>,
}

impl RemoteEngine {
    pub fn new(
        model_name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            timeout,
            client: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Engine for RemoteEngine {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|error| {
                EngineError::Unavailable(format!("failed to build HTTP client: {error}"))
            })?;
        *self.client.write().await = Some(client);
        info!(model = %self.model_name, base_url = %self.base_url, "remote engine configured");
        Ok(())
    }

    async fn generate(
        &self,
        messages: &[Message],
        params: GenerationParams,
    ) -> Result<String, EngineError> {
        let client = self
            .client
            .read()
            .await
            .clone()
            .ok_or(EngineError::NotReady)?;

        let payload = json!({
            "model": self.model_name,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "stream": false
        });

        let mut request = client.post(self.url("/chat/completions")).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                EngineError::Timeout(self.timeout)
            } else {
                EngineError::Unavailable(error.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown backend error".to_owned());
            return Err(map_http_error(status, body, self.timeout));
        }

        let parsed: RemoteChatResponse = response
            .json()
            .await
            .map_err(|error| EngineError::InvalidResponse(error.to_string()))?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            EngineError::InvalidResponse("missing choices in response".to_owned())
        })?;

        debug!(model = %self.model_name, "remote generation finished");
        Ok(choice
            .message
            .content
            .unwrap_or_default()
            .trim()
            .to_owned())
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        if self.client.write().await.take().is_some() {
            info!(model = %self.model_name, "remote engine client dropped");
        }
        Ok(())
    }
}

fn map_http_error(status: StatusCode, body: String, timeout: Duration) -> EngineError {
    let trimmed = body.chars().take(400).collect::<String>();
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            EngineError::Unavailable(format!("status {}: {trimmed}", status.as_u16()))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => EngineError::Timeout(timeout),
        _ => EngineError::InvalidResponse(format!("status {}: {trimmed}", status.as_u16())),
    }
}

#[derive(Debug, Deserialize)]
struct RemoteChatResponse {
    choices: Vec<RemoteChoice>,
}

#[derive(Debug, Deserialize)]
struct RemoteChoice {
    message: RemoteMessage,
}

#[derive(Debug, Deserialize)]
struct RemoteMessage {
    #[serde(default)]
    content: Option<String>,
}
