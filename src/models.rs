use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=2.0;
pub const MAX_TOKENS_RANGE: RangeInclusive<u32> = 1..=4096;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionsRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Roles outside this set fail deserialization, so they never reach prompt assembly.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub request_id: String,
    pub messages: Vec<Message>,
    pub params: GenerationParams,
    pub stream: bool,
}

impl ChatCompletionsRequest {
    /// Applies `defaults` to omitted parameters and checks ranges.
    pub fn into_validated(self, defaults: GenerationParams) -> Result<GenerationRequest, String> {
        if self.messages.is_empty() {
            return Err("messages must not be empty".to_owned());
        }

        let temperature = self.temperature.unwrap_or(defaults.temperature);
        if !TEMPERATURE_RANGE.contains(&temperature) {
            return Err(format!(
                "temperature must be between {} and {}",
                TEMPERATURE_RANGE.start(),
                TEMPERATURE_RANGE.end()
            ));
        }

        let max_tokens = self.max_tokens.unwrap_or(defaults.max_tokens);
        if !MAX_TOKENS_RANGE.contains(&max_tokens) {
            return Err(format!(
                "max_tokens must be between {} and {}",
                MAX_TOKENS_RANGE.start(),
                MAX_TOKENS_RANGE.end()
            ));
        }

        Ok(GenerationRequest {
            request_id: format!("chatcmpl-{}", Uuid::new_v4()),
            messages: self.messages,
            params: GenerationParams {
                temperature,
                max_tokens,
            },
            stream: self.stream.unwrap_or(false),
        })
    }
}

/// Token counts are whitespace-split word counts, not tokenizer counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    pub fn estimate(messages: &[Message], completion: &str) -> Self {
        let prompt_tokens = messages
            .iter()
            .map(|message| rough_token_estimate(&message.content))
            .sum::<u32>();
        Self::new(prompt_tokens, rough_token_estimate(completion))
    }
}

pub fn rough_token_estimate(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionsResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

#[derive(Debug, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatCompletionsResponse {
    pub fn new(id: String, created: i64, model: String, content: String, usage: Usage) -> Self {
        Self {
            id,
            object: "chat.completion",
            created,
            model,
            choices: vec![ChatChoice {
                index: 0,
                message: AssistantMessage {
                    role: Role::Assistant.as_str(),
                    content,
                },
                finish_reason: "stop".to_owned(),
            }],
            usage,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionsChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: usize,
    pub delta: DeltaMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct DeltaMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionsChunk {
    pub fn delta(id: &str, created: i64, model: &str, content: String) -> Self {
        Self::with_choice(
            id,
            created,
            model,
            ChunkChoice {
                index: 0,
                delta: DeltaMessage {
                    content: Some(content),
                },
                finish_reason: None,
            },
        )
    }

    pub fn finish(id: &str, created: i64, model: &str, finish_reason: String) -> Self {
        Self::with_choice(
            id,
            created,
            model,
            ChunkChoice {
                index: 0,
                delta: DeltaMessage::default(),
                finish_reason: Some(finish_reason),
            },
        )
    }

    fn with_choice(id: &str, created: i64, model: &str, choice: ChunkChoice) -> Self {
        Self {
            id: id.to_owned(),
            object: "chat.completion.chunk",
            created,
            model: model.to_owned(),
            choices: vec![choice],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub model: String,
    pub uptime: f64,
    pub requests_total: u64,
    pub requests_active: i64,
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: String,
    pub version: String,
    pub endpoints: &'static [&'static str],
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULTS: GenerationParams = GenerationParams {
        temperature: 0.7,
        max_tokens: 512,
    };

    fn request(messages: Vec<Message>) -> ChatCompletionsRequest {
        ChatCompletionsRequest {
            model: None,
            messages,
            temperature: None,
            max_tokens: None,
            stream: None,
        }
    }

    #[test]
    fn validation_rejects_empty_message_list() {
        let error = request(vec![])
            .into_validated(DEFAULTS)
            .expect_err("empty message list should fail");

        assert_eq!(error, "messages must not be empty");
    }

    #[test]
    fn validation_applies_defaults() {
        let validated = request(vec![Message::new(Role::User, "hi")])
            .into_validated(DEFAULTS)
            .expect("request is valid");

        assert_eq!(validated.params, DEFAULTS);
        assert!(!validated.stream);
        assert!(validated.request_id.starts_with("chatcmpl-"));
    }

    #[test]
    fn validation_checks_parameter_ranges() {
        let mut hot = request(vec![Message::new(Role::User, "hi")]);
        hot.temperature = Some(2.5);
        assert!(hot.into_validated(DEFAULTS).is_err());

        let mut nan = request(vec![Message::new(Role::User, "hi")]);
        nan.temperature = Some(f32::NAN);
        assert!(nan.into_validated(DEFAULTS).is_err());

        let mut zero = request(vec![Message::new(Role::User, "hi")]);
        zero.max_tokens = Some(0);
        assert!(zero.into_validated(DEFAULTS).is_err());

        let mut huge = request(vec![Message::new(Role::User, "hi")]);
        huge.max_tokens = Some(4097);
        assert!(huge.into_validated(DEFAULTS).is_err());

        let mut edges = request(vec![Message::new(Role::User, "hi")]);
        edges.temperature = Some(0.0);
        edges.max_tokens = Some(4096);
        assert!(edges.into_validated(DEFAULTS).is_ok());
    }

    #[test]
    fn unknown_role_fails_to_deserialize() {
        let parsed = serde_json::from_str::<ChatCompletionsRequest>(
            r#"{"messages":[{"role":"tool","content":"x"}]}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn usage_counts_whitespace_separated_words() {
        let usage = Usage::estimate(
            &[
                Message::new(Role::System, "be brief"),
                Message::new(Role::User, "  Say   hi "),
            ],
            "hi there",
        );
        assert_eq!(usage, Usage::new(4, 2));
        assert_eq!(usage.total_tokens, 6);
    }

    #[test]
    fn chunk_serializes_null_finish_reason() {
        let chunk = ChatCompletionsChunk::delta("id", 1, "echo", "hi".to_owned());
        let value = serde_json::to_value(&chunk).expect("chunk serializes");
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["choices"][0]["delta"]["content"], "hi");
        assert!(value["choices"][0]["finish_reason"].is_null());

        let last = ChatCompletionsChunk::finish("id", 1, "echo", "stop".to_owned());
        let value = serde_json::to_value(&last).expect("chunk serializes");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert!(value["choices"][0]["delta"].get("content").is_none());
    }
}
