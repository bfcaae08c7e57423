use std::{env, str::FromStr, time::Duration};

use thiserror::Error;

use crate::models::{MAX_TOKENS_RANGE, TEMPERATURE_RANGE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Local,
    Remote,
}

impl FromStr for EngineKind {
    type Err = SettingsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "simple" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(SettingsError::UnknownEngine(other.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown engine type: {0}")]
    UnknownEngine(String),
    #[error("remote engine requires LLM_REMOTE_BASE_URL")]
    MissingRemoteUrl,
    #[error("LLM_MAX_TOKENS must be between {min} and {max}, got {value}")]
    MaxTokensOutOfRange { value: u32, min: u32, max: u32 },
    #[error("LLM_TEMPERATURE must be between {min} and {max}, got {value}")]
    TemperatureOutOfRange { value: f32, min: f32, max: f32 },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub app_version: String,
    pub host: String,
    pub port: u16,
    pub engine_type: EngineKind,
    pub model_name: String,
    pub default_max_tokens: u32,
    pub default_temperature: f32,
    pub max_concurrent_requests: usize,
    pub request_timeout: Duration,
    /// Parsed and reported at startup; no admission queue acts on these.
    pub enable_backpressure: bool,
    pub queue_capacity: usize,
    pub enable_metrics: bool,
    pub stream_fragment_chars: usize,
    pub stream_fragment_delay: Duration,
    pub remote_base_url: Option<String>,
    pub remote_api_key: Option<String>,
    pub remote_timeout: Duration,
    pub batch_enabled: bool,
    pub batch_max_size: usize,
    pub batch_max_wait: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Distributed LLM Serving".to_owned(),
            app_version: env!("CARGO_PKG_VERSION").to_owned(),
            host: "0.0.0.0".to_owned(),
            port: 8000,
            engine_type: EngineKind::Local,
            model_name: "echo".to_owned(),
            default_max_tokens: 512,
            default_temperature: 0.7,
            max_concurrent_requests: 10,
            request_timeout: Duration::from_secs(30),
            enable_backpressure: false,
            queue_capacity: 100,
            enable_metrics: true,
            stream_fragment_chars: 5,
            stream_fragment_delay: Duration::from_millis(50),
            remote_base_url: None,
            remote_api_key: None,
            remote_timeout: Duration::from_secs(60),
            batch_enabled: false,
            batch_max_size: 8,
            batch_max_wait: Duration::from_millis(10),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let defaults = Self::default();

        let engine_type = match env::var("LLM_ENGINE_TYPE") {
            Ok(value) if !value.trim().is_empty() => value.parse()?,
            _ => defaults.engine_type,
        };
        let remote_base_url = read_string("LLM_REMOTE_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_owned());
        if engine_type == EngineKind::Remote && remote_base_url.is_none() {
            return Err(SettingsError::MissingRemoteUrl);
        }

        let settings = Self {
            app_name: read_string("LLM_APP_NAME").unwrap_or(defaults.app_name),
            app_version: defaults.app_version,
            host: read_string("LLM_HOST").unwrap_or(defaults.host),
            port: read_parsed("LLM_PORT", defaults.port),
            engine_type,
            model_name: read_string("LLM_MODEL_NAME").unwrap_or(defaults.model_name),
            default_max_tokens: read_parsed("LLM_MAX_TOKENS", defaults.default_max_tokens),
            default_temperature: read_parsed("LLM_TEMPERATURE", defaults.default_temperature),
            max_concurrent_requests: read_parsed(
                "LLM_MAX_CONCURRENT_REQUESTS",
                defaults.max_concurrent_requests,
            )
            .max(1),
            request_timeout: Duration::from_secs(read_parsed(
                "LLM_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            enable_backpressure: read_flag("LLM_ENABLE_BACKPRESSURE", defaults.enable_backpressure),
            queue_capacity: read_parsed("LLM_QUEUE_CAPACITY", defaults.queue_capacity),
            enable_metrics: read_flag("LLM_ENABLE_METRICS", defaults.enable_metrics),
            stream_fragment_chars: read_parsed(
                "LLM_STREAM_FRAGMENT_CHARS",
                defaults.stream_fragment_chars,
            )
            .max(1),
            stream_fragment_delay: Duration::from_millis(read_parsed(
                "LLM_STREAM_FRAGMENT_DELAY_MS",
                defaults.stream_fragment_delay.as_millis() as u64,
            )),
            remote_base_url,
            remote_api_key: read_string("LLM_REMOTE_API_KEY"),
            remote_timeout: Duration::from_secs(read_parsed(
                "LLM_REMOTE_TIMEOUT_SECS",
                defaults.remote_timeout.as_secs(),
            )),
            batch_enabled: read_flag("LLM_BATCH_ENABLED", defaults.batch_enabled),
            batch_max_size: read_parsed("LLM_BATCH_MAX_SIZE", defaults.batch_max_size).max(1),
            batch_max_wait: Duration::from_millis(read_parsed(
                "LLM_BATCH_MAX_WAIT_MS",
                defaults.batch_max_wait.as_millis() as u64,
            )),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Request defaults must themselves pass request validation, or every request
    /// that omits them would be rejected.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !MAX_TOKENS_RANGE.contains(&self.default_max_tokens) {
            return Err(SettingsError::MaxTokensOutOfRange {
                value: self.default_max_tokens,
                min: *MAX_TOKENS_RANGE.start(),
                max: *MAX_TOKENS_RANGE.end(),
            });
        }
        if !TEMPERATURE_RANGE.contains(&self.default_temperature) {
            return Err(SettingsError::TemperatureOutOfRange {
                value: self.default_temperature,
                min: *TEMPERATURE_RANGE.start(),
                max: *TEMPERATURE_RANGE.end(),
            });
        }
        Ok(())
    }
}

fn read_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn read_parsed<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn read_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| value != "0" && !value.eq_ignore_ascii_case("false"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_kind_accepts_known_names() {
        assert_eq!("local".parse::<EngineKind>().unwrap(), EngineKind::Local);
        assert_eq!("Simple".parse::<EngineKind>().unwrap(), EngineKind::Local);
        assert_eq!(" remote ".parse::<EngineKind>().unwrap(), EngineKind::Remote);
    }

    #[test]
    fn engine_kind_rejects_unknown_names() {
        let error = "vllm".parse::<EngineKind>().expect_err("vllm is not wired");
        assert_eq!(error.to_string(), "unknown engine type: vllm");
    }

    #[test]
    fn defaults_match_wire_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.default_max_tokens, 512);
        assert!((settings.default_temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(settings.stream_fragment_chars, 5);
        assert_eq!(settings.stream_fragment_delay, Duration::from_millis(50));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn request_defaults_outside_accepted_ranges_fail_startup() {
        let zero_tokens = Settings {
            default_max_tokens: 0,
            ..Settings::default()
        };
        let error = zero_tokens.validate().expect_err("zero max_tokens");
        assert_eq!(
            error.to_string(),
            "LLM_MAX_TOKENS must be between 1 and 4096, got 0"
        );

        let too_hot = Settings {
            default_temperature: 3.0,
            ..Settings::default()
        };
        assert!(matches!(
            too_hot.validate(),
            Err(SettingsError::TemperatureOutOfRange { .. })
        ));

        let edges = Settings {
            default_max_tokens: 4096,
            default_temperature: 0.0,
            ..Settings::default()
        };
        assert!(edges.validate().is_ok());
    }
}
