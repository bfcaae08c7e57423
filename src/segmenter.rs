//! Simulated streaming: a completed generation is re-cut into small fixed-size
//! fragments and released with a short pause between them.
//!
//! Concatenating every `ContentDelta` payload in order reproduces the input text
//! exactly. A stream that is dropped (client disconnect) simply stops; nothing
//! further is emitted and no error is produced.

use std::time::Duration;

use axum::response::sse::Event;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::time::sleep;

use crate::{config::Settings, models::ChatCompletionsChunk};

pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPolicy {
    pub fragment_chars: usize,
    pub delay: Duration,
}

impl Default for SegmentPolicy {
    fn default() -> Self {
        Self {
            fragment_chars: 5,
            delay: Duration::from_millis(50),
        }
    }
}

impl SegmentPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            fragment_chars: settings.stream_fragment_chars.max(1),
            delay: settings.stream_fragment_delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    ContentDelta(String),
    Final { finish_reason: String },
    Terminator,
}

impl StreamFrame {
    pub fn to_event(&self, id: &str, created: i64, model: &str) -> Event {
        match self {
            StreamFrame::ContentDelta(content) => {
                json_event(ChatCompletionsChunk::delta(id, created, model, content.clone()))
            }
            StreamFrame::Final { finish_reason } => json_event(ChatCompletionsChunk::finish(
                id,
                created,
                model,
                finish_reason.clone(),
            )),
            StreamFrame::Terminator => Event::default().data(DONE_SENTINEL),
        }
    }
}

/// Splits on character boundaries so multi-byte text is never cut mid-codepoint.
pub fn split_fragments(text: &str, fragment_chars: usize) -> Vec<String> {
    let chars = text.chars().collect::<Vec<_>>();
    chars
        .chunks(fragment_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

pub fn paced_fragments(text: String, policy: SegmentPolicy) -> impl Stream<Item = String> + Send {
    async_stream::stream! {
        for (index, fragment) in split_fragments(&text, policy.fragment_chars).into_iter().enumerate() {
            if index > 0 && !policy.delay.is_zero() {
                sleep(policy.delay).await;
            }
            yield fragment;
        }
    }
}

/// Zero or more deltas, then exactly one `Final`, then exactly one `Terminator`.
pub fn frames(text: String, policy: SegmentPolicy) -> impl Stream<Item = StreamFrame> + Send {
    async_stream::stream! {
        let fragments = paced_fragments(text, policy);
        tokio::pin!(fragments);
        while let Some(fragment) = fragments.next().await {
            yield StreamFrame::ContentDelta(fragment);
        }

        yield StreamFrame::Final {
            finish_reason: "stop".to_owned(),
        };
        yield StreamFrame::Terminator;
    }
}

fn json_event<T: Serialize>(payload: T) -> Event {
    match serde_json::to_string(&payload) {
        Ok(serialized) => Event::default().data(serialized),
        Err(error) => {
            let fallback = serde_json::json!({
                "error": {
                    "message": format!("serialization error: {error}"),
                    "type": "server_error",
                    "code": "internal_error"
                }
            });
            Event::default().data(fallback.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    const UNPACED: SegmentPolicy = SegmentPolicy {
        fragment_chars: 5,
        delay: Duration::ZERO,
    };

    #[test]
    fn splits_into_fixed_size_fragments() {
        assert_eq!(split_fragments("hi there", 5), vec!["hi th", "ere"]);
        assert!(split_fragments("", 5).is_empty());
    }

    #[test]
    fn splits_on_char_boundaries() {
        let fragments = split_fragments("héllo wörld", 3);
        assert_eq!(fragments, vec!["hél", "lo ", "wör", "ld"]);
        assert_eq!(fragments.concat(), "héllo wörld");
    }

    #[tokio::test]
    async fn frames_end_with_final_then_terminator() {
        let collected = frames("hi there".to_owned(), UNPACED).collect::<Vec<_>>().await;

        assert_eq!(
            collected,
            vec![
                StreamFrame::ContentDelta("hi th".to_owned()),
                StreamFrame::ContentDelta("ere".to_owned()),
                StreamFrame::Final {
                    finish_reason: "stop".to_owned()
                },
                StreamFrame::Terminator,
            ]
        );
    }

    #[tokio::test]
    async fn empty_generation_still_finishes_cleanly() {
        let collected = frames(String::new(), UNPACED).collect::<Vec<_>>().await;
        assert_eq!(
            collected,
            vec![
                StreamFrame::Final {
                    finish_reason: "stop".to_owned()
                },
                StreamFrame::Terminator,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fragments_are_paced_between_emissions() {
        let policy = SegmentPolicy {
            fragment_chars: 2,
            delay: Duration::from_millis(50),
        };
        let started = Instant::now();
        let collected = paced_fragments("abcdef".to_owned(), policy)
            .collect::<Vec<_>>()
            .await;

        assert_eq!(collected, vec!["ab", "cd", "ef"]);
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }
}
