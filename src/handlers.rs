use std::{
    convert::Infallible,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use axum::{
    extract::{rejection::JsonRejection, MatchedPath, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    middleware::Next,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::{
    errors::AppError,
    metrics::InflightGuard,
    models::{
        ChatCompletionsRequest, ChatCompletionsResponse, GenerationRequest, HealthResponse,
        RootResponse,
    },
    segmenter::{self, StreamFrame},
    state::AppState,
};

pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: format!("Welcome to {}", state.app_name),
        version: state.version.clone(),
        endpoints: &["/v1/chat/completions", "/health", "/metrics"],
    })
}

pub async fn health(State(state): State<AppState>) -> Response {
    let host = state.engine_host();
    let (status_code, status) = if host.is_ready() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    let payload = HealthResponse {
        status,
        version: state.version.clone(),
        model: host.model_name().to_owned(),
        uptime: state.started_at.elapsed().as_secs_f64(),
        requests_total: state.metrics.requests_total(),
        requests_active: state.metrics.inflight(),
    };
    (status_code, Json(payload)).into_response()
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => AppError::Internal(format!("metrics render failed: {error}")).into_response(),
    }
}

/// Counts every request and its duration, keyed by the matched route template.
pub async fn track_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    if endpoint == "/metrics" {
        return next.run(request).await;
    }

    let method = request.method().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    state.metrics.observe_request(
        &method,
        &endpoint,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

/// Received → Validated → Dispatched → Completed | Failed.
pub async fn chat_completions(
    State(state): State<AppState>,
    payload: Result<Json<ChatCompletionsRequest>, JsonRejection>,
) -> Response {
    let validated = payload
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
        .and_then(|Json(request)| {
            request
                .into_validated(state.defaults)
                .map_err(AppError::BadRequest)
        });
    let request = match validated {
        Ok(request) => request,
        Err(error) => {
            state.metrics.observe_error(error.kind());
            debug!(error = %error, "chat request rejected");
            return error.into_response();
        }
    };

    let inflight = state.metrics.inflight_guard();
    let started = Instant::now();
    info!(
        request_id = %request.request_id,
        stream = request.stream,
        messages = request.messages.len(),
        temperature = request.params.temperature,
        max_tokens = request.params.max_tokens,
        "chat request accepted"
    );

    let request_id = request.request_id.clone();
    let outcome = if request.stream {
        stream_completion(&state, request, started, inflight).await
    } else {
        let outcome = one_shot_completion(&state, request, started).await;
        drop(inflight);
        outcome
    };

    match outcome {
        Ok(response) => response,
        Err(error) => {
            state.metrics.observe_error(error.kind());
            warn!(
                request_id = %request_id,
                kind = error.kind(),
                error = %error,
                "chat request failed"
            );
            error.into_response()
        }
    }
}

async fn one_shot_completion(
    state: &AppState,
    request: GenerationRequest,
    started: Instant,
) -> Result<Response, AppError> {
    let created = unix_timestamp();
    let result = state
        .executor
        .execute(&request.messages, request.params)
        .await?;

    let total = started.elapsed();
    state
        .metrics
        .observe_generation(result.usage.completion_tokens, total);
    // Without incremental decoding the first content arrives with the last, so
    // time-to-first-content is recorded as the total.
    state.metrics.observe_time_to_first_content(total);

    info!(
        request_id = %request.request_id,
        prompt_tokens = result.usage.prompt_tokens,
        completion_tokens = result.usage.completion_tokens,
        elapsed_ms = total.as_millis() as u64,
        "chat request completed"
    );

    let payload = ChatCompletionsResponse::new(
        request.request_id,
        created,
        state.engine_host().model_name().to_owned(),
        result.text,
        result.usage,
    );
    Ok(Json(payload).into_response())
}

async fn stream_completion(
    state: &AppState,
    request: GenerationRequest,
    started: Instant,
    inflight: InflightGuard,
) -> Result<Response, AppError> {
    let created = unix_timestamp();
    let result = state
        .executor
        .execute(&request.messages, request.params)
        .await?;
    state
        .metrics
        .observe_generation(result.usage.completion_tokens, started.elapsed());

    let metrics = state.metrics.clone();
    let model = state.engine_host().model_name().to_owned();
    let policy = state.segment_policy;
    let response_id = request.request_id;
    let completion_tokens = result.usage.completion_tokens;

    let outbound = async_stream::stream! {
        let _inflight = inflight;
        let mut probe = DisconnectProbe::new(&response_id);
        let frames = segmenter::frames(result.text, policy);
        tokio::pin!(frames);

        let mut first_content_seen = false;
        while let Some(frame) = frames.next().await {
            if !first_content_seen && !matches!(frame, StreamFrame::Terminator) {
                first_content_seen = true;
                metrics.observe_time_to_first_content(started.elapsed());
            }
            yield Ok::<Event, Infallible>(frame.to_event(&response_id, created, &model));
        }

        probe.finished = true;
        info!(
            request_id = %response_id,
            completion_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chat stream completed"
        );
    };

    Ok(Sse::new(outbound)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(10)))
        .into_response())
}

/// Logs streams that were dropped before their terminator went out.
struct DisconnectProbe {
    request_id: String,
    finished: bool,
}

impl DisconnectProbe {
    fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_owned(),
            finished: false,
        }
    }
}

impl Drop for DisconnectProbe {
    fn drop(&mut self) {
        if !self.finished {
            debug!(request_id = %self.request_id, "client disconnected mid-stream");
        }
    }
}

fn unix_timestamp() -> i64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_secs() as i64
}
