// OpenAI-compatible handlers: POST /v1/chat/completions, GET /v1/models.

use async_stream::stream;
use axum::{
    body::Body,
    extract::{Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{maybe_refresh_models, new_trace_id, AppState};
use crate::convert::{kiro::build_kiro_payload, openai};
use crate::error::{error_response, ErrorType};
use crate::stream::openai_sse::{build_models_response, build_openai_response, OpenAiSseFramer};
use crate::stream::{
    calculate_tokens_from_context_usage, collect_stream_result, estimate_tokens,
    kiro_event_stream,
};
use crate::utils::generate_conversation_id;

pub async fn handle_list_models(State(state): State<AppState>) -> impl IntoResponse {
    maybe_refresh_models(&state);
    let models = state.resolver.get_available_models().await;
    Json(build_models_response(&models))
}

pub async fn handle_chat_completions(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    let trace_id = new_trace_id();

    let request: openai::OpenAiRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorType::InvalidRequestError,
                &format!("Invalid request: {}", e),
            );
        }
    };

    maybe_refresh_models(&state);

    let resolution = state.resolver.resolve(&request.model).await;
    debug!(
        "[{}] Model resolution: {} -> {} (source: {})",
        trace_id,
        request.model,
        resolution.internal_id,
        resolution.source.as_str()
    );

    info!(
        "[{}] Chat completion | Model: {} | Stream: {} | Messages: {}",
        trace_id,
        request.model,
        request.stream,
        request.messages.len()
    );

    let (unified, system_prompt) = openai::to_unified(&request.messages);
    let tools = request
        .tools
        .as_deref()
        .map(openai::tools_to_unified)
        .unwrap_or_default();

    let conversation_id = generate_conversation_id();
    let profile_arn = state.token_manager.profile_arn().await;
    let payload = match build_kiro_payload(
        unified,
        &system_prompt,
        &resolution.internal_id,
        &tools,
        &conversation_id,
        profile_arn.as_deref(),
        &state.config,
    ) {
        Some(p) => p,
        None => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorType::InternalError,
                "Failed to build request payload",
            );
        }
    };

    let url = format!(
        "{}/generateAssistantResponse",
        state.token_manager.api_host().await
    );

    let response = match state.http.post_stream(&url, &payload).await {
        Ok(r) => r,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorType::InternalError,
                &format!("Request failed: {}", e),
            );
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return error_response(
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            ErrorType::ApiError,
            &body,
        );
    }

    if request.stream {
        stream_chat_completions(state, response, request.model, conversation_id, url, payload, trace_id)
    } else {
        non_stream_chat_completions(state, response, request.model, conversation_id, trace_id).await
    }
}

fn stream_chat_completions(
    state: AppState,
    response: reqwest::Response,
    model: String,
    conversation_id: String,
    url: String,
    payload: Value,
    trace_id: String,
) -> Response {
    let cfg = state.config.clone();
    let http = state.http.clone();

    let sse = stream! {
        let mut framer = OpenAiSseFramer::new(&conversation_id, &model, cfg.reasoning_handling);
        let mut attempts = 0u32;
        let mut current = response;

        'attempt: loop {
            let events = kiro_event_stream(current.bytes_stream(), true, &cfg);
            futures::pin_mut!(events);

            while let Some(event) = events.next().await {
                match event {
                    Ok(e) => {
                        if let Some(frame) = framer.process_event(&e) {
                            yield Ok::<Bytes, std::io::Error>(Bytes::from(frame));
                        }
                    }
                    Err(e) if e.is_first_token_timeout()
                        && attempts < cfg.first_token_max_retries =>
                    {
                        attempts += 1;
                        warn!(
                            "[{}] First token timeout (attempt {}/{}), retrying...",
                            trace_id, attempts, cfg.first_token_max_retries
                        );
                        match http.post_stream(&url, &payload).await {
                            Ok(r) if r.status().is_success() => {
                                current = r;
                                continue 'attempt;
                            }
                            Ok(r) => {
                                yield Ok(Bytes::from(OpenAiSseFramer::error_frame(&format!(
                                    "retry request returned status {}",
                                    r.status().as_u16()
                                ))));
                                return;
                            }
                            Err(err) => {
                                yield Ok(Bytes::from(OpenAiSseFramer::error_frame(&err)));
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("[{}] Stream error: {}", trace_id, e);
                        yield Ok(Bytes::from(OpenAiSseFramer::error_frame(&e.to_string())));
                        return;
                    }
                }
            }
            break;
        }

        yield Ok(Bytes::from(framer.finish()));
        info!("[{}] SSE stream completed", trace_id);
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(sse))
        .unwrap()
}

async fn non_stream_chat_completions(
    state: AppState,
    response: reqwest::Response,
    model: String,
    conversation_id: String,
    trace_id: String,
) -> Response {
    let result = match collect_stream_result(response.bytes_stream(), true, &state.config).await {
        Ok(r) => r,
        Err(e) => {
            warn!("[{}] Stream processing failed: {}", trace_id, e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorType::InternalError,
                &format!("Stream processing failed: {}", e),
            );
        }
    };

    let completion_tokens = estimate_tokens(&result.content);
    let max_input = state.model_cache.get_max_input_tokens(&model).await;
    let (prompt_tokens, total_tokens) = calculate_tokens_from_context_usage(
        result.context_usage_percentage,
        completion_tokens,
        max_input,
    );

    let body = build_openai_response(
        &conversation_id,
        &model,
        &result.content,
        &result.tool_calls,
        prompt_tokens,
        completion_tokens,
        total_tokens,
    );
    (StatusCode::OK, Json(body)).into_response()
}
