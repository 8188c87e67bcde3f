// Anthropic-compatible handler: POST /v1/messages.

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
use crate::convert::{claude, kiro::build_kiro_payload, UnifiedMessage};
use crate::error::{error_response, ErrorType};
use crate::stream::anthropic_sse::{build_anthropic_response, AnthropicSseFramer};
use crate::stream::{
    calculate_tokens_from_context_usage, collect_stream_result, estimate_tokens,
    kiro_event_stream,
};
use crate::utils::generate_conversation_id;

pub async fn handle_messages(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let trace_id = new_trace_id();

    let request: claude::ClaudeRequest = match serde_json::from_value(body) {
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
        "[{}] Messages request | Model: {} | Stream: {} | Messages: {} | Tools: {}",
        trace_id,
        request.model,
        request.stream,
        request.messages.len(),
        request.tools.is_some()
    );

    let (unified, system_prompt) = claude::to_unified(&request);
    let estimated_input = estimate_input_tokens(&unified, &system_prompt);
    let tools = request
        .tools
        .as_deref()
        .map(claude::tools_to_unified)
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
        stream_messages(state, response, request.model, url, payload, trace_id)
    } else {
        non_stream_messages(state, response, request.model, estimated_input, trace_id).await
    }
}

fn stream_messages(
    state: AppState,
    response: reqwest::Response,
    model: String,
    url: String,
    payload: Value,
    trace_id: String,
) -> Response {
    let cfg = state.config.clone();
    let http = state.http.clone();

    let sse = stream! {
        let mut framer = AnthropicSseFramer::new(&model);
        yield Ok::<Bytes, std::io::Error>(Bytes::from(framer.message_start()));

        let mut attempts = 0u32;
        let mut current = response;

        'attempt: loop {
            let events = kiro_event_stream(current.bytes_stream(), true, &cfg);
            futures::pin_mut!(events);

            while let Some(event) = events.next().await {
                match event {
                    Ok(e) => {
                        let frames = framer.process_event(&e);
                        if !frames.is_empty() {
                            yield Ok(Bytes::from(frames));
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
                                yield Ok(Bytes::from(AnthropicSseFramer::error_frame(&format!(
                                    "retry request returned status {}",
                                    r.status().as_u16()
                                ))));
                                return;
                            }
                            Err(err) => {
                                yield Ok(Bytes::from(AnthropicSseFramer::error_frame(&err)));
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("[{}] Stream error: {}", trace_id, e);
                        yield Ok(Bytes::from(AnthropicSseFramer::error_frame(&e.to_string())));
                        return;
                    }
                }
            }
            break;
        }

        let output_tokens = framer.output_tokens();
        yield Ok(Bytes::from(framer.finish()));
        info!(
            "[{}] Anthropic SSE stream completed (~{} output tokens)",
            trace_id, output_tokens
        );
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

async fn non_stream_messages(
    state: AppState,
    response: reqwest::Response,
    model: String,
    estimated_input: u32,
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

    if let Some(credits) = result.credits {
        debug!("[{}] Upstream reported {} credits used", trace_id, credits);
    }

    let output_tokens = estimate_tokens(&result.content) + estimate_tokens(&result.thinking_content);
    let max_input = state.model_cache.get_max_input_tokens(&model).await;
    let (prompt_tokens, _total) = calculate_tokens_from_context_usage(
        result.context_usage_percentage,
        output_tokens,
        max_input,
    );
    let input_tokens = if prompt_tokens > 0 { prompt_tokens } else { estimated_input };

    let message_id = format!(
        "msg_{}",
        &uuid::Uuid::new_v4().to_string().replace('-', "")[..24]
    );
    let body = build_anthropic_response(
        &message_id,
        &model,
        &result.content,
        &result.thinking_content,
        &result.tool_calls,
        input_tokens,
        output_tokens,
    );
    (StatusCode::OK, Json(body)).into_response()
}

/// Rough prompt-size estimate for message_start usage.
fn estimate_input_tokens(messages: &[UnifiedMessage], system_prompt: &str) -> u32 {
    let mut total = estimate_tokens(system_prompt);
    for msg in messages {
        total += 4;
        total += estimate_tokens(&msg.content.extract_text());
    }
    total + 3
}
