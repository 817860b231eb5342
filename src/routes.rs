//! HTTP surface.

use crate::server::AppState;
use crate::tokens::{estimator_for_model, TokenEstimator};
use crate::types::{ChatRequest, Message};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat/stream", post(chat_stream))
        .route("/tokens/estimate", post(estimate_tokens))
        .route("/conversations", get(list_conversations))
        .route("/conversations/:id/messages", get(conversation_messages))
        .route("/conversations/:id", delete(delete_conversation))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ErrorResponse = (StatusCode, Json<Value>);

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> ErrorResponse {
    (status, Json(json!({ "error": message.to_string() })))
}

/// SSE event stream that cancels the request's child tasks when the client
/// drops the connection.
struct GuardedEvents {
    inner: ReceiverStream<crate::types::GatewayEvent>,
    _guard: DropGuard,
}

impl Stream for GuardedEvents {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(ev)) => Poll::Ready(Some(Ok(Event::default()
                .event(ev.name())
                .data(ev.payload())))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<GuardedEvents>, ErrorResponse> {
    let permit = state
        .coordinator
        .admit(&request.caller_id)
        .map_err(|e| error_response(StatusCode::TOO_MANY_REQUESTS, e))?;

    let request_id = Uuid::new_v4();
    info!(
        request_id = %request_id,
        caller_id = request.caller_id.as_str(),
        conversation_id = request.conversation_id.as_str(),
        "chat stream opened"
    );

    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let coordinator = Arc::clone(&state.coordinator);
    tokio::spawn(async move {
        coordinator.run(permit, request, tx, run_cancel).await;
    });

    let events = GuardedEvents {
        inner: ReceiverStream::new(rx),
        _guard: cancel.drop_guard(),
    };
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct EstimateRequest {
    messages: Vec<Message>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

async fn estimate_tokens(
    State(state): State<AppState>,
    Json(request): Json<EstimateRequest>,
) -> Result<Json<Value>, ErrorResponse> {
    let model = request.model.as_deref().unwrap_or("");
    let tokens = match request
        .provider
        .or_else(|| state.pool.provider_names().into_iter().next())
    {
        Some(provider) => state
            .pool
            .estimate(&provider, &request.messages, model)
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?,
        // No providers configured: fall back to a model-family ratio.
        None => estimator_for_model(model).count_messages(&request.messages),
    };
    Ok(Json(json!({ "tokens": tokens })))
}

async fn list_conversations(State(state): State<AppState>) -> Result<Json<Value>, ErrorResponse> {
    let conversations = state
        .store
        .list()
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(json!({ "conversations": conversations })))
}

async fn conversation_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ErrorResponse> {
    let messages = state
        .store
        .messages(&id)
        .await
        .map_err(|e| error_response(StatusCode::NOT_FOUND, e))?;
    Ok(Json(json!({ "messages": messages })))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ErrorResponse> {
    let existed = state
        .store
        .delete(&id)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    if existed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(error_response(StatusCode::NOT_FOUND, "unknown conversation"))
    }
}

async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "admission": state.coordinator.admission().snapshot(),
        "cache": state.coordinator.cache_stats(),
        "pool": state.pool.snapshot(),
        "context_bundles_cached": state.context.cached_bundles(),
    }))
}
