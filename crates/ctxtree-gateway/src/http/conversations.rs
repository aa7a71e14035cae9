//! REST surface for the conversation tree: create/list/delete nodes,
//! set the active node, fetch history, and send a turn.
//!
//! Request/response structs, `StatusCode` error mapping, and a
//! `CancellationToken` per live turn follow the same shape as a single
//! `/chat` endpoint, widened here to a tree/subchat/history surface.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    Json,
};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use ctxtree_core::NodeId;
use ctxtree_pipeline::{TurnConfig, TurnEvent};
use ctxtree_tree::{ContextType, FollowUp};

use crate::app::AppState;
use crate::http::error::{pipeline_error_response, ErrorBody};

#[derive(Deserialize, Default)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Serialize)]
pub struct ConversationCreated {
    pub node_id: String,
    pub title: String,
}

pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateConversationRequest>,
) -> Json<ConversationCreated> {
    let title = req.title.unwrap_or_else(|| ctxtree_pipeline::DEFAULT_NODE_TITLE.to_string());
    let node = state.forest.create_root(title.clone());
    Json(ConversationCreated {
        node_id: node.id.to_string(),
        title: node.title(),
    })
}

#[derive(Deserialize, Default)]
pub struct CreateSubchatRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub selected_text: Option<String>,
    #[serde(default)]
    pub follow_up_context: Option<String>,
    #[serde(default)]
    pub context_type: Option<String>,
}

#[derive(Serialize)]
pub struct SubchatCreated {
    pub node_id: String,
    pub title: String,
    pub parent_id: String,
}

pub async fn create_subchat(
    State(state): State<Arc<AppState>>,
    Path(parent_id): Path<String>,
    Json(req): Json<CreateSubchatRequest>,
) -> Result<Json<SubchatCreated>, (StatusCode, Json<ErrorBody>)> {
    let parent_id = NodeId::from(parent_id);
    let title = req.title.unwrap_or_else(|| ctxtree_pipeline::DEFAULT_NODE_TITLE.to_string());

    let follow_up = match (req.selected_text, req.follow_up_context) {
        (Some(selected_text), Some(follow_up_context)) => Some(FollowUp {
            selected_text,
            follow_up_context,
            context_type: parse_context_type(req.context_type.as_deref()),
        }),
        _ => None,
    };

    let child = state
        .forest
        .create_child(&parent_id, title, follow_up)
        .map_err(|e| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorBody { error: e.to_string() }),
            )
        })?;

    Ok(Json(SubchatCreated {
        node_id: child.id.to_string(),
        title: child.title(),
        parent_id: parent_id.to_string(),
    }))
}

fn parse_context_type(s: Option<&str>) -> ContextType {
    match s {
        Some("new_topic") => ContextType::NewTopic,
        Some("general") => ContextType::General,
        _ => ContextType::FollowUp,
    }
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    #[serde(default)]
    pub disable_rag: bool,
}

#[derive(Serialize)]
pub struct SendMessageResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_title: Option<String>,
}

fn turn_config(state: &AppState, disable_rag: bool) -> TurnConfig {
    let providers = &state.config.providers;
    let retrieval = &state.config.retrieval;
    TurnConfig {
        model_primary: providers.lm_model_primary.clone(),
        model_decomposition: providers.lm_model_decomposition.clone(),
        retrieval_enabled: retrieval.enabled_default && !disable_rag,
        retrieval_top_k_per_subquery: retrieval.top_k_per_subquery,
        retrieval_top_k: retrieval.top_k,
        retrieval_window_seconds: retrieval.window_seconds,
        max_tokens: 4096,
        summarization_start_threshold: state.config.summarizer.start_threshold,
        summarization_interval: state.config.summarizer.interval,
    }
}

/// POST /api/conversations/{node_id}/messages — non-streaming turn.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, (StatusCode, Json<ErrorBody>)> {
    let node_id = NodeId::from(node_id);
    let config = turn_config(&state, req.disable_rag);

    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    state
        .orchestrator
        .run_turn(&node_id, &req.message, &config, tx, cancel)
        .await
        .map_err(pipeline_error_response)?;

    // `run_turn` only reaches here once it has already settled into a
    // `Completed` outcome — any LM failure returned above via `map_err`
    // instead, so a `TurnEvent::Error` is never enqueued on this path.
    let mut response = String::new();
    let mut title = None;

    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Token { content } => response.push_str(&content),
            TurnEvent::Title { content } => title = Some(content),
            TurnEvent::Error { .. } | TurnEvent::Done => {}
        }
    }

    Ok(Json(SendMessageResponse {
        response,
        conversation_title: title,
    }))
}

/// POST /api/conversations/{node_id}/messages/stream — SSE turn.
pub async fn send_message_stream(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let node_id = NodeId::from(node_id);
    let config = turn_config(&state, req.disable_rag);
    let message = req.message;

    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    tokio::spawn(async move {
        if let Err(e) = state
            .orchestrator
            .run_turn(&node_id, &message, &config, tx.clone(), cancel)
            .await
        {
            let _ = tx
                .send(TurnEvent::Error {
                    content: e.to_string(),
                })
                .await;
        }
    });

    let events = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| r#"{"type":"error"}"#.to_string());
        Ok(Event::default().data(data))
    });

    Sse::new(events)
}

#[derive(Serialize)]
pub struct ConversationMetadata {
    pub node_id: String,
    pub title: String,
    pub parent_id: Option<String>,
    pub path_titles: Vec<String>,
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<ConversationMetadata>, (StatusCode, Json<ErrorBody>)> {
    let node_id = NodeId::from(node_id);
    let node = state.forest.get(&node_id).map_err(|e| {
        (StatusCode::NOT_FOUND, Json(ErrorBody { error: e.to_string() }))
    })?;
    let path_titles = state.forest.path_titles(&node_id).unwrap_or_default();

    Ok(Json(ConversationMetadata {
        node_id: node.id.to_string(),
        title: node.title(),
        parent_id: node.parent.as_ref().map(|p| p.to_string()),
        path_titles,
    }))
}

#[derive(Serialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
    pub timestamp: f64,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub node_id: String,
    pub turns: Vec<HistoryTurn>,
}

/// GET /api/conversations/{node_id}/history — the live buffer contents,
/// not the archive.
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<HistoryResponse>, (StatusCode, Json<ErrorBody>)> {
    let node_id = NodeId::from(node_id);
    let node = state.forest.get(&node_id).map_err(|e| {
        (StatusCode::NOT_FOUND, Json(ErrorBody { error: e.to_string() }))
    })?;

    let turns = node.with_buffer(|b| {
        b.snapshot()
            .into_iter()
            .map(|m| HistoryTurn {
                role: m.role.as_str().to_string(),
                content: m.content,
                timestamp: m.timestamp.seconds(),
            })
            .collect()
    });

    Ok(Json(HistoryResponse {
        node_id: node.id.to_string(),
        turns,
    }))
}
