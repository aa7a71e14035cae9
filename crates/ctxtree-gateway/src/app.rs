use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use ctxtree_archive::{EmbeddingModel, VectorArchive};
use ctxtree_core::config::CtxtreeConfig;
use ctxtree_llm::LlmProvider;
use ctxtree_pipeline::Orchestrator;
use ctxtree_tree::Forest;

/// Central shared state, handed to every Axum handler as `Arc<AppState>`.
pub struct AppState {
    pub config: CtxtreeConfig,
    pub forest: Arc<Forest>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(
        config: CtxtreeConfig,
        forest: Arc<Forest>,
        archive: Arc<VectorArchive>,
        embedder: Arc<dyn EmbeddingModel>,
        lm: Arc<dyn LlmProvider>,
    ) -> Self {
        let orchestrator = Orchestrator::new(forest.clone(), archive, embedder, lm);
        Self {
            config,
            forest,
            orchestrator,
        }
    }
}

/// Assemble the full Axum router for the conversation-tree REST surface.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/api/conversations",
            post(crate::http::conversations::create_conversation),
        )
        .route(
            "/api/conversations/{parent_id}/subchats",
            post(crate::http::conversations::create_subchat),
        )
        .route(
            "/api/conversations/{node_id}/messages",
            post(crate::http::conversations::send_message),
        )
        .route(
            "/api/conversations/{node_id}/messages/stream",
            post(crate::http::conversations::send_message_stream),
        )
        .route(
            "/api/conversations/{node_id}",
            get(crate::http::conversations::get_conversation),
        )
        .route(
            "/api/conversations/{node_id}/history",
            get(crate::http::conversations::get_history),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
