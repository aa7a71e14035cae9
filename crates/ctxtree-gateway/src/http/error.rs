use axum::{http::StatusCode, Json};
use serde::Serialize;

use ctxtree_pipeline::PipelineError;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Map a pipeline error onto an HTTP status: missing node → 404, bad
/// input → 400, anything that would corrupt an invariant → 500.
pub fn pipeline_error_response(err: PipelineError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &err {
        PipelineError::NodeNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::BadInput(_) => StatusCode::BAD_REQUEST,
        PipelineError::Tree(ctxtree_tree::TreeError::NodeNotFound { .. })
        | PipelineError::Tree(ctxtree_tree::TreeError::ParentNotFound { .. })
        | PipelineError::Tree(ctxtree_tree::TreeError::TreeNotFound { .. }) => StatusCode::NOT_FOUND,
        PipelineError::LmUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::LmFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}
