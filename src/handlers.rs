use axum::{
    extract::{Request, State},
    response::Response,
};
use std::sync::Arc;

use crate::tenso::Tenso;

/// Shared application state
pub type SharedState = Arc<Tenso>;

/// Fallback handler: every request goes through the tenso pipeline, which
/// owns routing itself
pub async fn handle_request(State(tenso): State<SharedState>, request: Request) -> Response {
    tenso.handle(request).await
}
