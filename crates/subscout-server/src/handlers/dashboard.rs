//! Dashboard and health handlers

use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde::Serialize;

use crate::{AppError, AppState, AuthUser};
use subscout_core::models::{DashboardStats, User};

/// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Dashboard payload
#[derive(Serialize)]
pub struct DashboardResponse {
    pub user: User,
    #[serde(flatten)]
    pub stats: DashboardStats,
}

/// GET /api/dashboard - Profile plus per-user counts
pub async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<DashboardResponse>, AppError> {
    let user = state
        .db
        .get_user(auth.id)?
        .ok_or_else(|| AppError::not_found("User not found").with_code("USER_NOT_FOUND"))?;
    let stats = state.db.dashboard_stats(auth.id)?;
    Ok(Json(DashboardResponse { user, stats }))
}
