//! Subscription status handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

use crate::{AppError, AppState, AuthUser};
use subscout_core::models::{subscription_key, SubscriptionStatus, TrackedSubscription};

/// Query params for listing subscriptions
#[derive(Debug, Deserialize)]
pub struct ListSubscriptionsQuery {
    /// Filter by status (current, canceled)
    pub status: Option<String>,
}

/// GET /api/subscriptions - List stored subscription statuses
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<Json<Vec<TrackedSubscription>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<SubscriptionStatus>)
        .transpose()
        .map_err(|e| AppError::bad_request(&e))?;

    Ok(Json(state.db.list_subscription_statuses(auth.id, status)?))
}

/// Identifies the subscription a status change applies to
#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub name: String,
    pub amount: f64,
}

async fn change_status(
    state: &AppState,
    auth: &AuthUser,
    id: &str,
    payload: Result<Json<StatusChangeRequest>, JsonRejection>,
    status: SubscriptionStatus,
) -> Result<Json<TrackedSubscription>, AppError> {
    let Json(req) = payload.map_err(AppError::from_rejection)?;

    if subscription_key(&req.name, req.amount) != id {
        return Err(
            AppError::bad_request("Subscription id does not match name and amount")
                .with_code("SUBSCRIPTION_ID_MISMATCH"),
        );
    }

    let tracked = state
        .db
        .set_subscription_status(auth.id, &req.name, req.amount, status)
        .map_err(AppError::from_core)?;

    state.db.log_audit(
        &auth.email,
        match status {
            SubscriptionStatus::Canceled => "cancel",
            SubscriptionStatus::Current => "reactivate",
        },
        Some("subscription"),
        Some(id),
        Some(&req.name),
    )?;

    Ok(Json(tracked))
}

/// POST /api/subscriptions/:id/cancel - Mark a subscription as canceled
pub async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    payload: Result<Json<StatusChangeRequest>, JsonRejection>,
) -> Result<Json<TrackedSubscription>, AppError> {
    change_status(&state, &auth, &id, payload, SubscriptionStatus::Canceled).await
}

/// POST /api/subscriptions/:id/reactivate - Mark a subscription as current again
pub async fn reactivate_subscription(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    payload: Result<Json<StatusChangeRequest>, JsonRejection>,
) -> Result<Json<TrackedSubscription>, AppError> {
    change_status(&state, &auth, &id, payload, SubscriptionStatus::Current).await
}
