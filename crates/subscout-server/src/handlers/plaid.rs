//! Bank linking handlers
//!
//! Access tokens from the exchange are stored server-side and never leave it;
//! the client only ever sees item ids.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::detection::{annotate, local_today, DetectionResponse};
use crate::{AppError, AppState, AuthUser, SuccessResponse};
use subscout_core::detect::SubscriptionDetector;
use subscout_core::models::LinkedItem;
use subscout_core::plaid::{transactions_window, BankDataProvider};

fn provider(state: &AppState) -> Result<Arc<dyn BankDataProvider>, AppError> {
    state
        .provider
        .clone()
        .ok_or_else(AppError::provider_not_configured)
}

/// Link token response
#[derive(Serialize)]
pub struct LinkTokenResponse {
    pub link_token: String,
}

/// POST /api/plaid/link-token - Start the hosted link flow
pub async fn create_link_token(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<LinkTokenResponse>, AppError> {
    let provider = provider(&state)?;

    let link_token = provider
        .create_link_token(&auth.id.to_string())
        .await
        .map_err(|e| AppError::failed("PLAID_LINK_TOKEN_ERROR", "Failed to create link token", e))?;

    Ok(Json(LinkTokenResponse { link_token }))
}

/// Public token exchange request
#[derive(Debug, Deserialize)]
pub struct ExchangeTokenRequest {
    #[serde(default)]
    pub public_token: String,
    pub institution_name: Option<String>,
}

/// Public token exchange response (no access token)
#[derive(Serialize)]
pub struct ExchangeTokenResponse {
    pub item_id: String,
}

/// POST /api/plaid/exchange-token - Store a newly linked item
pub async fn exchange_public_token(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    payload: Result<Json<ExchangeTokenRequest>, JsonRejection>,
) -> Result<Json<ExchangeTokenResponse>, AppError> {
    let Json(req) = payload.map_err(AppError::from_rejection)?;

    if req.public_token.trim().is_empty() {
        return Err(AppError::bad_request("public_token is required"));
    }

    let provider = provider(&state)?;
    let access = provider
        .exchange_public_token(req.public_token.trim())
        .await
        .map_err(|e| {
            AppError::failed(
                "PLAID_TOKEN_EXCHANGE_ERROR",
                "Failed to exchange public token",
                e,
            )
        })?;

    state
        .db
        .add_linked_item(
            auth.id,
            &access.item_id,
            &access.access_token,
            req.institution_name.as_deref(),
        )
        .map_err(AppError::from_core)?;

    info!(user_id = auth.id, item_id = %access.item_id, "Linked bank item");
    state.db.log_audit(
        &auth.email,
        "link",
        Some("item"),
        Some(&access.item_id),
        req.institution_name.as_deref(),
    )?;

    Ok(Json(ExchangeTokenResponse {
        item_id: access.item_id,
    }))
}

/// GET /api/plaid/items - List linked items
pub async fn list_linked_items(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Vec<LinkedItem>>, AppError> {
    Ok(Json(state.db.list_linked_items(auth.id)?))
}

/// DELETE /api/plaid/items/:item_id - Forget a linked item
pub async fn delete_linked_item(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(item_id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    if !state.db.delete_linked_item(auth.id, &item_id)? {
        return Err(AppError::not_found(&format!("Item {} not found", item_id))
            .with_code("ITEM_NOT_FOUND"));
    }

    state
        .db
        .log_audit(&auth.email, "unlink", Some("item"), Some(&item_id), None)?;

    Ok(Json(SuccessResponse { success: true }))
}

/// Detection over linked items; every item when `item_id` is absent
#[derive(Debug, Default, Deserialize)]
pub struct DetectLinkedRequest {
    pub item_id: Option<String>,
}

/// POST /api/plaid/detect-subscriptions - Fetch recent history and detect
pub async fn detect_linked_subscriptions(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    body: Bytes,
) -> Result<Json<DetectionResponse>, AppError> {
    // An absent body scans every item; a present one must parse
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        DetectLinkedRequest::default()
    } else {
        Json::<DetectLinkedRequest>::from_bytes(&body)
            .map_err(AppError::from_rejection)?
            .0
    };
    let provider = provider(&state)?;

    let item_ids: Vec<String> = match req.item_id {
        Some(item_id) => vec![item_id],
        None => state
            .db
            .list_linked_items(auth.id)?
            .into_iter()
            .map(|item| item.item_id)
            .collect(),
    };

    if item_ids.is_empty() {
        return Err(AppError::bad_request("No linked bank accounts").with_code("NO_LINKED_ITEMS"));
    }

    let today = local_today();
    let (start, end) = transactions_window(today);

    let mut transactions = Vec::new();
    for item_id in &item_ids {
        let access_token = state
            .db
            .get_item_access_token(auth.id, item_id)?
            .ok_or_else(|| {
                AppError::not_found(&format!("Item {} not found", item_id))
                    .with_code("ITEM_NOT_FOUND")
            })?;

        let fetched = provider
            .list_transactions(&access_token, start, end)
            .await
            .map_err(|e| {
                AppError::failed(
                    "SUBSCRIPTION_DETECTION_ERROR",
                    "Failed to detect subscriptions",
                    e,
                )
            })?;
        transactions.extend(fetched);
    }

    let report = SubscriptionDetector::new(today).detect(&transactions);
    let statuses = state.db.subscription_status_map(auth.id)?;

    state.db.log_audit(
        &auth.email,
        "detect",
        Some("item"),
        req_item_label(&item_ids).as_deref(),
        Some(&format!(
            "items={}, transactions={}, candidates={}",
            item_ids.len(),
            transactions.len(),
            report.subscriptions.len()
        )),
    )?;

    Ok(Json(annotate(report, &statuses, today)))
}

fn req_item_label(item_ids: &[String]) -> Option<String> {
    match item_ids {
        [single] => Some(single.clone()),
        _ => None,
    }
}
