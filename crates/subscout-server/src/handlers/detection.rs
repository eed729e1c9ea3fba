//! Subscription detection handlers

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Extension, Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{AppError, AppState, AuthUser, MAX_DETECT_TRANSACTIONS};
use subscout_core::detect::{days_until, DetectionReport, RejectedTransaction, SubscriptionDetector};
use subscout_core::models::{CandidateTransaction, RawTransaction, SubscriptionStatus};

/// A detected subscription with the user's stored status
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedSubscription {
    pub id: String,
    pub name: String,
    pub amount: f64,
    pub transactions: Vec<CandidateTransaction>,
    pub next_due_date: Option<NaiveDate>,
    pub days_until_due: Option<i64>,
    pub status: SubscriptionStatus,
}

/// Detection response
#[derive(Debug, Serialize)]
pub struct DetectionResponse {
    pub subscriptions: Vec<DetectedSubscription>,
    pub rejected: Vec<RejectedTransaction>,
}

/// Attach ids, time left and stored status to a detection report.
///
/// Candidates without a stored row are `current`.
pub(crate) fn annotate(
    report: DetectionReport,
    statuses: &HashMap<String, SubscriptionStatus>,
    today: NaiveDate,
) -> DetectionResponse {
    let subscriptions = report
        .subscriptions
        .into_iter()
        .map(|candidate| {
            let id = candidate.key();
            DetectedSubscription {
                status: statuses.get(&id).copied().unwrap_or_default(),
                days_until_due: candidate.next_due_date.map(|due| days_until(due, today)),
                id,
                name: candidate.name,
                amount: candidate.amount,
                transactions: candidate.transactions,
                next_due_date: candidate.next_due_date,
            }
        })
        .collect();

    DetectionResponse {
        subscriptions,
        rejected: report.rejected,
    }
}

/// Server-local calendar date
pub(crate) fn local_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Detection request over caller-supplied transactions
#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
    /// Evaluate as of this date instead of today
    pub today: Option<NaiveDate>,
}

/// POST /api/detect - Run detection over a transaction list
pub async fn run_detection(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    payload: Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<DetectionResponse>, AppError> {
    let Json(req) = payload.map_err(AppError::from_rejection)?;

    if req.transactions.len() > MAX_DETECT_TRANSACTIONS {
        return Err(AppError::bad_request(&format!(
            "Too many transactions (maximum {})",
            MAX_DETECT_TRANSACTIONS
        )));
    }

    let today = req.today.unwrap_or_else(local_today);
    let report = SubscriptionDetector::new(today).detect(&req.transactions);
    let statuses = state.db.subscription_status_map(auth.id)?;

    state.db.log_audit(
        &auth.email,
        "detect",
        Some("transactions"),
        None,
        Some(&format!(
            "input={}, candidates={}, rejected={}",
            req.transactions.len(),
            report.subscriptions.len(),
            report.rejected.len()
        )),
    )?;

    Ok(Json(annotate(report, &statuses, today)))
}
