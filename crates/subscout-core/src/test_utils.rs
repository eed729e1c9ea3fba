//! Test utilities for subscout-core
//!
//! This module provides a mock Plaid server that speaks the three endpoints
//! the client uses, for development and integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;

use crate::models::RawTransaction;
use crate::plaid::{PlaidConfig, PlaidEnvironment, PLAID_VERSION};

/// Mock Plaid server for testing and development
pub struct MockPlaidServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[derive(Clone)]
struct MockState {
    transactions: Arc<Vec<RawTransaction>>,
}

impl MockPlaidServer {
    pub const CLIENT_ID: &'static str = "test-client-id";
    pub const SECRET: &'static str = "test-secret";
    /// Public token the exchange endpoint always rejects
    pub const BAD_PUBLIC_TOKEN: &'static str = "public-sandbox-invalid";

    /// Start the mock server with a small set of sample transactions
    pub async fn start() -> Self {
        Self::start_with_transactions(sample_transactions()).await
    }

    /// Start the mock server serving the given transactions
    pub async fn start_with_transactions(transactions: Vec<RawTransaction>) -> Self {
        let state = MockState {
            transactions: Arc::new(transactions),
        };

        let app = Router::new()
            .route("/link/token/create", post(handle_link_token))
            .route("/item/public_token/exchange", post(handle_exchange))
            .route("/transactions/get", post(handle_transactions))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client configuration pointing at this server with valid credentials
    pub fn config(&self) -> PlaidConfig {
        PlaidConfig::new(Self::CLIENT_ID, Self::SECRET, PlaidEnvironment::Sandbox)
            .with_base_url(&self.url())
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockPlaidServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Two monthly subscriptions and a one-off purchase
pub fn sample_transactions() -> Vec<RawTransaction> {
    vec![
        RawTransaction::new("NETFLIX", 15.49, "2024-01-15"),
        RawTransaction::new("SPOTIFY", 9.99, "2024-01-03"),
        RawTransaction::new("BLUE BOTTLE COFFEE", 6.50, "2024-01-20"),
        RawTransaction::new("NETFLIX", 15.49, "2024-02-15"),
        RawTransaction::new("SPOTIFY", 9.99, "2024-02-03"),
    ]
}

fn plaid_error(error_code: &str, error_message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error_type": "INVALID_INPUT",
            "error_code": error_code,
            "error_message": error_message,
            "display_message": null,
        })),
    )
        .into_response()
}

fn check_request(headers: &HeaderMap, client_id: &str, secret: &str) -> Option<Response> {
    let version = headers.get("Plaid-Version").and_then(|v| v.to_str().ok());
    if version != Some(PLAID_VERSION) {
        return Some(plaid_error("INVALID_FIELD", "missing or unsupported Plaid-Version"));
    }
    if client_id != MockPlaidServer::CLIENT_ID || secret != MockPlaidServer::SECRET {
        return Some(plaid_error(
            "INVALID_API_KEYS",
            "invalid client_id or secret provided",
        ));
    }
    None
}

#[derive(Debug, Deserialize)]
struct LinkTokenUser {
    client_user_id: String,
}

#[derive(Debug, Deserialize)]
struct LinkTokenRequest {
    client_id: String,
    secret: String,
    user: LinkTokenUser,
}

async fn handle_link_token(headers: HeaderMap, Json(req): Json<LinkTokenRequest>) -> Response {
    if let Some(err) = check_request(&headers, &req.client_id, &req.secret) {
        return err;
    }
    Json(json!({
        "link_token": format!("link-sandbox-{}", req.user.client_user_id),
        "expiration": "2030-01-01T00:00:00Z",
        "request_id": "mock-request",
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct ExchangeRequest {
    client_id: String,
    secret: String,
    public_token: String,
}

async fn handle_exchange(headers: HeaderMap, Json(req): Json<ExchangeRequest>) -> Response {
    if let Some(err) = check_request(&headers, &req.client_id, &req.secret) {
        return err;
    }
    if req.public_token == MockPlaidServer::BAD_PUBLIC_TOKEN {
        return plaid_error("INVALID_PUBLIC_TOKEN", "provided public token is invalid");
    }
    let suffix = req
        .public_token
        .strip_prefix("public-sandbox-")
        .unwrap_or(&req.public_token);
    Json(json!({
        "access_token": format!("access-sandbox-{}", suffix),
        "item_id": format!("item-{}", suffix),
        "request_id": "mock-request",
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct TransactionsOptions {
    count: usize,
    offset: usize,
}

#[derive(Debug, Deserialize)]
struct TransactionsRequest {
    client_id: String,
    secret: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    options: TransactionsOptions,
}

async fn handle_transactions(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(req): Json<TransactionsRequest>,
) -> Response {
    if let Some(err) = check_request(&headers, &req.client_id, &req.secret) {
        return err;
    }

    let in_range: Vec<&RawTransaction> = state
        .transactions
        .iter()
        .filter(|t| {
            t.date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                .map(|d| d >= req.start_date && d <= req.end_date)
                .unwrap_or(false)
        })
        .collect();

    let page: Vec<&RawTransaction> = in_range
        .iter()
        .skip(req.options.offset)
        .take(req.options.count)
        .copied()
        .collect();

    Json(json!({
        "transactions": page,
        "total_transactions": in_range.len(),
        "request_id": "mock-request",
    }))
    .into_response()
}
