//! Bank-data provider abstraction and the Plaid client
//!
//! The server holds a `dyn BankDataProvider` so production talks to Plaid
//! while tests swap in a stub. `PlaidClient` is the only implementation that
//! goes over the network.
//!
//! # Configuration
//!
//! Environment variables:
//! - `PLAID_CLIENT_ID`, `PLAID_SECRET`: API credentials (both required)
//! - `PLAID_ENV`: sandbox, development or production. Default: sandbox
//! - `PLAID_REDIRECT_URI`: OAuth redirect registered with Plaid (optional)
//! - `PLAID_CLIENT_NAME`: name shown in the link flow. Default: Subscription Manager
//! - `PLAID_BASE_URL`: override the environment's host (mock servers)
//! - `PLAID_TIMEOUT_SECS`: per-request timeout. Default: 30

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Months, NaiveDate};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::RawTransaction;

/// API version pinned on every request
pub const PLAID_VERSION: &str = "2020-09-14";

/// Page size for `/transactions/get`
pub const TRANSACTIONS_PAGE_SIZE: u32 = 500;

/// Months of history fetched for detection
pub const TRANSACTION_WINDOW_MONTHS: u32 = 2;

const DEFAULT_CLIENT_NAME: &str = "Subscription Manager";

/// Per-request timeout unless configured otherwise
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials for one linked item, as returned by a token exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedItemAccess {
    pub access_token: String,
    pub item_id: String,
}

/// Source of bank transactions and of the account-linking handshake
#[async_trait]
pub trait BankDataProvider: Send + Sync {
    /// Create a short-lived token that starts the hosted link flow
    async fn create_link_token(&self, client_user_id: &str) -> Result<String>;

    /// Swap the public token from the link flow for long-lived item credentials
    async fn exchange_public_token(&self, public_token: &str) -> Result<LinkedItemAccess>;

    /// Fetch every transaction posted between `start` and `end` (inclusive)
    async fn list_transactions(
        &self,
        access_token: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawTransaction>>;
}

/// Rolling window of history ending today
pub fn transactions_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today
        .checked_sub_months(Months::new(TRANSACTION_WINDOW_MONTHS))
        .unwrap_or(NaiveDate::MIN);
    (start, today)
}

/// Plaid deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaidEnvironment {
    #[default]
    Sandbox,
    Development,
    Production,
}

impl PlaidEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://sandbox.plaid.com",
            Self::Development => "https://development.plaid.com",
            Self::Production => "https://production.plaid.com",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl std::str::FromStr for PlaidEnvironment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(Error::InvalidData(format!(
                "Unknown Plaid environment: {}",
                other
            ))),
        }
    }
}

/// Plaid client configuration
#[derive(Clone)]
pub struct PlaidConfig {
    pub client_id: String,
    pub secret: String,
    pub environment: PlaidEnvironment,
    pub base_url: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_name: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for PlaidConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaidConfig")
            .field("client_id", &self.client_id)
            .field("secret", &"<redacted>")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("client_name", &self.client_name)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl PlaidConfig {
    pub fn new(client_id: &str, secret: &str, environment: PlaidEnvironment) -> Self {
        Self {
            client_id: client_id.to_string(),
            secret: secret.to_string(),
            environment,
            base_url: None,
            redirect_uri: None,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Point the client at a different host (mock servers)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    /// Load from environment variables.
    ///
    /// Returns `Ok(None)` when credentials are absent so the server can start
    /// without bank linking.
    pub fn from_env() -> Result<Option<Self>> {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let (client_id, secret) = match (non_empty("PLAID_CLIENT_ID"), non_empty("PLAID_SECRET")) {
            (Some(id), Some(secret)) => (id, secret),
            (None, None) => return Ok(None),
            _ => {
                return Err(Error::InvalidData(
                    "PLAID_CLIENT_ID and PLAID_SECRET must be set together".into(),
                ))
            }
        };

        let environment = match non_empty("PLAID_ENV") {
            Some(env) => env.parse()?,
            None => PlaidEnvironment::default(),
        };

        let mut config = Self::new(&client_id, &secret, environment);
        if let Some(url) = non_empty("PLAID_BASE_URL") {
            config = config.with_base_url(&url);
        }
        config.redirect_uri = non_empty("PLAID_REDIRECT_URI");
        if let Some(name) = non_empty("PLAID_CLIENT_NAME") {
            config.client_name = name;
        }
        if let Some(secs) = non_empty("PLAID_TIMEOUT_SECS") {
            let secs = secs
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| {
                    Error::InvalidData(format!("Invalid PLAID_TIMEOUT_SECS: {}", secs))
                })?;
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(Some(config))
    }

    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.base_url())
    }
}

/// HTTP client for the Plaid API
#[derive(Clone)]
pub struct PlaidClient {
    http_client: Client,
    config: PlaidConfig,
}

impl PlaidClient {
    pub fn new(config: PlaidConfig) -> Self {
        Self {
            http_client: Client::new(),
            config,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Option<Self>> {
        Ok(PlaidConfig::from_env()?.map(Self::new))
    }

    pub fn config(&self) -> &PlaidConfig {
        &self.config
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.effective_base_url(), path);
        debug!(%url, "Plaid request");

        let response = self
            .http_client
            .post(&url)
            .header("Plaid-Version", PLAID_VERSION)
            .timeout(self.config.request_timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let err = match serde_json::from_slice::<PlaidErrorBody>(&bytes) {
                Ok(body) => Error::Provider {
                    code: body.error_code,
                    message: body.error_message,
                },
                Err(_) => Error::Provider {
                    code: format!("HTTP_{}", status.as_u16()),
                    message: "Unexpected response from Plaid".to_string(),
                },
            };
            warn!(path, status = status.as_u16(), error = %err, "Plaid request failed");
            return Err(err);
        }

        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug, Deserialize)]
struct PlaidErrorBody {
    error_code: String,
    error_message: String,
}

#[derive(Debug, Serialize)]
struct LinkTokenUser<'a> {
    client_user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct LinkTokenRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    user: LinkTokenUser<'a>,
    client_name: &'a str,
    products: [&'a str; 1],
    country_codes: [&'a str; 1],
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_uri: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct LinkTokenResponse {
    link_token: String,
}

#[derive(Debug, Serialize)]
struct ExchangeRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    public_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    item_id: String,
}

#[derive(Debug, Serialize)]
struct TransactionsOptions {
    count: u32,
    offset: u32,
}

#[derive(Debug, Serialize)]
struct TransactionsRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    start_date: String,
    end_date: String,
    options: TransactionsOptions,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    transactions: Vec<RawTransaction>,
    total_transactions: u32,
}

#[async_trait]
impl BankDataProvider for PlaidClient {
    async fn create_link_token(&self, client_user_id: &str) -> Result<String> {
        let request = LinkTokenRequest {
            client_id: &self.config.client_id,
            secret: &self.config.secret,
            user: LinkTokenUser { client_user_id },
            client_name: &self.config.client_name,
            products: ["transactions"],
            country_codes: ["US"],
            language: "en",
            redirect_uri: self.config.redirect_uri.as_deref(),
        };

        let response: LinkTokenResponse = self.post("/link/token/create", &request).await?;
        Ok(response.link_token)
    }

    async fn exchange_public_token(&self, public_token: &str) -> Result<LinkedItemAccess> {
        let request = ExchangeRequest {
            client_id: &self.config.client_id,
            secret: &self.config.secret,
            public_token,
        };

        let response: ExchangeResponse =
            self.post("/item/public_token/exchange", &request).await?;
        Ok(LinkedItemAccess {
            access_token: response.access_token,
            item_id: response.item_id,
        })
    }

    async fn list_transactions(
        &self,
        access_token: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawTransaction>> {
        let mut transactions = Vec::new();

        loop {
            let request = TransactionsRequest {
                client_id: &self.config.client_id,
                secret: &self.config.secret,
                access_token,
                start_date: start.format("%Y-%m-%d").to_string(),
                end_date: end.format("%Y-%m-%d").to_string(),
                options: TransactionsOptions {
                    count: TRANSACTIONS_PAGE_SIZE,
                    offset: transactions.len() as u32,
                },
            };

            let page: TransactionsResponse = self.post("/transactions/get", &request).await?;
            let fetched = page.transactions.len();
            transactions.extend(page.transactions);

            debug!(
                fetched,
                total = page.total_transactions,
                "Fetched transactions page"
            );

            if fetched == 0 || transactions.len() as u32 >= page.total_transactions {
                break;
            }
        }

        Ok(transactions)
    }
}
