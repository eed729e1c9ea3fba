//! Subscout Web Server
//!
//! Axum-based REST API for the Subscout subscription tracker.
//!
//! Security features:
//! - JWT session authentication (Bearer header or `token` cookie)
//! - Restrictive CORS policy
//! - Provider access tokens stay server-side
//! - Audit logging for every authenticated write and detection run
//! - Sanitized error responses

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer, services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, warn};

use subscout_core::db::Database;
use subscout_core::models::FieldError;
use subscout_core::plaid::{BankDataProvider, PlaidClient};

mod handlers;
pub mod jwt;

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Maximum transactions accepted by `POST /api/detect`
pub const MAX_DETECT_TRANSACTIONS: usize = 50_000;

/// Default session lifetime (one week)
pub const DEFAULT_JWT_TTL_HOURS: i64 = 168;

/// Longest accepted session lifetime (one year)
pub const MAX_JWT_TTL_HOURS: i64 = 24 * 365;

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// HS256 signing secret for session tokens
    pub jwt_secret: String,
    /// Session token lifetime
    pub jwt_ttl_hours: i64,
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// Mark the session cookie `Secure` (disable for plain-HTTP local dev)
    pub secure_cookies: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("jwt_secret", &"<redacted>")
            .field("jwt_ttl_hours", &self.jwt_ttl_hours)
            .field("allowed_origins", &self.allowed_origins)
            .field("secure_cookies", &self.secure_cookies)
            .finish()
    }
}

impl ServerConfig {
    pub fn new(jwt_secret: &str) -> Self {
        Self {
            jwt_secret: jwt_secret.to_string(),
            jwt_ttl_hours: DEFAULT_JWT_TTL_HOURS,
            allowed_origins: vec![],
            secure_cookies: true,
        }
    }

    /// Load from environment variables
    ///
    /// - `SUBSCOUT_JWT_SECRET` (required)
    /// - `SUBSCOUT_JWT_TTL_HOURS` (default 168)
    /// - `SUBSCOUT_ALLOWED_ORIGINS` (comma-separated)
    /// - `SUBSCOUT_SECURE_COOKIES` (default true)
    pub fn from_env() -> anyhow::Result<Self> {
        let secret = std::env::var("SUBSCOUT_JWT_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("SUBSCOUT_JWT_SECRET must be set to sign session tokens")
            })?;
        if secret.len() < 32 {
            warn!("SUBSCOUT_JWT_SECRET is shorter than 32 bytes");
        }

        let mut config = Self::new(&secret);

        if let Ok(ttl) = std::env::var("SUBSCOUT_JWT_TTL_HOURS") {
            config.jwt_ttl_hours = parse_ttl_hours(&ttl)?;
        }

        if let Ok(origins) = std::env::var("SUBSCOUT_ALLOWED_ORIGINS") {
            config.allowed_origins = parse_origins(&origins);
        }

        if let Ok(secure) = std::env::var("SUBSCOUT_SECURE_COOKIES") {
            config.secure_cookies = !matches!(
                secure.trim().to_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }

        Ok(config)
    }
}

/// Parse a comma-separated origin list
pub fn parse_origins(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a session lifetime in hours, between 1 and `MAX_JWT_TTL_HOURS`
pub fn parse_ttl_hours(input: &str) -> anyhow::Result<i64> {
    input
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|h| (1..=MAX_JWT_TTL_HOURS).contains(h))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Invalid SUBSCOUT_JWT_TTL_HOURS: {} (expected 1 to {})",
                input,
                MAX_JWT_TTL_HOURS
            )
        })
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub config: ServerConfig,
    /// Bank-data provider (None when Plaid credentials are not configured)
    pub provider: Option<Arc<dyn BankDataProvider>>,
}

/// The user behind a verified session token, set by the auth middleware
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
}

/// Authentication middleware - verifies the session token and loads the user
///
/// The token comes from `Authorization: Bearer <token>` or the `token` cookie.
/// A valid token for a deleted user is rejected with `USER_NOT_FOUND`.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = request.uri().path().to_string();

    let token = jwt::token_from_headers(request.headers()).ok_or_else(|| {
        warn!(%path, "Unauthorized request - no token");
        AppError::unauthorized("MISSING_AUTH_TOKEN", "Authentication required")
    })?;

    let claims = jwt::verify_token(&token, &state.config).map_err(|e| {
        warn!(%path, error = %e, "Rejected session token");
        AppError::unauthorized("INVALID_AUTH_TOKEN", "Invalid or expired token")
    })?;

    let user = state
        .db
        .get_user(claims.user_id)?
        .ok_or_else(|| AppError::not_found("User not found").with_code("USER_NOT_FOUND"))?;

    tracing::debug!(user_id = user.id, %path, "Authenticated via session token");

    request.extensions_mut().insert(AuthUser {
        id: user.id,
        email: user.email,
    });
    Ok(next.run(request).await)
}

/// Success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create the application router, with Plaid configured from the environment
pub fn create_router(db: Database, static_dir: Option<&str>, config: ServerConfig) -> Router {
    let provider: Option<Arc<dyn BankDataProvider>> = match PlaidClient::from_env() {
        Ok(Some(client)) => {
            info!(
                "Plaid configured: {} ({})",
                client.config().environment.as_str(),
                client.config().effective_base_url()
            );
            Some(Arc::new(client))
        }
        Ok(None) => {
            info!("ℹ️  Plaid not configured (set PLAID_CLIENT_ID and PLAID_SECRET to enable bank linking)");
            None
        }
        Err(e) => {
            warn!("⚠️  Invalid Plaid configuration, bank linking disabled: {}", e);
            None
        }
    };
    create_router_with_provider(db, static_dir, config, provider)
}

/// Create the application router with an explicit provider (for testing)
pub fn create_router_with_provider(
    db: Database,
    static_dir: Option<&str>,
    config: ServerConfig,
    provider: Option<Arc<dyn BankDataProvider>>,
) -> Router {
    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        provider,
    });

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/verify", post(handlers::verify))
        .route("/auth/logout", post(handlers::logout));

    let protected_routes = Router::new()
        // Session
        .route("/me", get(handlers::get_me))
        // Dashboard
        .route("/dashboard", get(handlers::get_dashboard))
        // Bank linking
        .route("/plaid/link-token", post(handlers::create_link_token))
        .route("/plaid/exchange-token", post(handlers::exchange_public_token))
        .route("/plaid/items", get(handlers::list_linked_items))
        .route(
            "/plaid/items/:item_id",
            axum::routing::delete(handlers::delete_linked_item),
        )
        .route(
            "/plaid/detect-subscriptions",
            post(handlers::detect_linked_subscriptions),
        )
        // Detection over caller-supplied transactions
        .route("/detect", post(handlers::run_detection))
        // Subscription status
        .route("/subscriptions", get(handlers::list_subscriptions))
        .route(
            "/subscriptions/:id/cancel",
            post(handlers::cancel_subscription),
        )
        .route(
            "/subscriptions/:id/reactivate",
            post(handlers::reactivate_subscription),
        )
        // Audit log
        .route("/audit", get(handlers::list_audit_log))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Build CORS layer
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    let cors = if config.allowed_origins.is_empty() {
        // Restrictive default: only allow same-origin
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true)
    };

    // CSP: same-origin only, plus the hosted Plaid Link script and frame
    let csp_value = HeaderValue::from_static(
        "default-src 'self'; script-src 'self' https://cdn.plaid.com; frame-src https://cdn.plaid.com; style-src 'self' 'unsafe-inline'; img-src 'self' data:; connect-src 'self'; frame-ancestors 'none'"
    );

    let mut app = Router::new().nest("/api", public_routes.merge(protected_routes));

    // Serve static files if directory provided
    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.with_state(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            // Security headers
            .layer(SetResponseHeaderLayer::overriding(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::X_FRAME_OPTIONS,
                HeaderValue::from_static("DENY"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::CONTENT_SECURITY_POLICY,
                csp_value,
            )),
    )
}

/// Start the server with custom configuration
pub async fn serve_with_config(
    db: Database,
    host: &str,
    port: u16,
    static_dir: Option<&str>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    if !config.secure_cookies {
        warn!("⚠️  Session cookies are not marked Secure - do not expose over plain HTTP!");
    }

    let app = create_router(db, static_dir, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with HTTP status and machine-readable code
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    errors: Vec<FieldError>,
    internal: Option<anyhow::Error>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: &'a str,
    #[serde(skip_serializing_if = "no_field_errors")]
    errors: &'a [FieldError],
}

fn no_field_errors(errors: &&[FieldError]) -> bool {
    errors.is_empty()
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, msg: &str) -> Self {
        Self {
            status,
            code,
            message: msg.to_string(),
            errors: vec![],
            internal: None,
        }
    }

    pub fn bad_request(msg: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
    }

    pub fn unauthorized(code: &'static str, msg: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, msg)
    }

    pub fn not_found(msg: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", msg)
    }

    pub fn conflict(msg: &str) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", msg)
    }

    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self {
            errors,
            ..Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "Validation failed")
        }
    }

    pub fn provider_not_configured() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "PROVIDER_NOT_CONFIGURED",
            "Bank linking is not configured on this server",
        )
    }

    /// A failed operation: generic message to the client, cause to the log
    pub fn failed(code: &'static str, msg: &str, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            internal: Some(cause.into()),
            ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, msg)
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Map a core error, keeping the statuses that callers can act on
    pub fn from_core(err: subscout_core::Error) -> Self {
        use subscout_core::Error as CoreError;

        match err {
            CoreError::Validation(errors) => Self::validation(errors),
            CoreError::Conflict(msg) => Self::conflict(&msg),
            CoreError::NotFound(msg) => Self::not_found(&msg),
            CoreError::InvalidData(msg) => Self::bad_request(&msg),
            CoreError::ProviderNotConfigured => Self::provider_not_configured(),
            other => Self::from(other),
        }
    }

    /// Turn a JSON body rejection into the standard error body
    pub fn from_rejection(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), "INVALID_REQUEST_BODY", &rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, code = self.code, "Internal error");
        }

        let body = Json(ErrorBody {
            error: &self.message,
            code: self.code,
            errors: &self.errors,
        });

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            // Keep full error for logging
            internal: Some(err.into()),
            ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "")
        }
    }
}
