//! Registration, login and session handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{jwt, AppError, AppState, AuthUser, SuccessResponse};
use subscout_core::auth::{verify_password, verify_password_unknown_account};
use subscout_core::models::{NewUser, User};

/// Token plus profile, returned by register and login
#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// Login request
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

fn signed_in(
    state: &AppState,
    status: StatusCode,
    user: User,
) -> Result<impl IntoResponse, AppError> {
    let token = jwt::issue_token(user.id, &state.config)?;
    let cookie = jwt::session_cookie(&token, &state.config);
    Ok((
        status,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse { token, user }),
    ))
}

/// POST /api/auth/register - Create an account and sign in
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(input) = payload.map_err(AppError::from_rejection)?;

    let user = state.db.create_user(&input).map_err(AppError::from_core)?;

    state
        .db
        .log_audit(&user.email, "register", Some("user"), Some(&user.id.to_string()), None)?;

    signed_in(&state, StatusCode::CREATED, user)
}

/// POST /api/auth/login - Exchange credentials for a session
///
/// Unknown email and wrong password get the same response.
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload.map_err(AppError::from_rejection)?;

    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::bad_request("Email and password are required")
            .with_code("VALIDATION_ERROR"));
    }

    let invalid = || AppError::unauthorized("INVALID_CREDENTIALS", "Invalid email or password");

    let Some(creds) = state.db.get_user_credentials(&req.email)? else {
        verify_password_unknown_account(&req.password);
        warn!("Login attempt for unknown account");
        return Err(invalid());
    };

    if !verify_password(&req.password, &creds.password_hash)? {
        warn!(user_id = creds.user_id, "Login attempt with wrong password");
        return Err(invalid());
    }

    let user = state
        .db
        .get_user(creds.user_id)?
        .ok_or_else(|| AppError::not_found("User not found").with_code("USER_NOT_FOUND"))?;

    info!(user_id = user.id, "User signed in");
    state.db.log_audit(&user.email, "login", Some("user"), Some(&user.id.to_string()), None)?;

    signed_in(&state, StatusCode::OK, user)
}

/// Token verification request
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub token: String,
}

/// Token verification response
#[derive(Serialize)]
pub struct VerifyResponse {
    #[serde(rename = "userId")]
    pub user_id: i64,
}

/// POST /api/auth/verify - Check a session token
pub async fn verify(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, AppError> {
    let Json(req) = payload.map_err(AppError::from_rejection)?;

    if req.token.is_empty() {
        return Err(AppError::unauthorized(
            "MISSING_AUTH_TOKEN",
            "Authentication required",
        ));
    }

    let claims = jwt::verify_token(&req.token, &state.config)
        .map_err(|_| AppError::unauthorized("INVALID_AUTH_TOKEN", "Invalid or expired token"))?;

    Ok(Json(VerifyResponse {
        user_id: claims.user_id,
    }))
}

/// POST /api/auth/logout - Clear the session cookie
///
/// Tokens are stateless; a Bearer client simply discards its copy.
pub async fn logout(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::SET_COOKIE, jwt::clear_cookie(&state.config))],
        Json(SuccessResponse { success: true }),
    )
}

/// GET /api/me - The signed-in user's profile
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<User>, AppError> {
    let user = state
        .db
        .get_user(auth.id)?
        .ok_or_else(|| AppError::not_found("User not found").with_code("USER_NOT_FOUND"))?;
    Ok(Json(user))
}
