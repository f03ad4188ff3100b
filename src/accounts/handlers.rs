use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};

use crate::{
    accounts::{
        dto::{
            ForgotPasswordRequest, LoginRequest, PublicUser, RegisterRequest,
            ResetPasswordRequest, VerifyRequest,
        },
        error::UserError,
    },
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;
const UNKNOWN: &str = "unknown";

type Rejection = (StatusCode, String);

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/verify", post(verify))
        .route("/auth/password/forgot", post(forgot_password))
        .route("/auth/password/reset", post(reset_password))
}

fn internal(e: UserError) -> Rejection {
    error!(error = %e, "user operation failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into())
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`.
fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim);
    let real = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    forwarded
        .filter(|ip| !ip.is_empty())
        .or(real.filter(|ip| !ip.is_empty()))
        .unwrap_or(UNKNOWN)
        .to_owned()
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ua| !ua.is_empty())
        .unwrap_or(UNKNOWN)
        .to_owned()
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<PublicUser>), Rejection> {
    payload.username = payload.username.trim().to_lowercase();

    if !is_valid_email(&payload.username) {
        warn!(username = %payload.username, "invalid username");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }

    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }

    let user = match state.users.create(&payload.username, &payload.password).await {
        Ok(u) => u,
        Err(UserError::UsernameTaken(username)) => {
            warn!(%username, "username already registered");
            return Err((StatusCode::CONFLICT, "Email already registered".into()));
        }
        Err(UserError::InvalidUsername) => {
            return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
        }
        Err(e) => return Err(internal(e)),
    };

    if let Err(e) = state.mailer.send_verification(&user).await {
        error!(error = %e, user_id = user.id, "send verification failed");
    }

    info!(user_id = user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<PublicUser>, Rejection> {
    let username = payload.username.trim();
    match state.users.login(username, &payload.password).await {
        Ok(Some(user)) => {
            info!(user_id = user.id, "user logged in");
            Ok(Json(user.into()))
        }
        Ok(None) => {
            warn!("login rejected");
            Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()))
        }
        Err(e) => Err(internal(e)),
    }
}

#[instrument(skip(state, payload))]
pub async fn verify(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> Result<StatusCode, Rejection> {
    state
        .users
        .verify(payload.user_id, &payload.code)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Always 202 so callers cannot probe which usernames exist.
#[instrument(skip(state, headers, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<StatusCode, Rejection> {
    let ip = client_ip(&headers);
    let ua = user_agent(&headers);
    let issued = state
        .users
        .create_reset_token(payload.username.trim(), &ip, &ua)
        .await
        .map_err(internal)?;

    if let Some((user, token)) = issued {
        if let Err(e) = state.mailer.send_reset(&user, &token).await {
            error!(error = %e, user_id = user.id, "send reset failed");
        }
    }
    Ok(StatusCode::ACCEPTED)
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<StatusCode, Rejection> {
    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }

    let reset = state
        .users
        .reset_password(payload.user_id, &payload.token, &payload.password)
        .await
        .map_err(internal)?;
    if !reset {
        warn!(user_id = payload.user_id, "reset rejected");
        return Err((StatusCode::BAD_REQUEST, "Invalid or expired link".into()));
    }
    Ok(StatusCode::NO_CONTENT)
}
