use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, PublicUser, RegisterRequest},
        error::AuthError,
        extractors::CurrentUser,
        services::AuthService,
    },
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register))
        .route("/users/login", post(login))
        .route("/users/me", get(get_me))
}

/// POST /api/users
#[instrument(skip(service, payload))]
pub async fn register(
    State(service): State<AuthService>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    let Json(payload) = payload?;
    let res = service.register(payload).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

/// POST /api/users/login
#[instrument(skip(service, payload))]
pub async fn login(
    State(service): State<AuthService>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    let Json(payload) = payload?;
    let res = service.login(payload).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

/// GET /api/users/me
#[instrument(skip_all)]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(user)
}
