//! Login route.
//!
//! There is no password, token or session: identity is resolve-or-create
//! by username and trusted as supplied. The id that comes back is stable
//! across logins.

use crate::AppState;
use axum::{extract::State, routing::post, Json, Router};
use banter_common::error::{BanterError, BanterResult};
use banter_common::models::User;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/auth/login", post(login))
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Serialize)]
struct LoginResponse {
    user: User,
}

/// POST /api/auth/login
async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> BanterResult<Json<LoginResponse>> {
    let username = body.username.as_deref().unwrap_or("").trim();
    if username.is_empty() {
        return Err(BanterError::Validation {
            message: "username is required".into(),
        });
    }
    let user = state.directory.login(username).await?;
    Ok(Json(LoginResponse { user }))
}
