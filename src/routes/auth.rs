use crate::{
    app::AppState,
    domain::{errors::ApiError, fields::ReferralCode},
    utils::jwt::{decode_auth_token, generate_auth_token},
};
use axum::{
    extract::State,
    headers::{authorization::Bearer, Authorization},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
    Json, TypedHeader,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    referral_code: ReferralCode,
}

#[derive(Serialize)]
pub struct AuthenticateResponse {
    token: String,
}

impl From<String> for AuthenticateResponse {
    fn from(token: String) -> Self {
        Self { token }
    }
}

/// Issues a bearer token for an existing referrer identified by its code.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AuthenticateRequest>,
) -> Result<Json<AuthenticateResponse>, ApiError> {
    tracing::info!("authenticating user >>> {}", payload.referral_code);
    let user = state
        .users()
        .find_user_by_referral_code(&payload.referral_code)
        .await?
        .ok_or(ApiError::AuthenticationError)?;

    let token = generate_auth_token(user.id, &state.config.jwt)?;
    Ok(Json(token.into()))
}

/// Resolves the user id carried by a bearer token, if the token is valid.
pub fn user_id_from_token(token: &str, state: &AppState) -> Option<Uuid> {
    decode_auth_token(token, &state.config.jwt)
        .ok()
        .and_then(|claims| Uuid::parse_str(&claims.sub).ok())
}

pub async fn check_auth<B>(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    mut request: Request<B>,
    next: Next<B>,
) -> Response {
    let Some(user_id) = user_id_from_token(auth.token(), &state) else {
        return ApiError::AuthenticationError.into_response();
    };

    match state.users().find_user(user_id).await {
        Ok(Some(user)) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Ok(None) => ApiError::AuthenticationError.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
