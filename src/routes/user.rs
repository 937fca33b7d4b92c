use axum::{Extension, Json};
use serde::Serialize;

use crate::domain::{errors::ApiError, fields::UserApp};

#[derive(Serialize)]
pub struct AuthenticatedUserResponse {
    #[serde(flatten)]
    user: UserApp,
}

pub async fn get_authenticated_user(
    Extension(user): Extension<UserApp>,
) -> Result<Json<AuthenticatedUserResponse>, ApiError> {
    Ok(Json(AuthenticatedUserResponse { user }))
}
