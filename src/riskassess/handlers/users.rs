use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::json_body;
use crate::{
    access::{AccessError, Role},
    riskassess::AppState,
    storage::User,
};

/// A user without credentials.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReducedUser {
    pub id: Uuid,
    #[serde(default)]
    pub account: String,
    pub role: Role,
    #[serde(default)]
    pub scopes: Vec<Uuid>,
}

impl From<User> for ReducedUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            account: user.account,
            role: user.role,
            scopes: user.scopes,
        }
    }
}

#[derive(Deserialize, IntoParams, Debug)]
#[into_params(parameter_in = Query)]
pub struct AccountQuery {
    #[serde(default)]
    account: String,
}

#[utoipa::path(
    get,
    path = "/api/getuser_by_account",
    params(AccountQuery),
    responses(
        (status = 200, description = "User found", body = ReducedUser),
        (status = 400, description = "Missing account or no such user"),
        (status = 401, description = "Please login first"),
        (status = 403, description = "Administrators only"),
    ),
    tag = "users"
)]
pub async fn get_user_by_account(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
) -> Result<impl IntoResponse, AccessError> {
    let account = query.account.trim();
    if account.is_empty() {
        return Err(AccessError::BadRequest);
    }

    let user = state
        .call(state.storage.find_user_by_account(account))
        .await
        .map_err(AccessError::from_lookup)?;

    Ok(Json(ReducedUser::from(user)))
}

#[utoipa::path(
    post,
    path = "/api/updateuser_scopes",
    request_body = ReducedUser,
    responses(
        (status = 200, description = "Role and scopes replaced"),
        (status = 400, description = "Malformed body or no such user"),
        (status = 401, description = "Please login first"),
        (status = 403, description = "Administrators only"),
    ),
    tag = "users"
)]
/// Replace a user's role and scope list wholesale.
///
/// Scope changes apply on the user's next request; a role change only once
/// they log in again.
pub async fn update_user_scopes(
    State(state): State<AppState>,
    payload: Result<Json<ReducedUser>, JsonRejection>,
) -> Result<impl IntoResponse, AccessError> {
    let reduced = json_body(payload)?;

    let mut user = state
        .call(state.storage.find_user_by_id(reduced.id))
        .await
        .map_err(AccessError::from_lookup)?;

    user.role = reduced.role;
    user.scopes = reduced.scopes;
    state.call(state.storage.replace_user(&user)).await?;

    info!(user = %user.id, role = ?user.role, scopes = user.scopes.len(), "User scopes updated");

    Ok(StatusCode::OK)
}
