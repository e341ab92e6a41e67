use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{csrf_headers, json_body, require_session, UserInfo};
use crate::{
    access::{AccessError, CurrentSession, Identity},
    riskassess::AppState,
    storage::Scope,
};

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReducedScope {
    pub id: Uuid,
    pub name: String,
}

impl From<Scope> for ReducedScope {
    fn from(scope: Scope) -> Self {
        Self {
            id: scope.id,
            name: scope.name,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ScopePage {
    pub user_info: UserInfo,
    pub scopes: Vec<ReducedScope>,
}

/// Body of `addscope` and `updatescope`. Any `createTime` sent along is ignored.
#[derive(ToSchema, Deserialize, Debug)]
pub struct ScopeRequest {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub name: String,
}

fn scope_name(request: &ScopeRequest) -> Result<String, AccessError> {
    let name = request.name.trim();
    if name.is_empty() {
        Err(AccessError::BadRequest)
    } else {
        Ok(name.to_string())
    }
}

fn scope_page(identity: &Identity, scopes: Vec<Scope>) -> ScopePage {
    ScopePage {
        user_info: UserInfo {
            role: identity.role,
        },
        scopes: scopes.into_iter().map(ReducedScope::from).collect(),
    }
}

#[utoipa::path(
    get,
    path = "/api/getscopes",
    responses(
        (status = 200, description = "Every scope", body = ScopePage),
        (status = 401, description = "Please login first"),
        (status = 403, description = "Administrators only"),
    ),
    tag = "scopes"
)]
pub async fn get_scopes(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, AccessError> {
    let session = require_session(&current)?;
    let scopes = state.call(state.storage.list_scopes()).await?;
    let headers = csrf_headers(&state, session)?;
    Ok((headers, Json(scope_page(&identity, scopes))))
}

#[utoipa::path(
    get,
    path = "/api/getscopesbyuser",
    responses(
        (status = 200, description = "Scopes the caller belongs to", body = ScopePage),
        (status = 401, description = "Please login first"),
    ),
    tag = "scopes"
)]
pub async fn get_scopes_by_user(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, AccessError> {
    let session = require_session(&current)?;
    let ids = state.authorizer.directory().scopes_of(identity.id).await?;
    let scopes = if ids.is_empty() {
        Vec::new()
    } else {
        state.call(state.storage.find_scopes_by_ids(&ids)).await?
    };
    let headers = csrf_headers(&state, session)?;
    Ok((headers, Json(scope_page(&identity, scopes))))
}

#[utoipa::path(
    post,
    path = "/api/addscope",
    request_body = ScopeRequest,
    responses(
        (status = 200, description = "Scope created", body = ReducedScope),
        (status = 400, description = "Malformed body or blank name"),
        (status = 401, description = "Please login first"),
        (status = 403, description = "Administrators only"),
    ),
    tag = "scopes"
)]
pub async fn add_scope(
    State(state): State<AppState>,
    payload: Result<Json<ScopeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AccessError> {
    let request = json_body(payload)?;
    let scope = Scope::new(scope_name(&request)?);
    state.call(state.storage.insert_scope(&scope)).await?;

    info!(scope = %scope.id, "Scope created");

    Ok(Json(ReducedScope::from(scope)))
}

#[utoipa::path(
    post,
    path = "/api/updatescope",
    request_body = ScopeRequest,
    responses(
        (status = 200, description = "Scope renamed"),
        (status = 400, description = "Malformed body, blank name or no such scope"),
        (status = 401, description = "Please login first"),
        (status = 403, description = "Administrators only"),
    ),
    tag = "scopes"
)]
/// Rename a scope. Its id and creation time stay as stored.
pub async fn update_scope(
    State(state): State<AppState>,
    payload: Result<Json<ScopeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AccessError> {
    let request = json_body(payload)?;
    let name = scope_name(&request)?;
    let id = request.id.ok_or(AccessError::BadRequest)?;

    let mut scope = state
        .call(state.storage.find_scope_by_id(id))
        .await
        .map_err(AccessError::from_lookup)?;
    scope.name = name;
    state.call(state.storage.replace_scope(&scope)).await?;

    Ok(StatusCode::OK)
}
