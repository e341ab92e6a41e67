use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{csrf_headers, json_body, require_session, UserInfo};
use crate::{
    access::{AccessError, CurrentSession, Identity},
    riskassess::AppState,
    storage::{Asset, AssetValue, Risk},
};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AssetPage {
    pub user_info: UserInfo,
    pub assets: Vec<Asset>,
}

/// Asset as submitted by a client.
///
/// `scope` is only read on creation; `createTime` is accepted for symmetry with
/// [`Asset`] and never read.
#[derive(ToSchema, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AssetRequest {
    pub id: Option<Uuid>,
    pub create_time: Option<DateTime<Utc>>,
    pub scope: Option<Uuid>,
    pub big_category: String,
    pub small_category: String,
    pub name: String,
    pub owner: String,
    pub value: AssetValue,
    pub risks: Vec<Risk>,
}

impl AssetRequest {
    /// Client-controlled fields applied over `base`, whose id, scope and
    /// creation time are kept.
    fn apply_to(self, base: Asset) -> Asset {
        Asset {
            big_category: self.big_category,
            small_category: self.small_category,
            name: self.name,
            owner: self.owner,
            value: self.value,
            risks: self.risks,
            ..base
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AssetId {
    pub id: Uuid,
}

#[utoipa::path(
    get,
    path = "/api/getassets/{scope_id}",
    params(("scope_id" = Uuid, Path, description = "Scope whose assets to list")),
    responses(
        (status = 200, description = "Assets of the scope", body = AssetPage),
        (status = 400, description = "Malformed scope id"),
        (status = 401, description = "Please login first"),
        (status = 403, description = "Caller is not a member of the scope"),
    ),
    tag = "assets"
)]
pub async fn get_assets(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Extension(identity): Extension<Identity>,
    Path(scope_id): Path<Uuid>,
) -> Result<impl IntoResponse, AccessError> {
    let session = require_session(&current)?;
    state.authorizer.require_scope(&identity, scope_id).await?;

    let assets = state
        .call(state.storage.find_assets_by_scope(scope_id))
        .await?;

    let headers = csrf_headers(&state, session)?;
    Ok((
        headers,
        Json(AssetPage {
            user_info: UserInfo {
                role: identity.role,
            },
            assets,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/addasset",
    request_body = AssetRequest,
    responses(
        (status = 200, description = "Asset created", body = AssetId),
        (status = 400, description = "Malformed body or no such scope"),
        (status = 401, description = "Please login first"),
        (status = 403, description = "Caller is not a member of the scope"),
    ),
    tag = "assets"
)]
pub async fn add_asset(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<AssetRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AccessError> {
    let request = json_body(payload)?;
    let scope = request.scope.ok_or(AccessError::BadRequest)?;

    state.authorizer.admit_new_asset(&identity, scope).await?;

    let asset = request.apply_to(Asset::new(scope));
    state.call(state.storage.insert_asset(&asset)).await?;

    info!(asset = %asset.id, scope = %asset.scope, "Asset created");

    Ok(Json(AssetId { id: asset.id }))
}

#[utoipa::path(
    post,
    path = "/api/updateasset",
    request_body = AssetRequest,
    responses(
        (status = 200, description = "Asset updated; scope and createTime unchanged"),
        (status = 400, description = "Malformed body or no such asset"),
        (status = 401, description = "Please login first"),
        (status = 403, description = "Caller is not a member of the asset's scope"),
    ),
    tag = "assets"
)]
pub async fn update_asset(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<AssetRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AccessError> {
    let request = json_body(payload)?;
    let id = request.id.ok_or(AccessError::BadRequest)?;

    let stored = state.authorizer.asset_for(&identity, id).await?;
    let asset = request.apply_to(stored);
    state.call(state.storage.replace_asset(&asset)).await?;

    info!(asset = %asset.id, scope = %asset.scope, "Asset updated");

    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/api/deleteasset",
    request_body = AssetId,
    responses(
        (status = 200, description = "Asset deleted"),
        (status = 400, description = "Malformed body or no such asset"),
        (status = 401, description = "Please login first"),
        (status = 403, description = "Caller is not a member of the asset's scope"),
    ),
    tag = "assets"
)]
pub async fn delete_asset(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<AssetId>, JsonRejection>,
) -> Result<impl IntoResponse, AccessError> {
    let AssetId { id } = json_body(payload)?;

    let asset = state.authorizer.asset_for(&identity, id).await?;
    state.call(state.storage.delete_asset(asset.id)).await?;

    info!(asset = %asset.id, "Asset deleted");

    Ok(StatusCode::OK)
}
