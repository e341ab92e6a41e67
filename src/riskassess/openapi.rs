use utoipa::OpenApi;

use super::handlers::{assets, auth, health, scopes, users, UserInfo};
use crate::{
    access::Role,
    storage::{Asset, AssetValue, Risk, Scope},
};

#[derive(OpenApi)]
#[openapi(
    info(title = "riskassess", description = "Risk assessment records with scope-based access control"),
    paths(
        health::health,
        auth::login_page,
        auth::login,
        auth::logout,
        auth::register,
        scopes::get_scopes,
        scopes::get_scopes_by_user,
        scopes::add_scope,
        scopes::update_scope,
        assets::get_assets,
        assets::add_asset,
        assets::update_asset,
        assets::delete_asset,
        users::get_user_by_account,
        users::update_user_scopes,
    ),
    components(schemas(
        health::Health,
        auth::Credentials,
        UserInfo,
        Role,
        Scope,
        scopes::ReducedScope,
        scopes::ScopePage,
        scopes::ScopeRequest,
        Asset,
        AssetValue,
        Risk,
        assets::AssetPage,
        assets::AssetRequest,
        assets::AssetId,
        users::ReducedUser,
    )),
    tags(
        (name = "health", description = "Liveness"),
        (name = "auth", description = "Login, logout and registration"),
        (name = "scopes", description = "Administrative partitions"),
        (name = "assets", description = "Assessed assets, authorized per scope"),
        (name = "users", description = "User role and scope assignment"),
    )
)]
pub struct ApiDoc;
