//! Route table.
//!
//! Three endpoint groups, each behind its own [`GuardChain`]. All of them sit
//! behind the CSRF guard, which sits behind session loading. `/health` and the
//! API documentation are mounted outside that pipeline.

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::{
    handlers::{assets, auth, health, scopes, users},
    openapi::ApiDoc,
    AppState,
};
use crate::access::{authorize, csrf, session, EndpointClass, GuardChain};

fn guarded(router: Router<AppState>, class: EndpointClass) -> Router<AppState> {
    router.route_layer(from_fn_with_state(
        GuardChain::for_class(class),
        authorize::enforce,
    ))
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/login", get(auth::login_page).post(auth::login))
        .route("/api/register", post(auth::register));

    let private = Router::new()
        .route("/api/logout", get(auth::logout))
        .route("/api/getscopesbyuser", get(scopes::get_scopes_by_user))
        .route("/api/getassets/:scope_id", get(assets::get_assets))
        .route("/api/addasset", post(assets::add_asset))
        .route("/api/updateasset", post(assets::update_asset))
        .route("/api/deleteasset", post(assets::delete_asset));

    let privileged = Router::new()
        .route("/api/getscopes", get(scopes::get_scopes))
        .route("/api/addscope", post(scopes::add_scope))
        .route("/api/updatescope", post(scopes::update_scope))
        .route("/api/getuser_by_account", get(users::get_user_by_account))
        .route("/api/updateuser_scopes", post(users::update_user_scopes));

    let api = guarded(public, EndpointClass::Public)
        .merge(guarded(private, EndpointClass::Private))
        .merge(guarded(privileged, EndpointClass::Privileged))
        .layer(from_fn_with_state(state.csrf.clone(), csrf::enforce))
        .layer(from_fn_with_state(state.sessions.clone(), session::load))
        .with_state(state);

    Router::new()
        .route("/health", get(health::health).options(health::health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api)
}
