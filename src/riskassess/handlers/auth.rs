use axum::{
    extract::{rejection::FormRejection, Extension, State},
    http::{
        header::{LOCATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Form, Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

use super::{csrf_headers, UserInfo};
use crate::{
    access::{hash_password, normalize_credentials, AccessError, CurrentSession, Role},
    riskassess::AppState,
    storage::{StorageError, User},
};

#[derive(ToSchema, Deserialize, Serialize, Default)]
pub struct Credentials {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub passwd: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

fn credentials(form: Result<Form<Credentials>, FormRejection>) -> Credentials {
    match form {
        Ok(Form(credentials)) => credentials,
        Err(rejection) => {
            debug!("Rejected credentials form: {rejection}");
            Credentials::default()
        }
    }
}

fn redirect_home(mut headers: HeaderMap) -> impl IntoResponse {
    headers.insert(LOCATION, HeaderValue::from_static("/"));
    (StatusCode::FOUND, headers)
}

#[utoipa::path(
    get,
    path = "/api/login",
    responses(
        (status = 200, description = "Session slot ready, CSRF token in the X-CSRF-TOKEN header"),
        (status = 500, description = "Session store failure"),
    ),
    tag = "auth"
)]
/// Hand out a CSRF token, opening an anonymous session slot if the client has none.
pub async fn login_page(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
) -> Result<impl IntoResponse, AccessError> {
    let mut cookie = None;
    let session = if let Some(session) = current.0 {
        session
    } else {
        let issued = state.sessions.open().await?;
        cookie = Some(state.sessions.cookie(&issued.token)?);
        issued.session
    };

    let mut headers = csrf_headers(&state, &session)?;
    if let Some(cookie) = cookie {
        headers.insert(SET_COOKIE, cookie);
    }

    Ok((StatusCode::OK, headers))
}

#[utoipa::path(
    post,
    path = "/api/login",
    request_body(content = Credentials, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Logged in, new session cookie and CSRF token issued", body = UserInfo),
        (status = 400, description = "Missing or invalid CSRF token"),
        (status = 403, description = "Wrong account or password"),
    ),
    tag = "auth"
)]
#[instrument(skip(state, current, form))]
pub async fn login(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    form: Result<Form<Credentials>, FormRejection>,
) -> Result<impl IntoResponse, AccessError> {
    let credentials = credentials(form);
    let identity = state
        .verifier
        .verify(&credentials.account, &credentials.passwd)
        .await?;

    let issued = state.sessions.establish(current.get(), identity).await?;

    let mut headers = csrf_headers(&state, &issued.session)?;
    headers.insert(SET_COOKIE, state.sessions.cookie(&issued.token)?);

    info!(user = %identity.id, "User logged in");

    Ok((
        StatusCode::OK,
        headers,
        Json(UserInfo {
            role: identity.role,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/logout",
    responses(
        (status = 302, description = "Session cleared, redirect to /"),
        (status = 401, description = "Please login first"),
    ),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
) -> Result<impl IntoResponse, AccessError> {
    state.sessions.terminate(current.get()).await?;

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, state.sessions.expired_cookie());

    info!("User logged out");

    Ok(redirect_home(headers))
}

#[utoipa::path(
    post,
    path = "/api/register",
    request_body(content = Credentials, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 302, description = "Account created, redirect to /"),
        (status = 400, description = "Empty input, duplicate account or invalid CSRF token"),
        (status = 500, description = "Storage failure"),
    ),
    tag = "auth"
)]
#[instrument(skip(state, form))]
pub async fn register(
    State(state): State<AppState>,
    form: Result<Form<Credentials>, FormRejection>,
) -> Result<impl IntoResponse, AccessError> {
    let credentials = credentials(form);
    let Some((account, password)) =
        normalize_credentials(&credentials.account, &credentials.passwd)
    else {
        return Err(AccessError::BadRequest);
    };

    // Two simultaneous first registrations can both observe an empty table.
    let existing = state.call(state.storage.count_users()).await?;
    let user = User::new(
        account.to_string(),
        hash_password(password),
        Role::for_registration(existing),
    );

    match state.call(state.storage.insert_user(&user)).await {
        Ok(()) => {}
        Err(StorageError::Conflict) => {
            debug!("Account already registered");
            return Err(AccessError::BadRequest);
        }
        Err(err) => return Err(AccessError::Internal(err)),
    }

    info!(user = %user.id, role = ?user.role, "User registered");

    Ok(redirect_home(HeaderMap::new()))
}
