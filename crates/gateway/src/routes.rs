//! Router assembly and the pairing/rotation handlers.

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use base64::Engine;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use gatehouse_auth::pairing::{
    self, GrantedPermission, PrepareInstallRequest, parse_pairing_string,
};
use gatehouse_auth::pop::{PopHeaders, RequestParts, rotate_credential};
use gatehouse_auth::BASE64URL;
use gatehouse_core::unix_now;

use crate::error::ApiError;
use crate::pipeline::resource_handler;
use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/pair", post(create_pairing))
        .route("/v1/install/prepare", post(prepare_install))
        .route("/v1/install/{session_token}/approve", post(approve_install))
        .route("/v1/install/{session_token}/deny", post(deny_install))
        .route("/v1/credentials/rotate", post(rotate))
        .route(
            "/r/{resource_type}/{provider}/{*action}",
            any(resource_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct PairResponse {
    pairing: String,
    expires_at: u64,
}

/// Mints a connect code. The admin surface in front of this endpoint is an
/// external collaborator; the gateway returns the pairing string as-is.
async fn create_pairing(State(state): State<AppState>) -> Result<Json<PairResponse>, ApiError> {
    let generated = pairing::generate_pairing(&state.db, state.config.public_url_trimmed())?;
    Ok(Json(PairResponse {
        pairing: generated.pairing,
        expires_at: generated.expires_at,
    }))
}

async fn prepare_install(
    State(state): State<AppState>,
    Json(mut request): Json<PrepareInstallRequest>,
) -> Result<Json<pairing::PreparedInstall>, ApiError> {
    // Apps may hand over the whole pairing string instead of the bare code.
    if request.code.starts_with("pair::") {
        request.code = parse_pairing_string(&request.code)?.code;
    }
    let prepared =
        pairing::prepare_install(&state.db, state.config.public_url_trimmed(), &request)?;
    Ok(Json(prepared))
}

#[derive(Debug, Deserialize)]
struct ApproveBody {
    grants: Vec<GrantedPermission>,
}

/// Approves the session and bounces the browser back to the app with
/// `status=approved`, the app id, and the earliest grant expiry.
async fn approve_install(
    State(state): State<AppState>,
    Path(session_token): Path<String>,
    Json(body): Json<ApproveBody>,
) -> Result<Response, ApiError> {
    let approved = pairing::approve_install(&state.db, &session_token, &body.grants)?;

    let mut redirect = url::Url::parse(&approved.redirect_uri)
        .map_err(|e| ApiError::internal("redirect", &e))?;
    {
        let mut query = redirect.query_pairs_mut();
        query.append_pair("status", "approved");
        query.append_pair("app_id", &approved.app_id);
        if let Some(expiry) = approved.earliest_expires_at {
            if let Some(ts) = Utc.timestamp_opt(expiry as i64, 0).single() {
                query.append_pair("expires_at", &ts.to_rfc3339());
            }
        }
    }
    Ok(Redirect::to(redirect.as_str()).into_response())
}

async fn deny_install(
    State(state): State<AppState>,
    Path(session_token): Path<String>,
) -> Result<Response, ApiError> {
    let redirect_uri = pairing::deny_install(&state.db, &session_token)?;

    let mut redirect =
        url::Url::parse(&redirect_uri).map_err(|e| ApiError::internal("redirect", &e))?;
    redirect
        .query_pairs_mut()
        .append_pair("status", "denied");
    Ok(Redirect::to(redirect.as_str()).into_response())
}

#[derive(Debug, Deserialize)]
struct RotateBody {
    /// New Ed25519 verification key, base64url.
    public_key: String,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Debug, Serialize)]
struct RotateResponse {
    credential_id: String,
}

/// Key rotation, authenticated with the same proof of possession as resource
/// requests. The old key signs the request that retires it.
async fn rotate(State(state): State<AppState>, request: Request) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, 64 * 1024)
        .await
        .map_err(|_| ApiError::invalid_request("request body too large or unreadable"))?;

    let pop = PopHeaders::from_header_map(&parts.headers).map_err(ApiError::from)?;
    let authed = state.verifier().verify(
        RequestParts {
            method: parts.method.as_str(),
            path: parts.uri.path(),
            query: parts.uri.query(),
            body: &body,
        },
        &pop,
        unix_now() as i64,
    )?;

    let rotate_body: RotateBody = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid_request(format!("body is not valid JSON: {e}")))?;
    let public_key = BASE64URL
        .decode(&rotate_body.public_key)
        .map_err(|_| ApiError::invalid_request("public_key is not valid base64url"))?;

    let credential = rotate_credential(
        &state.db,
        &authed.app.id,
        &public_key,
        rotate_body.label.as_deref().unwrap_or("rotated"),
    )?;

    Ok((
        StatusCode::OK,
        Json(RotateResponse {
            credential_id: credential.id,
        }),
    )
        .into_response())
}
