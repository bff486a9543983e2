//! The resource request pipeline.
//!
//! One handler serves `/r/{resource_type}/{provider}/{*action_path}`: read the
//! raw body once, authenticate the proof of possession, resolve the plugin and
//! action, shape the payload, evaluate policy, decrypt the upstream secret,
//! execute, record usage, respond. The first failing step answers the request;
//! nothing after it runs.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use gatehouse_auth::pop::{PopHeaders, RequestParts};
use gatehouse_core::{ResourceId, unix_now};
use gatehouse_plugins::{Constraints, ExecContext, ExecOptions, PluginOutput};
use gatehouse_policy::engine::RequestFacts;
use gatehouse_policy::{UsageNumbers, record_usage};
use gatehouse_store::models::{SecretModel, SecretStatus};
use gatehouse_vault::SealedSecret;

use crate::AppState;
use crate::error::ApiError;

/// Largest request body the gateway will buffer.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

pub async fn resource_handler(
    State(state): State<AppState>,
    Path((resource_type, provider, action_path)): Path<(String, String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let (parts, body) = request.into_parts();

    // The body is read exactly once; the signature covers these raw bytes and
    // the plugin only ever sees the shaped payload.
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ApiError::invalid_request("request body too large or unreadable"))?;

    let pop = PopHeaders::from_header_map(&parts.headers).map_err(ApiError::from)?;
    let app_id = pop.app_id.clone();
    let method = parts.method.as_str().to_string();
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(str::to_owned);

    let authed = state
        .verifier()
        .verify(
            RequestParts {
                method: &method,
                path: &path,
                query: query.as_deref(),
                body: &body,
            },
            &pop,
            unix_now() as i64,
        )
        .map_err(|err| {
            let api: ApiError = err.into();
            log_decision(&app_id, "-", "-", "DENIED", &api.code, started);
            api
        })?;

    let resource = ResourceId::new(&resource_type, &provider)
        .map_err(|_| ApiError::unknown_resource("no such resource"))?;
    let plugin = state
        .registry
        .get(&resource)
        .ok_or_else(|| ApiError::unknown_resource(format!("no plugin for {resource}")))?;
    let action = plugin
        .manifest()
        .action_for_route(&action_path)
        .ok_or_else(|| ApiError::unknown_resource(format!("no action at {action_path}")))?
        .to_string();

    let resource_name = resource.to_string();
    let deny = |code: &str, started| {
        log_decision(&authed.app.id, &resource_name, &action, "DENIED", code, started);
    };

    let policy = state.policy();
    let permission = policy
        .load_permission(&authed.app.id, &resource, &action)
        .map_err(|err| {
            let api: ApiError = err.into();
            deny(&api.code, started);
            api
        })?;
    let constraints = Constraints::from_value(&permission.constraints_json());

    let input: serde_json::Value = if body.is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::invalid_request(format!("body is not valid JSON: {e}")))?
    };

    let shaped = plugin
        .validate_and_shape(&action, input, &constraints)
        .map_err(|err| {
            let api = ApiError::from_mapped(plugin.map_error(&err));
            deny(&api.code, started);
            api
        })?;
    let enforcement = shaped.enforcement.clone();

    let facts = RequestFacts {
        now: Utc::now(),
        input_tokens: enforcement.input_tokens,
    };
    policy.evaluate(&permission, &facts).map_err(|err| {
        let api: ApiError = err.into();
        deny(&api.code, started);
        api
    })?;

    let secret_row = SecretModel::find(&state.db, &resource)?
        .ok_or_else(|| ApiError::unknown_resource(format!("no credential registered for {resource}")))?;
    if secret_row.status() != SecretStatus::Active {
        deny("resource_disabled", started);
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "resource_disabled",
            "resource is disabled",
        ));
    }
    let sealed = SealedSecret {
        encrypted_key: secret_row.encrypted_key.clone(),
        key_iv: secret_row.key_iv.clone(),
    };
    let secret = state
        .vault
        .open_string(&sealed)
        .map_err(|e| ApiError::internal("vault", &e))?;
    let provider_config = secret_row.config_json();

    // Dropping the guard on any exit path cancels the upstream call.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let options = ExecOptions {
        cancel,
        stream: enforcement.streaming,
        timeout: Duration::from_secs(state.config.upstream_timeout_secs),
    };

    let outcome = plugin
        .execute(
            &action,
            shaped,
            ExecContext {
                secret: &secret,
                config: provider_config.as_ref(),
            },
            options,
        )
        .await;

    match outcome {
        Ok(PluginOutput::Json { body, content_type }) => {
            let usage = plugin.extract_usage(&body);
            let numbers = UsageNumbers {
                input_tokens: usage.input_tokens.unwrap_or(enforcement.input_tokens),
                output_tokens: usage.output_tokens.unwrap_or(0),
                total_tokens: usage.total_tokens.unwrap_or(0),
                model: usage.model.or(enforcement.model),
            }
            .normalized();
            record_usage(
                &state.db,
                &state.kv,
                &authed.app.id,
                &resource_name,
                &permission.id,
                &numbers,
                facts.now,
            )?;

            log_decision(
                &authed.app.id,
                &resource_name,
                &action,
                "ALLOWED",
                "ok",
                started,
            );
            json_response(&body, &content_type)
        }
        Ok(PluginOutput::Stream {
            stream,
            content_type,
        }) => {
            // Streamed responses are forwarded without buffering; token usage
            // for them is best-effort and skipped here.
            tracing::debug!(app_id = %authed.app.id, resource = %resource_name, "streaming response, usage accounting skipped");
            log_decision(
                &authed.app.id,
                &resource_name,
                &action,
                "ALLOWED",
                "stream",
                started,
            );
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from_stream(stream))
                .map_err(|e| ApiError::internal("response", &e))
        }
        Err(err) => {
            let api = ApiError::from_mapped(plugin.map_error(&err));
            deny(&api.code, started);
            Err(api)
        }
    }
}

fn json_response(body: &serde_json::Value, content_type: &str) -> Result<Response, ApiError> {
    let bytes = serde_json::to_vec(body).map_err(|e| ApiError::internal("response", &e))?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.to_string())
        .body(Body::from(bytes))
        .map_err(|e| ApiError::internal("response", &e))
}

/// Emits the request decision off the hot path.
fn log_decision(
    app_id: &str,
    resource: &str,
    action: &str,
    decision: &'static str,
    code: &str,
    started: Instant,
) {
    let app_id = app_id.to_string();
    let resource = resource.to_string();
    let action = action.to_string();
    let code = code.to_string();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    tokio::spawn(async move {
        tracing::info!(
            app_id,
            resource,
            action,
            decision,
            code,
            elapsed_ms,
            "request decision"
        );
    });
}
