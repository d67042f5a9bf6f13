//! Admin API for client registration
//!
//! Runs on a separate listener and is the only place a client secret is ever
//! returned. When an admin token is configured every route requires
//! `Authorization: Bearer <token>`.
//!
//! Endpoints:
//! - POST /admin/clients        register a client, returns id and secret
//! - GET  /admin/clients/{id}   client metadata without the secret
//! - GET  /admin/tokens/{id}    issued token metadata

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use common::Secret;
use oauth_store::{ClientRegistration, CredentialStore};
use serde::Deserialize;
use tracing::{error, info, warn};
use url::Url;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    store: Arc<dyn CredentialStore>,
    token: Option<Arc<Secret<String>>>,
}

impl AdminState {
    pub fn new(store: Arc<dyn CredentialStore>, token: Option<Secret<String>>) -> Self {
        Self {
            store,
            token: token.map(Arc::new),
        }
    }
}

/// Build the admin axum router with the bearer-token guard applied.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/clients", post(register_client))
        .route("/admin/clients/{id}", get(get_client))
        .route("/admin/tokens/{id}", get(get_token))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    json_response(status, serde_json::json!({ "error": message }))
}

async fn require_token(State(state): State<AdminState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.token.as_deref() else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|presented| expected.matches(presented));

    if authorized {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "admin request without valid bearer token");
        error_response(StatusCode::UNAUTHORIZED, "unauthorized")
    }
}

/// Request body for client registration.
#[derive(Deserialize)]
struct RegisterClientRequest {
    name: String,
    redirect_uri: String,
    #[serde(default)]
    whitelisted: bool,
}

/// POST /admin/clients: register a client and return its credentials.
///
/// The response is the only time the plaintext secret leaves the store.
async fn register_client(
    State(state): State<AdminState>,
    body: Result<axum::Json<RegisterClientRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let axum::Json(body) = match body {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.body_text()),
    };

    let name = body.name.trim();
    if name.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "name is required");
    }
    match Url::parse(&body.redirect_uri) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "redirect_uri must be an absolute http(s) URL",
            );
        }
    }

    let registration = ClientRegistration {
        name: name.to_string(),
        redirect_uri: body.redirect_uri,
        whitelisted: body.whitelisted,
    };
    let client = match state.store.register_client(registration).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "client registration failed");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "credential store unavailable");
        }
    };

    info!(
        client_id = %client.id,
        whitelisted = client.whitelisted,
        "client registered"
    );

    json_response(
        StatusCode::CREATED,
        serde_json::json!({
            "id": client.id,
            "secret": client.secret,
            "name": client.name,
            "redirect_uri": client.redirect_uri,
            "whitelisted": client.whitelisted,
        }),
    )
}

/// GET /admin/clients/{id}: client metadata. Never exposes the secret.
async fn get_client(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    match state.store.get_client(&id).await {
        Ok(Some(client)) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "id": client.id,
                "name": client.name,
                "redirect_uri": client.redirect_uri,
                "whitelisted": client.whitelisted,
            }),
        ),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "unknown client"),
        Err(e) => {
            error!(error = %e, "client lookup failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "credential store unavailable")
        }
    }
}

/// GET /admin/tokens/{id}
async fn get_token(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    match state.store.get_token(&id).await {
        Ok(Some(token)) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "client_id": token.client_id,
                "user_id": token.user_id,
                "type": token.token_type,
                "scope": token.scope,
            }),
        ),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "unknown token"),
        Err(e) => {
            error!(error = %e, "token lookup failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "credential store unavailable")
        }
    }
}
