//! Token endpoint
//!
//! `POST /oauth/token` authenticates the client by its shared secret and
//! trades a live authorization code for a bearer token. The body may be JSON
//! or `application/x-www-form-urlencoded`.

use std::time::Instant;

use axum::Json;
use axum::extract::{Form, FromRequest, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use common::constant_time_eq;
use oauth_store::{CredentialStore, TokenType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::AppState;
use crate::error::{OAuthError, required};
use crate::metrics;

#[derive(Debug, Default, Deserialize)]
pub struct TokenParams {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code: Option<String>,
}

impl<S> FromRequest<S> for TokenParams
where
    S: Send + Sync,
{
    type Rejection = OAuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            let Json(params) = Json::<TokenParams>::from_request(req, state)
                .await
                .map_err(|e| OAuthError::BadRequest(e.body_text()))?;
            Ok(params)
        } else {
            let Form(params) = Form::<TokenParams>::from_request(req, state)
                .await
                .map_err(|e| OAuthError::BadRequest(e.body_text()))?;
            Ok(params)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: TokenType,
    /// Always empty; scope is stored on the token but not echoed back
    pub scopes: Vec<String>,
}

pub(crate) async fn token_handler(
    State(state): State<AppState>,
    params: Result<TokenParams, OAuthError>,
) -> Response {
    let started = Instant::now();
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());

    let result = match params {
        Ok(params) => exchange(state.store.as_ref(), params, &request_id).await,
        Err(e) => Err(e),
    };
    let response = match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => {
            debug!(request_id = %request_id, error = %e, "token request rejected");
            e.into_response()
        }
    };

    metrics::record_request(
        "token",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn exchange(
    store: &dyn CredentialStore,
    params: TokenParams,
    request_id: &str,
) -> Result<TokenResponse, OAuthError> {
    let client_id = required(params.client_id, "client_id")?;
    let client_secret = required(params.client_secret, "client_secret")?;
    let code_id = required(params.code, "code")?;

    let client = store
        .get_client(&client_id)
        .await?
        .ok_or(OAuthError::NotFound)?;
    if !client.whitelisted {
        return Err(OAuthError::NotImplemented);
    }
    if !constant_time_eq(&client.secret, &client_secret) {
        return Err(OAuthError::BadRequest("invalid client credentials".into()));
    }

    // A code bound to another client is indistinguishable from an unknown one
    let code = store
        .get_code(&code_id)
        .await?
        .filter(|code| code.client_id == client.id)
        .ok_or_else(|| OAuthError::BadRequest("invalid code".into()))?;

    // None here means a concurrent exchange won the code
    let token = store
        .redeem_code(&code)
        .await?
        .ok_or_else(|| OAuthError::BadRequest("invalid code".into()))?;

    metrics::record_token_issued();
    info!(client_id = %client.id, "access token issued");

    Ok(TokenResponse {
        access_token: token.id,
        token_type: token.token_type,
        scopes: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    async fn extract(content_type: Option<&str>, body: &str) -> Result<TokenParams, OAuthError> {
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri("/oauth/token");
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        let req = builder.body(Body::from(body.to_string())).unwrap();
        TokenParams::from_request(req, &()).await
    }

    #[tokio::test]
    async fn json_body_is_accepted() {
        let params = extract(
            Some("application/json"),
            r#"{"client_id":"a","client_secret":"b","code":"c"}"#,
        )
        .await
        .unwrap();
        assert_eq!(params.client_id.as_deref(), Some("a"));
        assert_eq!(params.client_secret.as_deref(), Some("b"));
        assert_eq!(params.code.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn json_with_charset_is_accepted() {
        let params = extract(Some("application/json; charset=utf-8"), r#"{"code":"c"}"#)
            .await
            .unwrap();
        assert_eq!(params.code.as_deref(), Some("c"));
        assert!(params.client_id.is_none());
    }

    #[tokio::test]
    async fn form_body_is_accepted() {
        let params = extract(
            Some("application/x-www-form-urlencoded"),
            "client_id=a&client_secret=b&code=c",
        )
        .await
        .unwrap();
        assert_eq!(params.client_id.as_deref(), Some("a"));
        assert_eq!(params.code.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let err = extract(Some("application/json"), "{not json").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unsupported_content_type_is_bad_request() {
        let err = extract(Some("text/plain"), "code=c").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn response_shape() {
        let body = serde_json::to_value(TokenResponse {
            access_token: "ab".repeat(32),
            token_type: TokenType::Bearer,
            scopes: Vec::new(),
        })
        .unwrap();
        assert_eq!(body["token_type"], "bearer");
        assert_eq!(body["scopes"], serde_json::json!([]));
        assert_eq!(body["access_token"].as_str().unwrap().len(), 64);
    }
}
