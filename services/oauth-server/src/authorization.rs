//! Authorization endpoint
//!
//! `GET /oauth/authorization` validates the request against the registered
//! client, issues a single-use code and redirects back to the client with
//! `code` (and `state`, when supplied) appended to the registered URI.

use std::time::Instant;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use oauth_store::CredentialStore;
use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;

use crate::AppState;
use crate::error::{OAuthError, optional, required};
use crate::metrics;

/// Query string of an authorization request. Every field is optional at the
/// extractor level so missing parameters surface as a 400 with a message.
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizationParams {
    pub client_id: Option<String>,
    /// End-user identity asserted by the trusted front end
    pub precode: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
}

pub(crate) async fn authorization_handler(
    State(state): State<AppState>,
    query: Result<Query<AuthorizationParams>, QueryRejection>,
) -> Response {
    let started = Instant::now();
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());

    let result = match query {
        Ok(Query(params)) => authorize(state.store.as_ref(), params, &request_id).await,
        Err(rejection) => Err(OAuthError::BadRequest(rejection.body_text())),
    };
    let response = result.unwrap_or_else(|e| {
        debug!(request_id = %request_id, error = %e, "authorization request rejected");
        e.into_response()
    });

    metrics::record_request(
        "authorization",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn authorize(
    store: &dyn CredentialStore,
    params: AuthorizationParams,
    request_id: &str,
) -> Result<Response, OAuthError> {
    let client_id = required(params.client_id, "client_id")?;
    let user_id = required(params.precode, "precode")?;
    let scope = optional(params.scope, "scope")?;
    let state = optional(params.state, "state")?;
    let redirect_uri = optional(params.redirect_uri, "redirect_uri")?;

    let client = store
        .get_client(&client_id)
        .await?
        .ok_or(OAuthError::NotFound)?;
    if !client.whitelisted {
        return Err(OAuthError::NotImplemented);
    }

    let redirect_uri = redirect_uri.unwrap_or_else(|| client.redirect_uri.clone());
    if redirect_uri != client.redirect_uri {
        return Err(OAuthError::BadRequest("invalid_request".into()));
    }
    // Parse before issuing so a malformed registration never strands a code
    let mut target =
        Url::parse(&redirect_uri).map_err(|_| OAuthError::BadRequest("invalid_request".into()))?;

    let code = store
        .issue_code(&client.id, &user_id, scope.as_deref())
        .await?;
    append_grant(&mut target, &code, state.as_deref());

    metrics::record_code_issued();
    info!(client_id = %client.id, "authorization code issued");

    Ok((StatusCode::FOUND, [(header::LOCATION, target.as_str())]).into_response())
}

/// Set `code` and, when supplied, `state` on the redirect URI.
///
/// Other query pairs keep their order. A `code` already present in the
/// registered URI is replaced, as is `state` when a new one is supplied.
fn append_grant(target: &mut Url, code: &str, state: Option<&str>) {
    let kept: Vec<(String, String)> = target
        .query_pairs()
        .filter(|(k, _)| k != "code" && !(state.is_some() && k == "state"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut pairs = target.query_pairs_mut();
    pairs.clear().extend_pairs(kept);
    pairs.append_pair("code", code);
    if let Some(state) = state {
        pairs.append_pair("state", state);
    }
}
