//! Records owned by the credential store
//!
//! Stores hand out clones of these records; callers never hold a reference
//! into store state.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A registered client application.
///
/// `id` and `secret` are generated once at registration and never change.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub secret: String,
    pub name: String,
    pub redirect_uri: String,
    /// Pre-approved to skip end-user consent. Other clients are unsupported.
    pub whitelisted: bool,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("secret", &"[REDACTED]")
            .field("name", &self.name)
            .field("redirect_uri", &self.redirect_uri)
            .field("whitelisted", &self.whitelisted)
            .finish()
    }
}

/// Operator input for registering a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub name: String,
    pub redirect_uri: String,
    pub whitelisted: bool,
}

/// An outstanding, single-use authorization code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub id: String,
    pub client_id: String,
    pub user_id: String,
    pub scope: Option<String>,
    /// Unix timestamp in milliseconds after which the code is dead
    pub expires_at: u64,
}

impl AuthorizationCode {
    pub(crate) fn new(
        id: String,
        client_id: &str,
        user_id: &str,
        scope: Option<&str>,
        ttl: Duration,
    ) -> Self {
        let ttl_millis = to_millis(ttl);
        Self {
            id,
            client_id: client_id.to_owned(),
            user_id: user_id.to_owned(),
            scope: scope.map(str::to_owned),
            expires_at: now_millis().saturating_add(ttl_millis),
        }
    }

    pub fn is_expired_at(&self, now_millis: u64) -> bool {
        now_millis >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }
}

/// Access token type. Only bearer tokens exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Bearer,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Bearer => "bearer",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issued access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub client_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub scope: Option<String>,
}

impl Token {
    /// Bearer token carrying the grant recorded on `code`.
    pub(crate) fn from_code(id: String, code: &AuthorizationCode) -> Self {
        Self {
            id,
            client_id: code.client_id.clone(),
            user_id: code.user_id.clone(),
            token_type: TokenType::Bearer,
            scope: code.scope.clone(),
        }
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    to_millis(SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default())
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
fn to_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
