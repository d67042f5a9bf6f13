//! Credential store for the OAuth authorization-code grant
//!
//! Owns the three collections the protocol runs on: registered clients,
//! outstanding authorization codes, and issued access tokens. Handlers talk to
//! the store only through the [`CredentialStore`] trait so the backend can be
//! swapped without touching protocol logic.
//!
//! Grant flow through the store:
//! 1. Operator calls `register_client()` and hands the returned secret to the client
//! 2. Authorization endpoint calls `get_client()` then `issue_code()`
//! 3. Token endpoint calls `get_client()`, `get_code()`, then `redeem_code()`
//!
//! `redeem_code()` deletes the code and inserts the token as one transition.
//! Of several concurrent redemptions of one code, exactly one gets the token;
//! the rest get `Ok(None)`.

pub mod constants;
pub mod error;
pub mod file;
pub mod memory;
pub mod models;
pub mod uid;

pub use constants::*;
pub use error::{Error, Result};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use models::{AuthorizationCode, Client, ClientRegistration, Token, TokenType};

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Storage capability set shared by every backend.
///
/// Lookups report a missing record as `Ok(None)`; `Err` always means the
/// backend itself failed.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn CredentialStore>`).
pub trait CredentialStore: Send + Sync {
    /// Backend name for logging and health reporting (e.g. "memory", "file")
    fn kind(&self) -> &str;

    /// Create a client with a fresh id and secret. The returned record is the
    /// only place the plaintext secret is handed out.
    fn register_client(&self, registration: ClientRegistration) -> StoreFuture<'_, Client>;

    fn get_client<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Client>>;

    /// Persist a new authorization code and return its id.
    fn issue_code<'a>(
        &'a self,
        client_id: &'a str,
        user_id: &'a str,
        scope: Option<&'a str>,
    ) -> StoreFuture<'a, String>;

    /// Look up a live code. Expired codes are reported as absent.
    fn get_code<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<AuthorizationCode>>;

    /// Consume `code` and mint a bearer token carrying its grant.
    ///
    /// Returns `Ok(None)` when the code is no longer live: already redeemed,
    /// expired, or never issued.
    fn redeem_code<'a>(&'a self, code: &'a AuthorizationCode) -> StoreFuture<'a, Option<Token>>;

    fn get_token<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Token>>;
}

/// Behaviour every backend must share. Each backend's test module runs these
/// against a fresh instance.
#[cfg(test)]
pub(crate) mod contract {
    use std::sync::Arc;

    use super::*;

    pub fn mocha() -> ClientRegistration {
        ClientRegistration {
            name: "Mocha".into(),
            redirect_uri: "https://example.domain/return?foo=bar".into(),
            whitelisted: true,
        }
    }

    pub async fn register_assigns_credentials(store: &dyn CredentialStore) {
        let client = store.register_client(mocha()).await.unwrap();
        assert_eq!(client.id.len(), CLIENT_ID_LEN);
        assert_eq!(client.secret.len(), CLIENT_SECRET_LEN);
        assert_eq!(client.name, "Mocha");
        assert_eq!(client.redirect_uri, "https://example.domain/return?foo=bar");
        assert!(client.whitelisted);

        let fetched = store.get_client(&client.id).await.unwrap().unwrap();
        assert_eq!(fetched, client);

        let other = store.register_client(mocha()).await.unwrap();
        assert_ne!(other.id, client.id);
        assert_ne!(other.secret, client.secret);
    }

    pub async fn unknown_ids_are_absent(store: &dyn CredentialStore) {
        assert!(store.get_client("nope").await.unwrap().is_none());
        assert!(store.get_code("nope").await.unwrap().is_none());
        assert!(store.get_token("nope").await.unwrap().is_none());
    }

    pub async fn issue_then_get_code(store: &dyn CredentialStore) {
        let client = store.register_client(mocha()).await.unwrap();
        let code_id = store
            .issue_code(&client.id, "user-1", Some("profile"))
            .await
            .unwrap();
        assert_eq!(code_id.len(), CODE_LEN);

        let code = store.get_code(&code_id).await.unwrap().unwrap();
        assert_eq!(code.id, code_id);
        assert_eq!(code.client_id, client.id);
        assert_eq!(code.user_id, "user-1");
        assert_eq!(code.scope.as_deref(), Some("profile"));
    }

    pub async fn redeem_is_single_use(store: &dyn CredentialStore) {
        let client = store.register_client(mocha()).await.unwrap();
        let code_id = store.issue_code(&client.id, "user-1", None).await.unwrap();
        let code = store.get_code(&code_id).await.unwrap().unwrap();

        let token = store.redeem_code(&code).await.unwrap().unwrap();
        assert_eq!(token.id.len(), TOKEN_LEN);
        assert_eq!(token.client_id, client.id);
        assert_eq!(token.user_id, "user-1");
        assert_eq!(token.token_type, TokenType::Bearer);
        assert!(token.scope.is_none());

        assert!(
            store.get_code(&code_id).await.unwrap().is_none(),
            "redeemed code must be gone"
        );
        assert!(
            store.redeem_code(&code).await.unwrap().is_none(),
            "second redemption must not mint a token"
        );
        assert_eq!(store.get_token(&token.id).await.unwrap(), Some(token));
    }

    pub async fn expired_code_is_dead(store: &dyn CredentialStore) {
        let client = store.register_client(mocha()).await.unwrap();
        let code_id = store.issue_code(&client.id, "user-1", None).await.unwrap();
        assert!(store.get_code(&code_id).await.unwrap().is_none());

        let stale = AuthorizationCode {
            id: code_id,
            client_id: client.id,
            user_id: "user-1".into(),
            scope: None,
            expires_at: 0,
        };
        assert!(store.redeem_code(&stale).await.unwrap().is_none());
    }

    pub async fn concurrent_redemption_mints_once(store: Arc<dyn CredentialStore>) {
        let client = store.register_client(mocha()).await.unwrap();
        let code_id = store.issue_code(&client.id, "user-1", None).await.unwrap();
        let code = store.get_code(&code_id).await.unwrap().unwrap();

        let mut handles = vec![];
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                store.redeem_code(&code).await.unwrap()
            }));
        }

        let mut minted = vec![];
        for handle in handles {
            if let Some(token) = handle.await.unwrap() {
                minted.push(token);
            }
        }
        assert_eq!(minted.len(), 1, "exactly one redemption may succeed");
        assert!(store.get_code(&code_id).await.unwrap().is_none());
    }
}
