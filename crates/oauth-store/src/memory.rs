//! In-memory credential store
//!
//! Process-lifetime storage for development and tests. Each collection sits
//! behind its own `RwLock` so lookups run concurrently and writers only
//! contend within one collection. Redemption takes the code lock and then the
//! token lock; nothing takes them in the opposite order.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use crate::constants::DEFAULT_CODE_TTL;
use crate::models::{AuthorizationCode, Client, ClientRegistration, Token, now_millis};
use crate::uid::{self, unique_id};
use crate::{CredentialStore, StoreFuture};

/// Ephemeral store; a fresh instance starts empty.
pub struct MemoryStore {
    clients: RwLock<HashMap<String, Client>>,
    codes: RwLock<HashMap<String, AuthorizationCode>>,
    tokens: RwLock<HashMap<String, Token>>,
    code_ttl: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_code_ttl(DEFAULT_CODE_TTL)
    }

    pub fn with_code_ttl(code_ttl: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            codes: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            code_ttl,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for MemoryStore {
    fn kind(&self) -> &str {
        "memory"
    }

    fn register_client(&self, registration: ClientRegistration) -> StoreFuture<'_, Client> {
        Box::pin(async move {
            let mut clients = self.clients.write().await;
            let client = Client {
                id: unique_id(&clients, "client", uid::new_client_id)?,
                secret: uid::new_client_secret(),
                name: registration.name,
                redirect_uri: registration.redirect_uri,
                whitelisted: registration.whitelisted,
            };
            clients.insert(client.id.clone(), client.clone());
            debug!(client_id = %client.id, "registered client");
            Ok(client)
        })
    }

    fn get_client<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Client>> {
        Box::pin(async move { Ok(self.clients.read().await.get(id).cloned()) })
    }

    fn issue_code<'a>(
        &'a self,
        client_id: &'a str,
        user_id: &'a str,
        scope: Option<&'a str>,
    ) -> StoreFuture<'a, String> {
        Box::pin(async move {
            let mut codes = self.codes.write().await;
            // Lazy cleanup: drop dead codes while holding the lock
            let now = now_millis();
            codes.retain(|_, code| !code.is_expired_at(now));

            let id = unique_id(&codes, "code", uid::new_code_id)?;
            let code = AuthorizationCode::new(id.clone(), client_id, user_id, scope, self.code_ttl);
            codes.insert(id.clone(), code);
            debug!(client_id = %client_id, "issued authorization code");
            Ok(id)
        })
    }

    fn get_code<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<AuthorizationCode>> {
        Box::pin(async move {
            let codes = self.codes.read().await;
            Ok(codes.get(id).filter(|code| !code.is_expired()).cloned())
        })
    }

    fn redeem_code<'a>(&'a self, code: &'a AuthorizationCode) -> StoreFuture<'a, Option<Token>> {
        Box::pin(async move {
            // Both guards are held before anything changes, so dropping this
            // future can never leave a code deleted without its token.
            let mut codes = self.codes.write().await;
            let mut tokens = self.tokens.write().await;

            let Some(stored) = codes.remove(&code.id) else {
                return Ok(None);
            };
            if stored.is_expired() {
                debug!(client_id = %stored.client_id, "refused expired authorization code");
                return Ok(None);
            }

            let token_id = match unique_id(&tokens, "token", uid::new_token_id) {
                Ok(id) => id,
                Err(e) => {
                    // Failed exchange leaves the code redeemable
                    codes.insert(stored.id.clone(), stored);
                    return Err(e);
                }
            };
            let token = Token::from_code(token_id, &stored);
            tokens.insert(token.id.clone(), token.clone());
            debug!(client_id = %token.client_id, "redeemed authorization code");
            Ok(Some(token))
        })
    }

    fn get_token<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Token>> {
        Box::pin(async move { Ok(self.tokens.read().await.get(id).cloned()) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::contract;

    #[tokio::test]
    async fn register_assigns_credentials() {
        contract::register_assigns_credentials(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn unknown_ids_are_absent() {
        contract::unknown_ids_are_absent(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn issue_then_get_code() {
        contract::issue_then_get_code(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn redeem_is_single_use() {
        contract::redeem_is_single_use(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn expired_code_is_dead() {
        contract::expired_code_is_dead(&MemoryStore::with_code_ttl(Duration::ZERO)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redemption_mints_once() {
        contract::concurrent_redemption_mints_once(Arc::new(MemoryStore::new())).await;
    }

    #[tokio::test]
    async fn issuing_purges_expired_codes() {
        let store = MemoryStore::with_code_ttl(Duration::ZERO);
        let client = store.register_client(contract::mocha()).await.unwrap();
        for _ in 0..5 {
            store.issue_code(&client.id, "user-1", None).await.unwrap();
        }
        // Every earlier code was dead when the next one was issued
        assert_eq!(store.codes.read().await.len(), 1);
    }

    #[tokio::test]
    async fn stores_are_isolated() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let client = a.register_client(contract::mocha()).await.unwrap();
        assert!(b.get_client(&client.id).await.unwrap().is_none());
    }
}
