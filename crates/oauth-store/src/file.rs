//! Durable credential store backed by a JSON file
//!
//! Keeps clients, codes and tokens in one JSON document. All writes use
//! atomic temp-file + rename to prevent corruption on crash. A writer mutex
//! serializes mutations; each mutation is applied to a copy of the state,
//! persisted, and only then swapped in, so a failed write changes nothing.
//! Reads take the state `RwLock` only, so they never wait on disk I/O.
//!
//! Mutations run on a spawned task. If the request that started one is
//! cancelled, the task still finishes and memory never disagrees with disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{AuthorizationCode, Client, ClientRegistration, Token, now_millis};
use crate::uid::{self, unique_id};
use crate::{CredentialStore, StoreFuture};

/// On-disk document layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    clients: HashMap<String, Client>,
    #[serde(default)]
    codes: HashMap<String, AuthorizationCode>,
    #[serde(default)]
    tokens: HashMap<String, Token>,
}

struct Inner {
    path: PathBuf,
    code_ttl: Duration,
    state: RwLock<Snapshot>,
    /// Held for the whole clone-mutate-persist-swap of one commit
    writer: Mutex<()>,
}

/// File-backed store. Cheap to share: clones point at the same state.
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<Inner>,
}

impl FileStore {
    /// Open the store at `path`.
    ///
    /// If the file doesn't exist, creates it as an empty document (cold start
    /// with zero clients).
    pub async fn open(path: PathBuf, code_ttl: Duration) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading store file: {e}")))?;
            let snapshot: Snapshot = serde_json::from_str(&contents)
                .map_err(|e| Error::Serialization(format!("parsing store file: {e}")))?;
            info!(
                path = %path.display(),
                clients = snapshot.clients.len(),
                codes = snapshot.codes.len(),
                tokens = snapshot.tokens.len(),
                "loaded credential store"
            );
            snapshot
        } else {
            info!(path = %path.display(), "store file not found, starting empty");
            let snapshot = Snapshot::default();
            write_atomic(&path, &snapshot).await?;
            snapshot
        };

        Ok(Self {
            inner: Arc::new(Inner {
                path,
                code_ttl,
                state: RwLock::new(state),
                writer: Mutex::new(()),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Apply `mutate` to a copy of the state and persist it.
    ///
    /// `mutate` returns its output and whether it changed the copy; an
    /// unchanged copy skips the disk write.
    async fn commit<T, F>(&self, mutate: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Snapshot) -> Result<(T, bool)> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _writer = inner.writer.lock().await;
            let mut next = inner.state.read().await.clone();
            let (output, changed) = mutate(&mut next)?;
            if changed {
                write_atomic(&inner.path, &next).await?;
                *inner.state.write().await = next;
            }
            Ok(output)
        });
        task.await
            .map_err(|e| Error::Unavailable(format!("store task failed: {e}")))?
    }

    async fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> T {
        let state = self.inner.state.read().await;
        f(&state)
    }
}

impl CredentialStore for FileStore {
    fn kind(&self) -> &str {
        "file"
    }

    fn register_client(&self, registration: ClientRegistration) -> StoreFuture<'_, Client> {
        Box::pin(self.commit(move |state| {
            let client = Client {
                id: unique_id(&state.clients, "client", uid::new_client_id)?,
                secret: uid::new_client_secret(),
                name: registration.name,
                redirect_uri: registration.redirect_uri,
                whitelisted: registration.whitelisted,
            };
            state.clients.insert(client.id.clone(), client.clone());
            debug!(client_id = %client.id, "registered client");
            Ok((client, true))
        }))
    }

    fn get_client<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Client>> {
        Box::pin(async move { Ok(self.read(|state| state.clients.get(id).cloned()).await) })
    }

    fn issue_code<'a>(
        &'a self,
        client_id: &'a str,
        user_id: &'a str,
        scope: Option<&'a str>,
    ) -> StoreFuture<'a, String> {
        let client_id = client_id.to_owned();
        let user_id = user_id.to_owned();
        let scope = scope.map(str::to_owned);
        let ttl = self.inner.code_ttl;

        Box::pin(self.commit(move |state| {
            let now = now_millis();
            state.codes.retain(|_, code| !code.is_expired_at(now));

            let id = unique_id(&state.codes, "code", uid::new_code_id)?;
            let code = AuthorizationCode::new(id.clone(), &client_id, &user_id, scope.as_deref(), ttl);
            state.codes.insert(id.clone(), code);
            debug!(client_id = %client_id, "issued authorization code");
            Ok((id, true))
        }))
    }

    fn get_code<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<AuthorizationCode>> {
        Box::pin(async move {
            Ok(self
                .read(|state| state.codes.get(id).filter(|code| !code.is_expired()).cloned())
                .await)
        })
    }

    fn redeem_code<'a>(&'a self, code: &'a AuthorizationCode) -> StoreFuture<'a, Option<Token>> {
        let code_id = code.id.clone();

        Box::pin(self.commit(move |state| {
            let Some(stored) = state.codes.remove(&code_id) else {
                return Ok((None, false));
            };
            if stored.is_expired() {
                debug!(client_id = %stored.client_id, "refused expired authorization code");
                return Ok((None, true));
            }

            let token = Token::from_code(unique_id(&state.tokens, "token", uid::new_token_id)?, &stored);
            state.tokens.insert(token.id.clone(), token.clone());
            debug!(client_id = %token.client_id, "redeemed authorization code");
            Ok((Some(token), true))
        }))
    }

    fn get_token<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Token>> {
        Box::pin(async move { Ok(self.read(|state| state.tokens.get(id).cloned()).await) })
    }
}

/// Write the store document to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains client secrets and bearer tokens.
async fn write_atomic(path: &Path, data: &Snapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Serialization(format!("serializing store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("store path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Io("store path has no file name".into()))?
        .to_string_lossy();

    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp store file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting store file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp store file: {e}")))?;

    debug!(path = %path.display(), "persisted credential store");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_CODE_TTL;
    use crate::contract;

    async fn open_in(dir: &Path) -> FileStore {
        FileStore::open(dir.join("store.json"), DEFAULT_CODE_TTL)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_assigns_credentials() {
        let dir = tempfile::tempdir().unwrap();
        contract::register_assigns_credentials(&open_in(dir.path()).await).await;
    }

    #[tokio::test]
    async fn unknown_ids_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        contract::unknown_ids_are_absent(&open_in(dir.path()).await).await;
    }

    #[tokio::test]
    async fn issue_then_get_code() {
        let dir = tempfile::tempdir().unwrap();
        contract::issue_then_get_code(&open_in(dir.path()).await).await;
    }

    #[tokio::test]
    async fn redeem_is_single_use() {
        let dir = tempfile::tempdir().unwrap();
        contract::redeem_is_single_use(&open_in(dir.path()).await).await;
    }

    #[tokio::test]
    async fn expired_code_is_dead() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("store.json"), Duration::ZERO)
            .await
            .unwrap();
        contract::expired_code_is_dead(&store).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redemption_mints_once() {
        let dir = tempfile::tempdir().unwrap();
        contract::concurrent_redemption_mints_once(Arc::new(open_in(dir.path()).await)).await;
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        assert!(!path.exists());
        open_in(dir.path()).await;
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Snapshot = serde_json::from_str(&contents).unwrap();
        assert!(parsed.clients.is_empty());
        assert!(parsed.codes.is_empty());
        assert!(parsed.tokens.is_empty());
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = open_in(dir.path()).await;
        let client = store.register_client(contract::mocha()).await.unwrap();
        let pending = store.issue_code(&client.id, "user-1", Some("a,b")).await.unwrap();
        let redeemed = store.issue_code(&client.id, "user-2", None).await.unwrap();
        let code = store.get_code(&redeemed).await.unwrap().unwrap();
        let token = store.redeem_code(&code).await.unwrap().unwrap();
        drop(store);

        let reopened = open_in(dir.path()).await;
        assert_eq!(reopened.get_client(&client.id).await.unwrap(), Some(client));
        let code = reopened.get_code(&pending).await.unwrap().unwrap();
        assert_eq!(code.scope.as_deref(), Some("a,b"));
        assert!(reopened.get_code(&redeemed).await.unwrap().is_none());
        assert_eq!(reopened.get_token(&token.id).await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let result = FileStore::open(path, DEFAULT_CODE_TTL).await;
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn failed_write_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(dir.path()).await;
        let client = store.register_client(contract::mocha()).await.unwrap();
        let code_id = store.issue_code(&client.id, "user-1", None).await.unwrap();
        let code = store.get_code(&code_id).await.unwrap().unwrap();

        // Pull the directory out from under the store so every write fails
        std::fs::remove_dir_all(dir.path()).unwrap();

        let err = store.register_client(contract::mocha()).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got: {err:?}");
        assert_eq!(store.read(|state| state.clients.len()).await, 1);

        let err = store.redeem_code(&code).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got: {err:?}");
        assert_eq!(
            store.get_code(&code_id).await.unwrap(),
            Some(code),
            "a failed redemption must leave the code redeemable"
        );
        assert_eq!(store.read(|state| state.tokens.len()).await, 0);
    }

    #[tokio::test]
    async fn reads_do_not_wait_for_a_commit_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(dir.path()).await;
        let client = store.register_client(contract::mocha()).await.unwrap();

        // Stand in for a commit stuck in write_atomic
        let _writer = store.inner.writer.lock().await;

        let fetched = tokio::time::timeout(Duration::from_secs(1), store.get_client(&client.id))
            .await
            .expect("lookup blocked behind the writer")
            .unwrap();
        assert_eq!(fetched, Some(client));
        let missing = tokio::time::timeout(Duration::from_secs(1), store.get_code("nope"))
            .await
            .expect("lookup blocked behind the writer")
            .unwrap();
        assert!(missing.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = open_in(dir.path()).await;
        store.register_client(contract::mocha()).await.unwrap();

        let metadata = tokio::fs::metadata(store.path()).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "store file must be 0600, got {mode:o}");
    }
}
