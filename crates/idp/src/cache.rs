//! Token context cache
//!
//! Persists the most recently obtained [`Context`] per client id to a
//! local TOML file, so repeated invocations reuse a still-valid token
//! instead of re-authenticating every time. Caching is a pure
//! optimization: corruption is never surfaced to callers. An entry that
//! fails to decode is evicted and reported as a miss, and an unreadable
//! file opens as an empty cache.
//!
//! The cache performs no expiry check of its own; a stale token is
//! discovered when the wrapped service answers 401, which routes through
//! the re-authentication handler.
//!
//! All writes use atomic temp-file + rename to prevent corruption on
//! crash. A tokio Mutex serializes concurrent access.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Error, Result};

/// Thread-safe token cache backed by one TOML file.
pub struct TokenCache {
    path: PathBuf,
    state: Mutex<toml::Table>,
}

impl TokenCache {
    /// Open the cache file at the given path.
    ///
    /// Never fails: a missing, unreadable or unparsable file yields an
    /// empty cache, since the worst case is one extra authentication.
    pub async fn open(path: PathBuf) -> Self {
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match contents.parse::<toml::Table>() {
                Ok(table) => {
                    debug!(path = %path.display(), entries = table.len(), "loaded token cache");
                    table
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "token cache unparsable, starting empty");
                    toml::Table::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "token cache unreadable, starting empty");
                toml::Table::new()
            }
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Look up the cached context for a client id.
    ///
    /// An entry that no longer decodes as a [`Context`] is evicted and
    /// reported as a miss; a later `get` for the same id also misses.
    pub async fn get(&self, client_id: &str) -> Option<Context> {
        let mut state = self.state.lock().await;
        let value = state.get(client_id)?.clone();
        match value.try_into::<Context>() {
            Ok(context) => Some(context),
            Err(e) => {
                warn!(client_id, error = %e, "evicting corrupt token cache entry");
                state.remove(client_id);
                if let Err(e) = write_atomic(&self.path, &state).await {
                    warn!(path = %self.path.display(), error = %e, "failed to persist token cache after eviction");
                }
                None
            }
        }
    }

    /// Store the context for a client id, replacing any prior entry.
    ///
    /// Keys that look like credential material are rejected outright, so
    /// a confused caller can never persist a password under the guise of
    /// a client id.
    pub async fn set(&self, client_id: &str, context: &Context) -> Result<()> {
        let lowered = client_id.to_lowercase();
        if lowered == "password" || lowered == "pass" || lowered == "user" {
            return Err(Error::Cache(format!(
                "refusing to cache under credential-like key {client_id:?}"
            )));
        }

        let value = toml::Value::try_from(context)
            .map_err(|e| Error::Cache(format!("serializing token context: {e}")))?;

        let mut state = self.state.lock().await;
        state.insert(client_id.to_owned(), value);
        write_atomic(&self.path, &state).await
    }
}

/// Write the cache table to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 since the file contains access tokens.
/// The temp name carries the pid plus a process-wide sequence number, so
/// two caches in the same process sharing a directory never race on it.
async fn write_atomic(path: &Path, data: &toml::Table) -> Result<()> {
    static NEXT_TMP: AtomicU64 = AtomicU64::new(0);

    let rendered = toml::to_string_pretty(data)
        .map_err(|e| Error::Cache(format!("serializing token cache: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Cache("token cache path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(
        ".tokens.tmp.{}.{}",
        std::process::id(),
        NEXT_TMP.fetch_add(1, Ordering::Relaxed)
    ));

    tokio::fs::write(&tmp_path, rendered.as_bytes())
        .await
        .map_err(|e| Error::Cache(format!("writing temp token cache file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Cache(format!("setting token cache permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Cache(format!("renaming temp token cache file: {e}")))?;

    debug!(path = %path.display(), "persisted token cache");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context(suffix: &str) -> Context {
        Context {
            token_type: "Bearer".into(),
            access_token: format!("at_{suffix}"),
            expires_in: 3600,
            scope: "openid".into(),
            id_token: None,
            refresh_token: Some(format!("rt_{suffix}")),
            issued_at: Some(1_700_000_000),
        }
    }

    #[tokio::test]
    async fn roundtrip_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.toml");

        let cache = TokenCache::open(path.clone()).await;
        cache.set("cid-1", &sample_context("1")).await.unwrap();

        let cache = TokenCache::open(path).await;
        let context = cache.get("cid-1").await.unwrap();
        assert_eq!(context.access_token, "at_1");
        assert_eq!(context.refresh_token.as_deref(), Some("rt_1"));
        // issuance time is not persisted
        assert!(context.issued_at.is_none());
    }

    #[tokio::test]
    async fn miss_on_unknown_client() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::open(dir.path().join("tokens.toml")).await;
        assert!(cache.get("cid-unknown").await.is_none());
    }

    #[tokio::test]
    async fn corrupt_entry_is_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.toml");
        tokio::fs::write(
            &path,
            concat!(
                "[cid-bad]\n",
                "token_type = \"Bearer\"\n",
                "access_token = \"AT\"\n",
                "expires_in = \"soon\"\n",
                "\n",
                "[cid-good]\n",
                "token_type = \"Bearer\"\n",
                "access_token = \"AT2\"\n",
                "expires_in = 60\n",
            ),
        )
        .await
        .unwrap();

        let cache = TokenCache::open(path.clone()).await;
        assert!(cache.get("cid-bad").await.is_none());
        // second lookup also misses, the entry is gone
        assert!(cache.get("cid-bad").await.is_none());
        // one corrupt entry does not poison its neighbors
        assert_eq!(cache.get("cid-good").await.unwrap().access_token, "AT2");

        // eviction was persisted
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!contents.contains("cid-bad"));
        assert!(contents.contains("cid-good"));
    }

    #[tokio::test]
    async fn garbage_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.toml");
        tokio::fs::write(&path, "not { valid toml").await.unwrap();

        let cache = TokenCache::open(path).await;
        assert!(cache.get("cid-1").await.is_none());
        cache.set("cid-1", &sample_context("1")).await.unwrap();
        assert!(cache.get("cid-1").await.is_some());
    }

    #[tokio::test]
    async fn credential_like_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.toml");
        let cache = TokenCache::open(path.clone()).await;

        for key in ["password", "PASSWORD", "pass", "user", "User"] {
            let err = cache.set(key, &sample_context("x")).await.unwrap_err();
            assert!(matches!(err, Error::Cache(_)), "key {key} must be rejected");
        }
        assert!(!path.exists(), "rejected sets must not touch the file");

        // a key merely containing the word is fine
        cache.set("password-service", &sample_context("ok")).await.unwrap();
    }

    #[tokio::test]
    async fn sibling_caches_in_one_directory_dont_clobber() {
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("tokens-a.toml");
        let path_b = dir.path().join("tokens-b.toml");

        let cache_a = Arc::new(TokenCache::open(path_a.clone()).await);
        let cache_b = Arc::new(TokenCache::open(path_b.clone()).await);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let a = Arc::clone(&cache_a);
            let b = Arc::clone(&cache_b);
            tasks.spawn(async move {
                a.set(&format!("cid-a{i}"), &sample_context(&format!("a{i}")))
                    .await
                    .unwrap();
                b.set(&format!("cid-b{i}"), &sample_context(&format!("b{i}")))
                    .await
                    .unwrap();
            });
        }
        while let Some(task) = tasks.join_next().await {
            task.unwrap();
        }

        // both files reopen intact with all their own entries
        let cache_a = TokenCache::open(path_a).await;
        let cache_b = TokenCache::open(path_b).await;
        for i in 0..20 {
            assert_eq!(
                cache_a.get(&format!("cid-a{i}")).await.unwrap().access_token,
                format!("at_a{i}")
            );
            assert_eq!(
                cache_b.get(&format!("cid-b{i}")).await.unwrap().access_token,
                format!("at_b{i}")
            );
            assert!(cache_a.get(&format!("cid-b{i}")).await.is_none());
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cache_file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.toml");
        let cache = TokenCache::open(path.clone()).await;
        cache.set("cid-1", &sample_context("1")).await.unwrap();

        let mode = tokio::fs::metadata(&path)
            .await
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600, "token cache must be 0600, got {mode:o}");
    }
}
