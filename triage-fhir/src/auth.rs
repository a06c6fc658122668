//! OAuth2 authorization-code session state and its persistence.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use triage_core::SourceError;

/// Storage key of the serialized [`AuthToken`].
pub const TOKEN_STORAGE_KEY: &str = "epic_auth_token";
/// Storage key of the pending anti-CSRF state value.
pub const STATE_STORAGE_KEY: &str = "epic_auth_state";

/// Tokens are refreshed once they are this close to expiry.
pub const REFRESH_MARGIN_MS: i64 = 300_000;

/// Token endpoint response, stamped with the time it was received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub received_at: i64,
}

impl AuthToken {
    pub fn expires_at_millis(&self) -> i64 {
        self.received_at + self.expires_in * 1000
    }

    pub fn needs_refresh(&self, now_millis: i64) -> bool {
        now_millis > self.expires_at_millis() - REFRESH_MARGIN_MS
    }
}

/// Where the OAuth session currently stands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    AuthorizationRequested,
    TokenExchangePending,
    Authenticated,
    TokenNearExpiry,
    RefreshPending,
    RefreshFailed,
}

/// Redirect the user agent must follow to authorize; the UI performs the navigation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizationRedirect {
    pub url: String,
    pub state: String,
}

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl CallbackParams {
    /// Read `code`, `state` and `error` from a full callback URL.
    pub fn from_url(url: &str) -> Result<Self, SourceError> {
        let url = Url::parse(url)
            .map_err(|err| SourceError::Auth(format!("invalid callback URL: {err}")))?;
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let slot = match &*key {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        Ok(params)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("token store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("token store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Client-local key/value storage for the OAuth session.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still a valid map.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// JSON file holding every key, so the session survives restarts.
///
/// Reads and writes are not coordinated across processes: two processes
/// refreshing at once will both write and the last one wins.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(received_at: i64, expires_in: i64) -> AuthToken {
        AuthToken {
            access_token: "a".to_string(),
            token_type: Some("Bearer".to_string()),
            expires_in,
            refresh_token: None,
            scope: None,
            received_at,
        }
    }

    #[test]
    fn refresh_window_starts_five_minutes_before_expiry() {
        let token = token(1_000_000, 3600);
        let expires_at = 1_000_000 + 3_600_000;
        assert!(!token.needs_refresh(expires_at - REFRESH_MARGIN_MS));
        assert!(token.needs_refresh(expires_at - REFRESH_MARGIN_MS + 1));
    }

    #[test]
    fn token_response_without_optional_fields() {
        let token: AuthToken =
            serde_json::from_str(r#"{ "access_token": "x", "expires_in": 60, "patient": "p" }"#)
                .unwrap();
        assert_eq!(token.expires_in, 60);
        assert_eq!(token.refresh_token, None);
    }

    #[test]
    fn callback_params_from_url() {
        let params =
            CallbackParams::from_url("http://localhost:8080/epic-callback?code=c1&state=s%201")
                .unwrap();
        assert_eq!(params.code.as_deref(), Some("c1"));
        assert_eq!(params.state.as_deref(), Some("s 1"));
        assert_eq!(params.error, None);
    }

    #[test]
    fn file_store_persists_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session").join("auth.json");

        let store = FileTokenStore::new(&path);
        store.set(TOKEN_STORAGE_KEY, "{\"access_token\":\"t\"}").unwrap();
        store.set(STATE_STORAGE_KEY, "xyz").unwrap();

        let reopened = FileTokenStore::new(&path);
        assert_eq!(reopened.get(STATE_STORAGE_KEY).unwrap().as_deref(), Some("xyz"));
        reopened.remove(STATE_STORAGE_KEY).unwrap();
        assert_eq!(store.get(STATE_STORAGE_KEY).unwrap(), None);
        assert!(store.get(TOKEN_STORAGE_KEY).unwrap().is_some());
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("none.json"));
        assert_eq!(store.get(TOKEN_STORAGE_KEY).unwrap(), None);
        store.remove(TOKEN_STORAGE_KEY).unwrap();
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryTokenStore::new();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }
}
