//! Per-client sessions keyed by a cookie.
//!
//! A session is a JSON object stored in a [`CacheStore`] under
//! `session:<id>`, where the id is a random UUID carried in the session cookie.
//! Handlers reach it through [`Context::session`](crate::context::Context::session),
//! which loads it on first use; the dispatcher writes it back once the chain
//! completes and sends the cookie when the client has not seen the id yet.

use std::{sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::cache::{CacheError, CacheStore};
use crate::config::SessionConfig;
use crate::services::ServiceError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("session store failed: {0}")]
    Store(#[from] CacheError),

    #[error("session value could not be encoded or decoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// The values stored for one client.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    values: Map<String, Value>,
    is_new: bool,
    dirty: bool,
}

impl Session {
    fn fresh() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            values: Map::new(),
            is_new: true,
            dirty: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the client has not been given this session's id yet.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// The value under `key`, deserialized into `T`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Encoding`] when the stored value does not fit `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        self.values
            .get(key)
            .map(|value| T::deserialize(value))
            .transpose()
            .map_err(SessionError::from)
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// [`SessionError::Encoding`] when `value` does not serialize to JSON.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Serialize,
    ) -> Result<(), SessionError> {
        let value = serde_json::to_value(value)?;
        self.values.insert(key.into(), value);
        self.dirty = true;
        Ok(())
    }

    /// Removes `key` and returns its value.
    pub fn pull(&mut self, key: &str) -> Option<Value> {
        let value = self.values.remove(key);
        self.dirty |= value.is_some();
        value
    }

    pub fn delete(&mut self, key: &str) {
        self.pull(key);
    }

    pub fn clear(&mut self) {
        if !self.values.is_empty() {
            self.values.clear();
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Loads and saves sessions for the app.
pub struct SessionManager {
    store: Arc<dyn CacheStore>,
    cookie_name: String,
    lifetime: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn CacheStore>, config: &SessionConfig) -> Self {
        Self {
            store,
            cookie_name: config.cookie_name.clone(),
            lifetime: config.lifetime,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    fn key(id: &str) -> String {
        format!("session:{id}")
    }

    /// The session named by `cookie`, or a new empty one when the cookie is
    /// missing, malformed or names an expired session.
    ///
    /// # Errors
    ///
    /// [`SessionError::Store`] or [`SessionError::Encoding`] for a stored
    /// session that cannot be read back.
    pub async fn load(&self, cookie: Option<&str>) -> Result<Session, SessionError> {
        let Some(id) = cookie.filter(|id| Uuid::parse_str(id).is_ok()) else {
            return Ok(Session::fresh());
        };
        match self.store.get(&Self::key(id)).await? {
            Some(raw) => Ok(Session {
                id: id.to_owned(),
                values: serde_json::from_str(&raw)?,
                is_new: false,
                dirty: false,
            }),
            None => {
                tracing::debug!("session cookie names no stored session");
                Ok(Session::fresh())
            }
        }
    }

    /// Writes `session` back if it changed.
    ///
    /// Returns the `Set-Cookie` value to send: the id for a session the
    /// client has not seen yet, or an expired cookie for a session that
    /// became empty.
    ///
    /// # Errors
    ///
    /// [`SessionError::Store`] when the store rejects the write.
    pub async fn save(&self, session: &Session) -> Result<Option<String>, SessionError> {
        if !session.dirty {
            return Ok(None);
        }
        let key = Self::key(&session.id);

        if session.values.is_empty() {
            self.store.delete(&key).await?;
            return Ok((!session.is_new).then(|| self.cookie(&session.id, Duration::ZERO)));
        }

        let encoded = Value::Object(session.values.clone()).to_string();
        self.store.set_with_ttl(&key, encoded, self.lifetime).await?;
        tracing::debug!(entries = session.values.len(), "session saved");
        Ok(session.is_new.then(|| self.cookie(&session.id, self.lifetime)))
    }

    fn cookie(&self, id: &str, max_age: Duration) -> String {
        format!(
            "{}={id}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            self.cookie_name,
            max_age.as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::MemoryStore;

    fn manager() -> (SessionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(store.clone(), &SessionConfig::default());
        (manager, store)
    }

    #[test]
    fn values_round_through_json() {
        let mut session = Session::fresh();
        session.set("userId", 7_u64).unwrap();
        session.set("roles", ["admin"]).unwrap();

        assert!(session.has("userId"));
        assert_eq!(session.get_as::<u64>("userId").unwrap(), Some(7));
        assert_eq!(session.get("roles"), Some(&json!(["admin"])));
        assert!(session.get_as::<u64>("roles").is_err());
        assert_eq!(session.get_as::<u64>("missing").unwrap(), None);

        assert_eq!(session.pull("roles"), Some(json!(["admin"])));
        assert_eq!(session.pull("roles"), None);
        session.delete("userId");
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn untouched_sessions_are_not_saved() {
        let (manager, store) = manager();
        let session = manager.load(None).await.unwrap();
        assert!(session.is_new());
        assert_eq!(manager.save(&session).await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn new_session_is_stored_and_announced() {
        let (manager, _store) = manager();
        let mut session = manager.load(None).await.unwrap();
        session.set("cart", json!([1, 2])).unwrap();

        let cookie = manager.save(&session).await.unwrap().unwrap();
        assert!(cookie.starts_with(&format!("condor_session={}; Path=/;", session.id())));
        assert!(cookie.contains("HttpOnly"));

        let mut reloaded = manager.load(Some(session.id())).await.unwrap();
        assert!(!reloaded.is_new());
        assert_eq!(reloaded.get("cart"), Some(&json!([1, 2])));

        // Known sessions are saved without a new cookie.
        reloaded.set("cart", json!([])).unwrap();
        assert_eq!(manager.save(&reloaded).await.unwrap(), None);
    }

    #[tokio::test]
    async fn emptied_session_is_removed_and_its_cookie_expired() {
        let (manager, store) = manager();
        let mut session = manager.load(None).await.unwrap();
        session.set("k", "v").unwrap();
        manager.save(&session).await.unwrap();

        let mut session = manager.load(Some(session.id())).await.unwrap();
        session.clear();
        let cookie = manager.save(&session).await.unwrap().unwrap();
        assert!(cookie.contains("Max-Age=0"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_or_forged_ids_start_fresh() {
        let (manager, _store) = manager();
        let forged = manager.load(Some("../../etc/passwd")).await.unwrap();
        assert!(forged.is_new());
        assert_ne!(forged.id(), "../../etc/passwd");

        let stale = Uuid::new_v4().to_string();
        let session = manager.load(Some(&stale)).await.unwrap();
        assert!(session.is_new());
        assert_ne!(session.id(), stale);
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_expire_with_their_lifetime() {
        let store = Arc::new(MemoryStore::new());
        let config = SessionConfig {
            lifetime: Duration::from_secs(60),
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(store, &config);
        let mut session = manager.load(None).await.unwrap();
        session.set("k", 1).unwrap();
        manager.save(&session).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(manager.load(Some(session.id())).await.unwrap().is_new());
    }
}
