//! Client-side session state.
//!
//! A [`SessionStore`] holds at most one [`Session`]. It is shared by every
//! caller in the process; only the refresh coordinator replaces it after a
//! renewal, and only the coordinator clears it after a failed one (or the
//! application on logout). Observers can watch it to react to a forced logout.

use common::secret::{secrets_equal, ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// An (access, refresh) credential pair.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

impl Session {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
        }
    }

    /// Whether `token` is this session's access credential.
    #[must_use]
    pub fn has_access_token(&self, token: &SecretString) -> bool {
        secrets_equal(&self.access_token, token)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.access_token.expose_secret() == other.access_token.expose_secret()
            && self.refresh_token.expose_secret() == other.refresh_token.expose_secret()
    }
}

/// Shared holder of the current session.
#[derive(Clone)]
pub struct SessionStore {
    sender: Arc<watch::Sender<Option<Session>>>,
}

impl SessionStore {
    /// Create a store, optionally with a session from a previous login.
    #[must_use]
    pub fn new(initial: Option<Session>) -> Self {
        let (sender, _receiver) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Clone of the current session, if any.
    ///
    /// The borrow is released before returning.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.sender.borrow().clone()
    }

    /// Current access credential, if a session exists.
    #[must_use]
    pub fn access_token(&self) -> Option<SecretString> {
        self.sender
            .borrow()
            .as_ref()
            .map(|session| session.access_token.clone())
    }

    /// Install a session (after login or renewal).
    pub fn replace(&self, session: Session) {
        self.sender.send_replace(Some(session));
    }

    /// Drop the session. Callers must log in again.
    pub fn clear(&self) {
        self.sender.send_replace(None);
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.sender.borrow().is_some()
    }

    /// Watch for session changes (renewal or forced logout).
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.sender.subscribe()
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_debug_redacts_tokens() {
        let session = Session::new("access-secret", "refresh-secret");
        let debug = format!("{session:?}");
        assert!(!debug.contains("access-secret"));
        assert!(!debug.contains("refresh-secret"));
    }

    #[test]
    fn test_store_replace_and_clear() {
        let store = SessionStore::new(None);
        assert!(!store.is_authenticated());
        assert!(store.access_token().is_none());

        store.replace(Session::new("a1", "r1"));
        assert_eq!(store.access_token().unwrap().expose_secret(), "a1");
        assert_eq!(store.current(), Some(Session::new("a1", "r1")));

        store.clear();
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn test_subscribers_observe_forced_logout() {
        let store = SessionStore::new(Some(Session::new("a1", "r1")));
        let mut receiver = store.subscribe();

        store.clear();
        receiver.changed().await.unwrap();
        assert!(receiver.borrow().is_none());
    }

    #[test]
    fn test_session_deserializes_from_token_response() {
        let json = r#"{"accessToken":"a","refreshToken":"r","tokenType":"Bearer","expiresIn":900}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert!(session.has_access_token(&SecretString::from("a")));
        assert_eq!(session.refresh_token.expose_secret(), "r");
    }
}
