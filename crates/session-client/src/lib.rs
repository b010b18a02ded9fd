//! Wayfare session client.
//!
//! Keeps one (access, refresh) session per process and lets any number of
//! concurrent callers share it:
//!
//! - [`interceptor::RequestInterceptor`] attaches the access credential and
//!   replays a call once after renewal
//! - [`coordinator::RefreshCoordinator`] guarantees a single rotation in
//!   flight and fans its outcome out to every queued caller
//! - [`refresher::HttpTokenRefresher`] talks to the auth service
//!
//! ```rust,ignore
//! let (client, _task) = SessionClient::start(config, Some(session), cancel_token)?;
//! let trips: TripsPage = client.http().get_json(&url).await?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod interceptor;
pub mod refresher;
pub mod session;

pub use config::SessionClientConfig;
pub use coordinator::{CoordinatorState, RefreshCoordinator, RefreshCoordinatorHandle};
pub use errors::{InterceptError, RefreshError};
pub use interceptor::{AuthorizationFailure, AuthorizedClient, HttpCallError, RequestInterceptor};
pub use refresher::{HttpTokenRefresher, TokenRefresher};
pub use session::{Session, SessionStore};

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fully wired client: session store, coordinator, interceptor, HTTP client.
#[derive(Clone, Debug)]
pub struct SessionClient {
    interceptor: RequestInterceptor,
    http: AuthorizedClient,
}

impl SessionClient {
    /// Build the HTTP client, spawn the coordinator, and wire the interceptor.
    ///
    /// # Errors
    ///
    /// Returns `RefreshError::Configuration` if the HTTP client cannot be built.
    pub fn start(
        config: &SessionClientConfig,
        initial: Option<Session>,
        cancel_token: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>), RefreshError> {
        let http_client = config.build_http_client()?;
        let refresher = Arc::new(HttpTokenRefresher::new(config, http_client.clone()));
        Ok(Self::with_refresher(
            config,
            http_client,
            refresher,
            initial,
            cancel_token,
        ))
    }

    /// Like [`SessionClient::start`] but with a caller-supplied refresher.
    #[must_use]
    pub fn with_refresher(
        config: &SessionClientConfig,
        http_client: reqwest::Client,
        refresher: Arc<dyn TokenRefresher>,
        initial: Option<Session>,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let store = SessionStore::new(initial);
        let (coordinator, task) =
            RefreshCoordinator::spawn(store, refresher, config.rotate_timeout, cancel_token);
        let interceptor = RequestInterceptor::new(coordinator);
        let http = AuthorizedClient::new(http_client, interceptor.clone());
        (Self { interceptor, http }, task)
    }

    /// Install a session obtained from a login.
    pub fn login(&self, session: Session) {
        self.store().replace(session);
    }

    /// Drop the local session.
    pub fn logout(&self) {
        self.store().clear();
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        self.interceptor.coordinator().store()
    }

    #[must_use]
    pub fn interceptor(&self) -> &RequestInterceptor {
        &self.interceptor
    }

    #[must_use]
    pub fn http(&self) -> &AuthorizedClient {
        &self.http
    }
}
