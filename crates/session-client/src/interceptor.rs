//! Request interceptor: attach the access credential, renew once on an
//! authorization failure, replay once.

use crate::coordinator::RefreshCoordinatorHandle;
use crate::errors::{InterceptError, RefreshError};
use common::secret::{bearer_header_value, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, instrument};

/// Implemented by call errors so the interceptor can tell an authorization
/// failure (expired or rejected credential) from any other failure.
pub trait AuthorizationFailure {
    fn is_authorization_failure(&self) -> bool;
}

/// Wraps outbound calls with credential attachment and one-shot renewal.
#[derive(Clone, Debug)]
pub struct RequestInterceptor {
    coordinator: RefreshCoordinatorHandle,
}

impl RequestInterceptor {
    #[must_use]
    pub fn new(coordinator: RefreshCoordinatorHandle) -> Self {
        Self { coordinator }
    }

    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinatorHandle {
        &self.coordinator
    }

    /// Run `call` with the current access credential.
    ///
    /// If `call` fails with an authorization failure, the credential is
    /// renewed through the coordinator and `call` runs once more with the new
    /// credential. The second result is returned as-is, whatever it is.
    ///
    /// # Errors
    ///
    /// - `Refresh(Unauthenticated)` if there is no session; `call` is not run
    /// - `Refresh(e)` if renewal failed; `call` is not replayed
    /// - `Call(e)` for any other call failure
    #[instrument(skip_all)]
    pub async fn execute<T, E, F, Fut>(&self, call: F) -> Result<T, InterceptError<E>>
    where
        F: Fn(SecretString) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AuthorizationFailure,
    {
        let access = self
            .coordinator
            .store()
            .access_token()
            .ok_or(InterceptError::Refresh(RefreshError::Unauthenticated))?;

        match call(access.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_authorization_failure() => return Err(InterceptError::Call(e)),
            Err(_) => {
                debug!(
                    target: "session.interceptor",
                    "Call failed authorization, requesting renewal"
                );
            }
        }

        let renewed = self.coordinator.renew(Some(&access)).await?;

        debug!(target: "session.interceptor", "Replaying call with renewed credential");
        call(renewed).await.map_err(InterceptError::Call)
    }
}

/// Failure of an HTTP call made through [`AuthorizedClient`].
#[derive(Debug, Error)]
pub enum HttpCallError {
    /// The server answered 401.
    #[error("unauthorized")]
    Unauthorized,

    /// The server answered with another non-success status.
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl AuthorizationFailure for HttpCallError {
    fn is_authorization_failure(&self) -> bool {
        matches!(self, HttpCallError::Unauthorized)
    }
}

/// `reqwest` client whose requests go through a [`RequestInterceptor`].
#[derive(Clone, Debug)]
pub struct AuthorizedClient {
    http_client: reqwest::Client,
    interceptor: RequestInterceptor,
}

impl AuthorizedClient {
    #[must_use]
    pub fn new(http_client: reqwest::Client, interceptor: RequestInterceptor) -> Self {
        Self {
            http_client,
            interceptor,
        }
    }

    /// Send the request produced by `build`, with `Authorization: Bearer`.
    ///
    /// `build` may run twice (original and replay), so it must not consume
    /// one-shot state.
    ///
    /// # Errors
    ///
    /// See [`RequestInterceptor::execute`]. HTTP 401 counts as an
    /// authorization failure; other non-2xx statuses are `Status`.
    pub async fn send<B>(&self, build: B) -> Result<reqwest::Response, InterceptError<HttpCallError>>
    where
        B: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.interceptor
            .execute(|token| {
                let request = build(&self.http_client)
                    .header(reqwest::header::AUTHORIZATION, bearer_header_value(&token));
                async move {
                    let response = request.send().await?;
                    let status = response.status();
                    if status == reqwest::StatusCode::UNAUTHORIZED {
                        return Err(HttpCallError::Unauthorized);
                    }
                    if !status.is_success() {
                        return Err(HttpCallError::Status(status));
                    }
                    Ok(response)
                }
            })
            .await
    }

    /// `GET url` and decode a JSON body.
    ///
    /// # Errors
    ///
    /// See [`AuthorizedClient::send`]; body decode failures are `Transport`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, InterceptError<HttpCallError>> {
        let response = self.send(|client| client.get(url)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| InterceptError::Call(HttpCallError::Transport(e)))
    }

    /// `POST url` with a JSON body and decode a JSON response.
    ///
    /// # Errors
    ///
    /// See [`AuthorizedClient::send`].
    pub async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, InterceptError<HttpCallError>> {
        let response = self.send(|client| client.post(url).json(body)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| InterceptError::Call(HttpCallError::Transport(e)))
    }
}
