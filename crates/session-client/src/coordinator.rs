//! `RefreshCoordinator`: single-flight credential renewal.
//!
//! One actor task per session owns `in_flight` and the waiter queue, so
//! enqueue and drain never interleave. Callers talk to it through a
//! [`RefreshCoordinatorHandle`]:
//!
//! 1. A caller whose request failed authorization sends `Renew` with the
//!    access credential it used.
//! 2. With no rotation in flight, the actor either answers right away (the
//!    session already holds a newer credential) or queues the caller and
//!    spawns a rotation task.
//! 3. With a rotation in flight, the caller is queued.
//! 4. The rotation task posts `RotationSettled` back to the mailbox. The actor
//!    replaces or clears the session and answers every queued caller with the
//!    same outcome.
//!
//! Rotation is bounded by `rotate_timeout`; a timed-out rotation takes the
//! failure path. A queued caller that has gone away is still drained; the
//! send to its dropped receiver is ignored.

use crate::errors::RefreshError;
use crate::refresher::TokenRefresher;
use crate::session::{Session, SessionStore};
use common::secret::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox capacity. Renewal bursts are bounded by the number of concurrent
/// callers sharing the session.
const COORDINATOR_CHANNEL_BUFFER: usize = 256;

type RenewReply = oneshot::Sender<Result<SecretString, RefreshError>>;

/// Messages handled by the coordinator actor.
enum CoordinatorMessage {
    /// A caller saw an authorization failure using `observed`.
    Renew {
        observed: Option<SecretString>,
        respond_to: RenewReply,
    },
    /// The spawned rotation finished (or timed out).
    RotationSettled {
        outcome: Result<Session, RefreshError>,
    },
    /// Snapshot for diagnostics and tests.
    GetState {
        respond_to: oneshot::Sender<CoordinatorState>,
    },
}

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorState {
    pub in_flight: bool,
    pub waiters: usize,
    pub rotations_started: u64,
}

/// Handle to the coordinator actor.
#[derive(Clone, Debug)]
pub struct RefreshCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    store: SessionStore,
}

impl RefreshCoordinatorHandle {
    /// Obtain a renewed access credential.
    ///
    /// `observed` is the access credential the caller used when it saw the
    /// authorization failure. Passing it lets the coordinator answer callers
    /// that raced a rotation that already settled.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` if there is no session
    /// - the rotation's error (`InvalidRefresh`, `Timeout`, `Transport`) if
    ///   it failed; the session has been cleared in that case
    /// - `CoordinatorClosed` if the actor has stopped
    pub async fn renew(&self, observed: Option<&SecretString>) -> Result<SecretString, RefreshError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Renew {
                observed: observed.cloned(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RefreshError::CoordinatorClosed)?;

        rx.await.map_err(|_| RefreshError::CoordinatorClosed)?
    }

    /// Current coordinator state.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorClosed` if the actor has stopped.
    pub async fn state(&self) -> Result<CoordinatorState, RefreshError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| RefreshError::CoordinatorClosed)?;
        rx.await.map_err(|_| RefreshError::CoordinatorClosed)
    }

    /// The session store this coordinator renews.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Stop the actor. Queued callers receive `CoordinatorClosed`.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The coordinator actor.
pub struct RefreshCoordinator {
    store: SessionStore,
    refresher: Arc<dyn TokenRefresher>,
    rotate_timeout: Duration,
    receiver: mpsc::Receiver<CoordinatorMessage>,
    /// Weak so that dropping every handle stops the actor.
    mailbox: mpsc::WeakSender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    in_flight: bool,
    waiters: Vec<RenewReply>,
    rotations_started: u64,
}

impl RefreshCoordinator {
    /// Spawn a coordinator for `store`.
    ///
    /// The actor stops when every handle is dropped or `cancel_token` fires.
    pub fn spawn(
        store: SessionStore,
        refresher: Arc<dyn TokenRefresher>,
        rotate_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> (RefreshCoordinatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);

        let actor = Self {
            store: store.clone(),
            refresher,
            rotate_timeout,
            receiver,
            mailbox: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            in_flight: false,
            waiters: Vec::new(),
            rotations_started: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RefreshCoordinatorHandle {
            sender,
            cancel_token,
            store,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "session.coordinator")]
    async fn run(mut self) {
        debug!(target: "session.coordinator", "RefreshCoordinator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "session.coordinator", "RefreshCoordinator received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            debug!(target: "session.coordinator", "All handles dropped, exiting");
                            break;
                        }
                    }
                }
            }
        }

        self.drain(&Err(RefreshError::CoordinatorClosed));

        info!(
            target: "session.coordinator",
            rotations_started = self.rotations_started,
            "RefreshCoordinator stopped"
        );
    }

    fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Renew {
                observed,
                respond_to,
            } => self.handle_renew(observed, respond_to),

            CoordinatorMessage::RotationSettled { outcome } => self.handle_settled(outcome),

            CoordinatorMessage::GetState { respond_to } => {
                let _ = respond_to.send(CoordinatorState {
                    in_flight: self.in_flight,
                    waiters: self.waiters.len(),
                    rotations_started: self.rotations_started,
                });
            }
        }
    }

    fn handle_renew(&mut self, observed: Option<SecretString>, respond_to: RenewReply) {
        if self.in_flight {
            debug!(
                target: "session.coordinator",
                waiters = self.waiters.len() + 1,
                "Rotation in flight, queueing caller"
            );
            self.waiters.push(respond_to);
            return;
        }

        let Some(session) = self.store.current() else {
            debug!(target: "session.coordinator", "Renewal requested with no session");
            let _ = respond_to.send(Err(RefreshError::Unauthenticated));
            return;
        };

        if let Some(observed) = observed {
            if !session.has_access_token(&observed) {
                debug!(
                    target: "session.coordinator",
                    "Caller observed a superseded credential, answering with current"
                );
                let _ = respond_to.send(Ok(session.access_token));
                return;
            }
        }

        self.waiters.push(respond_to);
        self.start_rotation(session.refresh_token);
    }

    fn start_rotation(&mut self, refresh_token: SecretString) {
        let Some(mailbox) = self.mailbox.upgrade() else {
            // Every handle is gone; nobody is left to use the result.
            self.drain(&Err(RefreshError::CoordinatorClosed));
            return;
        };

        self.in_flight = true;
        self.rotations_started += 1;

        info!(
            target: "session.coordinator",
            rotation = self.rotations_started,
            "Starting credential rotation"
        );

        let refresher = Arc::clone(&self.refresher);
        let rotate_timeout = self.rotate_timeout;

        tokio::spawn(async move {
            let mut task = tokio::spawn(async move { refresher.rotate(&refresh_token).await });

            let outcome = match tokio::time::timeout(rotate_timeout, &mut task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(RefreshError::Transport(format!("rotation task failed: {e}"))),
                Err(_) => {
                    task.abort();
                    Err(RefreshError::Timeout)
                }
            };

            // The actor may have stopped in the meantime.
            let _ = mailbox
                .send(CoordinatorMessage::RotationSettled { outcome })
                .await;
        });
    }

    fn handle_settled(&mut self, outcome: Result<Session, RefreshError>) {
        self.in_flight = false;

        let reply = match outcome {
            Ok(session) => {
                let access = session.access_token.clone();
                self.store.replace(session);
                info!(
                    target: "session.coordinator",
                    waiters = self.waiters.len(),
                    "Credential rotation succeeded"
                );
                Ok(access)
            }
            Err(e) => {
                self.store.clear();
                warn!(
                    target: "session.coordinator",
                    error = %e,
                    waiters = self.waiters.len(),
                    "Credential rotation failed, session cleared"
                );
                Err(e)
            }
        };

        self.drain(&reply);
    }

    /// Answer every queued caller with `reply`.
    fn drain(&mut self, reply: &Result<SecretString, RefreshError>) {
        for waiter in self.waiters.drain(..) {
            // Receiver dropped means the caller cancelled; nothing to do.
            let _ = waiter.send(reply.clone());
        }
    }
}
