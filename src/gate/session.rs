//! Sessions and the registry that owns them.
//!
//! Each session sits behind its own mutex. A request holds the lock for the
//! whole action, so reads and writes of the authentication type and token
//! never interleave across concurrent requests on the same session.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use utoipa::ToSchema;

use super::{error::ErrorInformation, store::StoredConfiguration, token};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticationType {
    #[default]
    Unauthenticated,
    /// Identity asserted upstream, no credential verified yet.
    PasswordOnly,
    Full,
}

/// Opaque directory reference for an authenticated caller.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserIdentity(String);

impl UserIdentity {
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
pub struct Session {
    id: String,
    verification_token: String,
    authentication_type: AuthenticationType,
    user_identity: Option<UserIdentity>,
    original_request_url: Option<String>,
    forward_url: Option<String>,
    logout_url: Option<String>,
    last_error: Option<ErrorInformation>,
    last_success_message: Option<String>,
    password_modified: bool,
    private_accessed: bool,
    staged_configuration: Option<StoredConfiguration>,
    invalidated: bool,
    last_accessed: Instant,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: token::issue(),
            verification_token: token::issue(),
            authentication_type: AuthenticationType::Unauthenticated,
            user_identity: None,
            original_request_url: None,
            forward_url: None,
            logout_url: None,
            last_error: None,
            last_success_message: None,
            password_modified: false,
            private_accessed: false,
            staged_configuration: None,
            invalidated: false,
            last_accessed: Instant::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn verification_token(&self) -> &str {
        &self.verification_token
    }

    #[must_use]
    pub fn authentication_type(&self) -> AuthenticationType {
        self.authentication_type
    }

    #[must_use]
    pub fn user_identity(&self) -> Option<&UserIdentity> {
        self.user_identity.as_ref()
    }

    #[must_use]
    pub fn original_request_url(&self) -> Option<&str> {
        self.original_request_url.as_deref()
    }

    pub fn set_original_request_url(&mut self, url: impl Into<String>) {
        self.original_request_url = Some(url.into());
    }

    pub(crate) fn take_original_request_url(&mut self) -> Option<String> {
        self.original_request_url.take()
    }

    #[must_use]
    pub fn forward_url(&self) -> Option<&str> {
        self.forward_url.as_deref()
    }

    pub fn set_forward_url(&mut self, url: impl Into<String>) {
        self.forward_url = Some(url.into());
    }

    #[must_use]
    pub fn logout_url(&self) -> Option<&str> {
        self.logout_url.as_deref()
    }

    pub fn set_logout_url(&mut self, url: impl Into<String>) {
        self.logout_url = Some(url.into());
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&ErrorInformation> {
        self.last_error.as_ref()
    }

    pub fn set_last_error(&mut self, error: ErrorInformation) {
        self.last_error = Some(error);
    }

    pub fn clear_last_error(&mut self) {
        self.last_error = None;
    }

    #[must_use]
    pub fn last_success_message(&self) -> Option<&str> {
        self.last_success_message.as_deref()
    }

    pub fn set_last_success_message(&mut self, message: impl Into<String>) {
        self.last_success_message = Some(message.into());
    }

    #[must_use]
    pub fn password_modified(&self) -> bool {
        self.password_modified
    }

    pub fn mark_password_modified(&mut self) {
        self.password_modified = true;
    }

    #[must_use]
    pub fn private_accessed(&self) -> bool {
        self.private_accessed
    }

    pub fn mark_private_accessed(&mut self) {
        self.private_accessed = true;
    }

    #[must_use]
    pub fn staged_configuration(&self) -> Option<&StoredConfiguration> {
        self.staged_configuration.as_ref()
    }

    pub(crate) fn stage_configuration(&mut self, configuration: StoredConfiguration) {
        self.staged_configuration = Some(configuration);
    }

    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub(crate) fn authenticate(&mut self, identity: UserIdentity, kind: AuthenticationType) {
        self.user_identity = Some(identity);
        self.authentication_type = kind;
    }

    fn clear_authentication(&mut self) {
        self.user_identity = None;
        self.authentication_type = AuthenticationType::Unauthenticated;
    }

    /// Replace the id and token while keeping where the caller was headed.
    ///
    /// Transient state (errors, messages, staged drafts) does not survive.
    pub fn recycle(&mut self) {
        self.id = token::issue();
        self.verification_token = token::issue();
        self.last_error = None;
        self.last_success_message = None;
        self.staged_configuration = None;
    }

    /// Drop all state; the registry forgets the session on release.
    pub fn invalidate(&mut self) {
        self.clear_authentication();
        self.verification_token.clear();
        self.original_request_url = None;
        self.forward_url = None;
        self.logout_url = None;
        self.last_error = None;
        self.last_success_message = None;
        self.staged_configuration = None;
        self.invalidated = true;
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_accessed.elapsed()
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// Owns every live session, keyed by session id.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Lock the session named by `id`, or a fresh one when it is unknown,
    /// expired, invalidated, or was recycled away while we waited.
    pub async fn acquire(&self, id: Option<&str>) -> OwnedMutexGuard<Session> {
        if let Some(id) = id {
            let handle = self.sessions.lock().await.get(id).cloned();
            if let Some(handle) = handle {
                let mut session = handle.lock_owned().await;
                if session.id() == id && !session.is_invalidated() {
                    if session.idle_for() < self.idle_timeout {
                        session.touch();
                        return session;
                    }
                    debug!("session expired after idle timeout");
                    session.invalidate();
                    self.release(id, &session).await;
                }
            }
        }
        self.create().await
    }

    async fn create(&self) -> OwnedMutexGuard<Session> {
        let session = Session::new();
        let id = session.id().to_string();
        let handle = Arc::new(Mutex::new(session));
        let guard = Arc::clone(&handle).lock_owned().await;

        let mut sessions = self.sessions.lock().await;
        // Sessions locked by an in-flight request are active; skip them.
        let idle_timeout = self.idle_timeout;
        sessions.retain(|_, entry| {
            entry
                .try_lock()
                .map_or(true, |session| session.idle_for() < idle_timeout)
        });
        sessions.insert(id, handle);
        guard
    }

    /// Reconcile the registry with the session after an action ran.
    ///
    /// `previous_id` is the id the session had when it was acquired. Must be
    /// called while the caller still holds the session lock.
    pub async fn release(&self, previous_id: &str, session: &OwnedMutexGuard<Session>) {
        let mut sessions = self.sessions.lock().await;
        if session.is_invalidated() {
            sessions.remove(previous_id);
            return;
        }
        if session.id() != previous_id {
            sessions.remove(previous_id);
            sessions.insert(
                session.id().to_string(),
                Arc::clone(OwnedMutexGuard::mutex(session)),
            );
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
