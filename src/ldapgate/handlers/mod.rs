//! HTTP handlers and the per-request session scope.
//!
//! Every handler that touches a session opens a [`SessionScope`]: the session
//! lock is held until the scope is closed, and closing reconciles the
//! registry and sets or clears the session cookie.

pub mod action;
pub mod health;
pub mod session;

use axum::{
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue,
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use tokio::sync::OwnedMutexGuard;
use tracing::error;
use utoipa::ToSchema;

use crate::gate::{
    ApplicationMode, AuthenticationType, ErrorInformation, Gate, Session,
};

pub const SESSION_COOKIE_NAME: &str = "ldapgate_session";

/// Session state rendered for the client.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// Anti-forgery token to echo back as `formToken`.
    pub form_token: String,
    pub authentication_type: AuthenticationType,
    pub user_identity: Option<String>,
    pub mode: ApplicationMode,
    pub nonce_prefix: String,
    pub last_error: Option<ErrorInformation>,
    pub last_success_message: Option<String>,
    pub configuration_staged: bool,
}

impl SessionView {
    pub(crate) async fn render(gate: &Gate, session: &Session) -> Self {
        Self {
            form_token: session.verification_token().to_string(),
            authentication_type: session.authentication_type(),
            user_identity: session.user_identity().map(|id| id.as_str().to_string()),
            mode: gate.modes().mode().await,
            nonce_prefix: gate.nonce().prefix(),
            last_error: session.last_error().cloned(),
            last_success_message: session.last_success_message().map(ToString::to_string),
            configuration_staged: session.staged_configuration().is_some(),
        }
    }
}

/// A locked session for the duration of one request.
pub(crate) struct SessionScope {
    session: OwnedMutexGuard<Session>,
    acquired_id: String,
    presented_id: Option<String>,
}

impl SessionScope {
    /// Lock the session named by the cookie and apply request-wide inputs:
    /// an SSO-asserted identity and a `forwardURL`.
    pub(crate) async fn open(gate: &Gate, headers: &HeaderMap, forward_url: Option<&str>) -> Self {
        let presented_id = extract_session_id(headers);
        let mut session = gate.sessions().acquire(presented_id.as_deref()).await;
        let acquired_id = session.id().to_string();

        if let Some(name) = gate.config().sso_header() {
            if let Some(identity) = headers.get(name).and_then(|value| value.to_str().ok()) {
                gate.auth().assert_identity(&mut session, identity);
            }
        }
        if let Some(url) = forward_url.filter(|url| !url.is_empty()) {
            session.set_forward_url(url);
        }

        Self {
            session,
            acquired_id,
            presented_id,
        }
    }

    /// Release the lock and attach the cookie the client should hold next.
    pub(crate) async fn close(self, gate: &Gate, mut response: Response) -> Response {
        gate.sessions()
            .release(&self.acquired_id, &self.session)
            .await;

        let secure = gate.config().secure_cookie();
        let cookie = if self.session.is_invalidated() {
            Some(clear_session_cookie(secure))
        } else if self.presented_id.as_deref() != Some(self.session.id()) {
            Some(session_cookie(self.session.id(), secure))
        } else {
            None
        };

        match cookie {
            Some(Ok(value)) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Some(Err(err)) => error!("Failed to build session cookie: {err}"),
            None => {}
        }
        response
    }
}

impl Deref for SessionScope {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl DerefMut for SessionScope {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

fn session_cookie(id: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}={id}; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key.trim() == SESSION_COOKIE_NAME && !value.trim().is_empty())
                .then(|| value.trim().to_string())
        })
}
