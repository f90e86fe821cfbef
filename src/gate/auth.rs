//! Authentication state transitions: login, logout, and asserted identities.
//!
//! Flow Overview:
//! - An upstream SSO proxy may assert an identity; the session becomes
//!   `PasswordOnly` and only needs a credential to reach `Full`.
//! - A successful login recycles the session (new id, new form token) before
//!   the caller is redirected, so an id planted before login is useless after.
//! - Logout always invalidates the session, whichever redirect is chosen.

use async_trait::async_trait;
use constant_time_eq::constant_time_eq;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{
    error::{AuthError, GateError},
    session::{AuthenticationType, Session, UserIdentity},
};

/// Where the login request came from.
#[derive(Clone, Debug, Default)]
pub struct LoginContext {
    /// Directory profile or context selected on the login form.
    pub profile: Option<String>,
    pub source_address: Option<String>,
}

/// Verifies credentials against the directory.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        identity: &str,
        credential: &SecretString,
        context: &LoginContext,
        secure: bool,
    ) -> Result<UserIdentity, AuthError>;
}

/// Where to send the caller after logout.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogoutTarget {
    Redirect(String),
    DefaultView,
}

pub struct AuthenticationState {
    authenticator: Arc<dyn Authenticator>,
    login_path: String,
    application_root: String,
    logout_url: Option<Url>,
}

impl AuthenticationState {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        login_path: String,
        application_root: String,
        logout_url: Option<Url>,
    ) -> Self {
        Self {
            authenticator,
            login_path,
            application_root,
            logout_url,
        }
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Record an identity vouched for by an upstream proxy.
    ///
    /// Only unauthenticated sessions are affected.
    pub fn assert_identity(&self, session: &mut Session, identity: &str) {
        let identity = identity.trim();
        if identity.is_empty()
            || session.authentication_type() != AuthenticationType::Unauthenticated
        {
            return;
        }
        debug!("identity asserted by upstream proxy");
        session.authenticate(UserIdentity::new(identity), AuthenticationType::PasswordOnly);
    }

    /// Verify a credential and promote the session to `Full`.
    ///
    /// Returns the redirect target on success.
    ///
    /// # Errors
    /// `MissingParameter` when input is absent (the authenticator is not
    /// called), `Auth` when the authenticator rejects the credential. The
    /// session is only recycled on success.
    #[instrument(skip_all, fields(password_only = tracing::field::Empty))]
    pub async fn login(
        &self,
        session: &mut Session,
        identity: Option<&str>,
        credential: &SecretString,
        context: &LoginContext,
        secure: bool,
    ) -> Result<String, GateError> {
        if credential.expose_secret().is_empty() {
            return Err(GateError::MissingParameter("password"));
        }

        let password_only = session.authentication_type() == AuthenticationType::PasswordOnly;
        tracing::Span::current().record("password_only", password_only);

        let identity = match (password_only, session.user_identity()) {
            (true, Some(known)) => known.as_str().to_string(),
            _ => identity
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or(GateError::MissingParameter("username"))?
                .to_string(),
        };

        let authenticated = match self
            .authenticator
            .authenticate(&identity, credential, context, secure)
            .await
        {
            Ok(authenticated) => authenticated,
            Err(err) => {
                warn!("authentication failed: {err}");
                let err = GateError::Auth(err);
                session.set_last_error(err.information());
                return Err(err);
            }
        };

        session.recycle();
        session.clear_last_error();
        session.authenticate(authenticated, AuthenticationType::Full);
        session.mark_private_accessed();

        let redirect = match session.take_original_request_url() {
            Some(url) if !self.points_at_login(&url) => url,
            _ => self.application_root.clone(),
        };
        info!("login succeeded");
        Ok(redirect)
    }

    /// Clear authentication and invalidate the session.
    ///
    /// Calling this on an already invalidated session is a no-op.
    #[instrument(skip(self, session))]
    pub fn logout(&self, session: &mut Session, idle: bool) -> LogoutTarget {
        if session.is_invalidated() {
            debug!("logout on invalidated session");
            return LogoutTarget::DefaultView;
        }

        let target = if let Some(url) = session.logout_url() {
            LogoutTarget::Redirect(url.to_string())
        } else if let Some(global) = &self.logout_url {
            LogoutTarget::Redirect(global_logout_url(global, session, idle))
        } else {
            LogoutTarget::DefaultView
        };

        session.invalidate();
        info!("session logged out");
        target
    }

    fn points_at_login(&self, target: &str) -> bool {
        let path = Url::parse(target).map_or_else(
            |_| {
                target
                    .split(['?', '#'])
                    .next()
                    .unwrap_or(target)
                    .to_string()
            },
            |url| url.path().to_string(),
        );
        let login = self.login_path.trim_end_matches('/').to_ascii_lowercase();
        path.trim_end_matches('/')
            .to_ascii_lowercase()
            .ends_with(&login)
    }
}

/// Accepts a single administrator account.
///
/// Used until directory-backed authentication is configured.
pub struct StaticAuthenticator {
    username: String,
    password: SecretString,
}

impl StaticAuthenticator {
    #[must_use]
    pub fn new(username: String, password: SecretString) -> Self {
        Self { username, password }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(
        &self,
        identity: &str,
        credential: &SecretString,
        _context: &LoginContext,
        _secure: bool,
    ) -> Result<UserIdentity, AuthError> {
        let username_matches = constant_time_eq(identity.as_bytes(), self.username.as_bytes());
        let password_matches = constant_time_eq(
            credential.expose_secret().as_bytes(),
            self.password.expose_secret().as_bytes(),
        );
        if username_matches && password_matches {
            Ok(UserIdentity::new(format!("local:{}", self.username)))
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

fn global_logout_url(base: &Url, session: &Session, idle: bool) -> String {
    let mut url = base.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("idle", bool_param(idle))
            .append_pair("passwordModified", bool_param(session.password_modified()))
            .append_pair("publicOnly", bool_param(!session.private_accessed()));
        if let Some(forward) = session.forward_url() {
            query.append_pair("forwardUrl", forward);
        }
    }
    url.to_string()
}

fn bool_param(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
