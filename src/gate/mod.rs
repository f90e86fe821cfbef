//! # Gate
//!
//! Session-scoped security state for a directory self-service portal.
//!
//! ## Sessions and tokens
//!
//! Every browser session carries an anti-forgery token. State-changing form
//! posts must echo it back; a login or logout replaces it, so forms rendered
//! before the change stop working.
//!
//! ## Application modes
//!
//! The process moves from `NEW` (nothing persisted) to `CONFIGURATION`
//! (persisted, still editable) to `RUNNING`. Transitions persist, reinitialize
//! and publish under a single writer lock.
//!
//! ## Dispatch
//!
//! Each `processAction` declares its guards. [`Gate`] evaluates them against
//! the locked session and the current mode before running the transition.

pub mod auth;
pub mod config;
pub mod error;
pub mod guard;
pub mod mode;
pub mod nonce;
pub mod session;
pub mod store;
pub mod token;
pub mod upload;

pub use self::{
    auth::{AuthenticationState, Authenticator, LoginContext, LogoutTarget, StaticAuthenticator},
    config::GateConfig,
    error::{AuthError, ErrorCode, ErrorInformation, GateError, StoreError},
    guard::{GateContext, Guard},
    mode::{ApplicationMode, ApplicationModeController, UploadOutcome},
    nonce::ResourceCacheNonce,
    session::{AuthenticationType, Session, SessionRegistry, UserIdentity},
    store::{ConfigurationStore, FileConfigurationStore, StoredConfiguration, Template},
    upload::{UploadGuard, UploadedConfigurationDraft},
};

use secrecy::SecretString;
use std::{fmt, str::FromStr, sync::Arc};
use tracing::{debug, instrument};

/// Value of the `processAction` request parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessAction {
    Login,
    Logout,
    SelectTemplate,
    UploadConfig,
}

impl ProcessAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::SelectTemplate => "selectTemplate",
            Self::UploadConfig => "uploadConfig",
        }
    }

    /// Guards evaluated before the action runs.
    ///
    /// Logout only checks a token that was actually submitted, so idle
    /// timers and plain links still work. Upload tokens travel inside the multipart body and are checked by
    /// [`UploadGuard::accept`].
    #[must_use]
    pub fn guards(self) -> &'static [Guard] {
        match self {
            Self::Login => &[
                Guard::FormToken,
                Guard::Mode(&[ApplicationMode::Configuration, ApplicationMode::Running]),
            ],
            Self::Logout => &[Guard::SubmittedFormToken],
            Self::SelectTemplate => &[Guard::FormToken, Guard::Mode(&[ApplicationMode::New])],
            Self::UploadConfig => &[Guard::AuthenticatedIn(ApplicationMode::Running)],
        }
    }
}

impl fmt::Display for ProcessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessAction {
    type Err = GateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "login" => Ok(Self::Login),
            "logout" => Ok(Self::Logout),
            "selectTemplate" => Ok(Self::SelectTemplate),
            "uploadConfig" => Ok(Self::UploadConfig),
            other => Err(GateError::UnknownAction(other.to_string())),
        }
    }
}

/// Login form input.
pub struct LoginRequest<'a> {
    pub identity: Option<&'a str>,
    pub credential: &'a SecretString,
    pub submitted_token: Option<&'a str>,
    pub context: LoginContext,
    pub secure: bool,
}

/// Shared entry point for every gated action.
pub struct Gate {
    sessions: SessionRegistry,
    auth: AuthenticationState,
    modes: ApplicationModeController,
    uploads: UploadGuard,
    nonce: ResourceCacheNonce,
    config: GateConfig,
}

impl Gate {
    #[must_use]
    pub fn new(
        config: GateConfig,
        authenticator: Arc<dyn Authenticator>,
        modes: ApplicationModeController,
    ) -> Self {
        Self {
            sessions: SessionRegistry::new(config.session_idle()),
            auth: AuthenticationState::new(
                authenticator,
                config.login_path().to_string(),
                config.application_root().to_string(),
                config.logout_url().cloned(),
            ),
            modes,
            uploads: UploadGuard::new(config.max_upload_chars()),
            nonce: ResourceCacheNonce::from_startup(config.cache_nonce_enabled()),
            config,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[must_use]
    pub fn auth(&self) -> &AuthenticationState {
        &self.auth
    }

    #[must_use]
    pub fn modes(&self) -> &ApplicationModeController {
        &self.modes
    }

    #[must_use]
    pub fn uploads(&self) -> &UploadGuard {
        &self.uploads
    }

    #[must_use]
    pub fn nonce(&self) -> &ResourceCacheNonce {
        &self.nonce
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Evaluate the guards declared by `action`.
    ///
    /// # Errors
    /// Returns the error of the first guard that fails.
    pub async fn admit(
        &self,
        action: ProcessAction,
        session: &Session,
        submitted_token: Option<&str>,
    ) -> Result<(), GateError> {
        let context = GateContext {
            session,
            mode: self.modes.mode().await,
            submitted_token,
        };
        guard::check_all(action.guards(), &context)
    }

    /// # Errors
    /// Guard failures, missing input, or authenticator rejections.
    #[instrument(skip_all)]
    pub async fn login(
        &self,
        session: &mut Session,
        request: LoginRequest<'_>,
    ) -> Result<String, GateError> {
        self.admit(ProcessAction::Login, session, request.submitted_token)
            .await?;
        self.auth
            .login(
                session,
                request.identity,
                request.credential,
                &request.context,
                request.secure,
            )
            .await
    }

    /// Log the session out. A session that is already gone logs out
    /// without any checks.
    ///
    /// # Errors
    /// `InvalidFormToken` when a submitted token does not match; the session
    /// is left untouched.
    pub async fn logout(
        &self,
        session: &mut Session,
        submitted_token: Option<&str>,
        idle: bool,
    ) -> Result<LogoutTarget, GateError> {
        if !session.is_invalidated() {
            self.admit(ProcessAction::Logout, session, submitted_token)
                .await?;
        }
        Ok(self.auth.logout(session, idle))
    }

    /// # Errors
    /// Guard failures, unknown templates, or store failures.
    #[instrument(skip(self, session, submitted_token))]
    pub async fn select_template(
        &self,
        session: &mut Session,
        submitted_token: Option<&str>,
        template_id: &str,
    ) -> Result<ApplicationMode, GateError> {
        self.admit(ProcessAction::SelectTemplate, session, submitted_token)
            .await?;
        let mode = self.modes.select_initial_template(template_id).await?;
        session.clear_last_error();
        session.set_last_success_message(format!("Template {} selected", template_id.trim()));
        Ok(mode)
    }

    /// Validate, parse, and hand an uploaded configuration to the mode
    /// controller.
    ///
    /// # Errors
    /// Guard failures, an invalid token, an empty or unparseable document,
    /// or store failures. Nothing is parsed before the token validates.
    #[instrument(skip_all)]
    pub async fn upload_configuration(
        &self,
        session: &mut Session,
        draft: UploadedConfigurationDraft,
    ) -> Result<UploadOutcome, GateError> {
        self.admit(ProcessAction::UploadConfig, session, None).await?;
        let payload = self.uploads.accept(session, draft)?;
        let configuration = StoredConfiguration::from_document(&payload)?;
        let outcome = self
            .modes
            .accept_uploaded_configuration(session, configuration)
            .await?;
        debug!(?outcome, "configuration upload accepted");
        session.clear_last_error();
        Ok(outcome)
    }
}
