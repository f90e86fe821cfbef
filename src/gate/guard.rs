//! Guards shared by every gated transition.
//!
//! Mode-gated and auth-gated actions have the same shape: check the guards,
//! run the side-effecting transition, report the outcome. Actions declare
//! their guards and the gate evaluates them in order; the first failure wins.

use super::{
    error::GateError,
    mode::ApplicationMode,
    session::{AuthenticationType, Session},
    token,
};

/// What a guard gets to look at.
pub struct GateContext<'a> {
    pub session: &'a Session,
    pub mode: ApplicationMode,
    pub submitted_token: Option<&'a str>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Guard {
    /// The submitted form token must match the session token.
    FormToken,
    /// Like `FormToken`, but only when a token was submitted at all.
    SubmittedFormToken,
    /// The application must be in one of these modes.
    Mode(&'static [ApplicationMode]),
    /// The session must be fully authenticated while the application is in
    /// the given mode.
    AuthenticatedIn(ApplicationMode),
}

impl Guard {
    /// # Errors
    /// Returns the error category that matches the failed guard.
    pub fn check(self, context: &GateContext<'_>) -> Result<(), GateError> {
        match self {
            Self::FormToken => {
                if token::validate(context.session, context.submitted_token) {
                    Ok(())
                } else {
                    Err(GateError::InvalidFormToken)
                }
            }
            Self::SubmittedFormToken => match context.submitted_token {
                Some(submitted) if !submitted.is_empty() => Self::FormToken.check(context),
                _ => Ok(()),
            },
            Self::Mode(allowed) => ensure_mode(context.mode, allowed),
            Self::AuthenticatedIn(mode) => {
                if context.mode == mode
                    && context.session.authentication_type() != AuthenticationType::Full
                {
                    Err(GateError::Unauthorized)
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// # Errors
/// Returns the first failing guard's error.
pub fn check_all(guards: &[Guard], context: &GateContext<'_>) -> Result<(), GateError> {
    guards.iter().try_for_each(|guard| guard.check(context))
}

/// # Errors
/// Returns `Unauthorized` when `current` is not in `allowed`.
pub fn ensure_mode(current: ApplicationMode, allowed: &[ApplicationMode]) -> Result<(), GateError> {
    if allowed.contains(&current) {
        Ok(())
    } else {
        Err(GateError::Unauthorized)
    }
}
