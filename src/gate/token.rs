//! Per-session anti-forgery token.
//!
//! A token lives exactly as long as the session that issued it. Recycling a
//! session replaces the token, which invalidates every copy rendered before.

use base64ct::{Base64UrlUnpadded, Encoding};
use constant_time_eq::constant_time_eq;
use rand::RngCore;

use super::session::Session;

const TOKEN_BYTES: usize = 32;

/// Create a fresh random value for a session token or session id.
#[must_use]
pub fn issue() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Check a submitted token against the session's current token.
///
/// Missing or empty values always fail. Never mutates the session.
#[must_use]
pub fn validate(session: &Session, submitted: Option<&str>) -> bool {
    let Some(submitted) = submitted.filter(|value| !value.is_empty()) else {
        return false;
    };
    let current = session.verification_token();
    !current.is_empty() && constant_time_eq(current.as_bytes(), submitted.as_bytes())
}
