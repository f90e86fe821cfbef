//! # ldapgate
//!
//! `ldapgate` guards the administrative surface of an LDAP self-service
//! portal. It owns browser sessions, their anti-forgery tokens and
//! authentication state, and the process-wide bootstrap mode that decides
//! which configuration actions are available.
//!
//! ## Bootstrap
//!
//! A fresh install starts in `NEW`: the only action is choosing a directory
//! template or uploading a configuration. Once something is persisted the
//! process is in `CONFIGURATION` until the document is locked, then
//! `RUNNING`. While running, uploads are staged in the session for review
//! and never persisted directly.
//!
//! ## Sessions
//!
//! The session id travels in an `HttpOnly` cookie. Login and logout replace
//! the id and the form token, so a token copied from an earlier page is
//! rejected.

pub mod cli;
pub mod gate;
pub mod ldapgate;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
