//! Map validated CLI arguments to the action that runs the gate.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{gate, ARG_CONFIG_FILE, ARG_PORT};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let config_file = matches
        .get_one::<PathBuf>(ARG_CONFIG_FILE)
        .cloned()
        .context("missing required argument: --config-file")?;

    let gate_opts = gate::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        config_file,
        logout_url: gate_opts.logout_url,
        sso_header: gate_opts.sso_header,
        session_idle_seconds: gate_opts.session_idle_seconds,
        cache_nonce: gate_opts.cache_nonce,
        secure_cookie: gate_opts.secure_cookie,
        admin_username: gate_opts.admin_username,
        admin_password: gate_opts.admin_password,
    }))
}
