use crate::{
    cli::telemetry,
    gate::{
        ApplicationModeController, FileConfigurationStore, Gate, GateConfig, StaticAuthenticator,
    },
    ldapgate,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub config_file: PathBuf,
    pub logout_url: Option<Url>,
    pub sso_header: Option<String>,
    pub session_idle_seconds: u64,
    pub cache_nonce: bool,
    pub secure_cookie: bool,
    pub admin_username: String,
    pub admin_password: SecretString,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration cannot be loaded or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    let store = Arc::new(FileConfigurationStore::new(args.config_file.clone()));
    let modes = ApplicationModeController::open(store)
        .await
        .with_context(|| format!("Failed to load {}", args.config_file.display()))?;
    info!(mode = ?modes.mode().await, "configuration loaded");

    let config = GateConfig::new()
        .with_logout_url(args.logout_url)
        .with_sso_header(args.sso_header)
        .with_session_idle_seconds(args.session_idle_seconds)
        .with_cache_nonce(args.cache_nonce)
        .with_secure_cookie(args.secure_cookie);

    let authenticator = Arc::new(StaticAuthenticator::new(
        args.admin_username,
        args.admin_password,
    ));

    let gate = Arc::new(Gate::new(config, authenticator, modes));

    let result = ldapgate::new(args.port, gate).await;
    telemetry::shutdown_tracer();
    result
}
