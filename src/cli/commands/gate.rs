use anyhow::{Context, Result};
use clap::{builder::BoolishValueParser, Arg, ArgAction, Command};
use secrecy::SecretString;
use url::Url;

pub const ARG_LOGOUT_URL: &str = "logout-url";
pub const ARG_SSO_HEADER: &str = "sso-header";
pub const ARG_SESSION_IDLE_SECONDS: &str = "session-idle-seconds";
pub const ARG_NO_CACHE_NONCE: &str = "no-cache-nonce";
pub const ARG_SECURE_COOKIE: &str = "secure-cookie";
pub const ARG_ADMIN_USERNAME: &str = "admin-username";
pub const ARG_ADMIN_PASSWORD: &str = "admin-password";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    with_admin_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOGOUT_URL)
                .long(ARG_LOGOUT_URL)
                .help("Redirect target after logout, receives idle/passwordModified/publicOnly")
                .env("LDAPGATE_LOGOUT_URL")
                .value_parser(Url::parse),
        )
        .arg(
            Arg::new(ARG_SSO_HEADER)
                .long(ARG_SSO_HEADER)
                .help("Request header carrying an identity asserted by an upstream SSO proxy")
                .env("LDAPGATE_SSO_HEADER"),
        )
        .arg(
            Arg::new(ARG_SESSION_IDLE_SECONDS)
                .long(ARG_SESSION_IDLE_SECONDS)
                .help("Idle time in seconds before a session expires")
                .env("LDAPGATE_SESSION_IDLE_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_NO_CACHE_NONCE)
                .long(ARG_NO_CACHE_NONCE)
                .help("Disable the cache-busting nonce path prefix")
                .env("LDAPGATE_NO_CACHE_NONCE")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_SECURE_COOKIE)
                .long(ARG_SECURE_COOKIE)
                .help("Mark the session cookie Secure (serve over HTTPS)")
                .env("LDAPGATE_SECURE_COOKIE")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
}

fn with_admin_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ADMIN_USERNAME)
                .long(ARG_ADMIN_USERNAME)
                .help("Administrator allowed to log in to the configuration surface")
                .env("LDAPGATE_ADMIN_USERNAME")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ADMIN_PASSWORD)
                .long(ARG_ADMIN_PASSWORD)
                .help("Administrator password")
                .env("LDAPGATE_ADMIN_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
}

#[derive(Debug)]
pub struct Options {
    pub logout_url: Option<Url>,
    pub sso_header: Option<String>,
    pub session_idle_seconds: u64,
    pub cache_nonce: bool,
    pub secure_cookie: bool,
    pub admin_username: String,
    pub admin_password: SecretString,
}

impl Options {
    /// # Errors
    /// Returns an error if the administrator credentials are missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let admin_username = matches
            .get_one::<String>(ARG_ADMIN_USERNAME)
            .cloned()
            .context("missing required argument: --admin-username")?;
        let admin_password = matches
            .get_one::<String>(ARG_ADMIN_PASSWORD)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --admin-password")?;

        Ok(Self {
            logout_url: matches.get_one::<Url>(ARG_LOGOUT_URL).cloned(),
            sso_header: matches.get_one::<String>(ARG_SSO_HEADER).cloned(),
            session_idle_seconds: matches
                .get_one::<u64>(ARG_SESSION_IDLE_SECONDS)
                .copied()
                .unwrap_or(1800),
            cache_nonce: !matches.get_flag(ARG_NO_CACHE_NONCE),
            secure_cookie: matches.get_flag(ARG_SECURE_COOKIE),
            admin_username,
            admin_password,
        })
    }
}
