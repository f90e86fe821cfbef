use std::time::Duration;
use url::Url;

use super::upload::DEFAULT_MAX_CHARS;

const DEFAULT_SESSION_IDLE_SECONDS: u64 = 1800;
const DEFAULT_LOGIN_PATH: &str = "/private/login";
const DEFAULT_APPLICATION_ROOT: &str = "/";

/// Runtime knobs for the gate.
#[derive(Clone, Debug)]
pub struct GateConfig {
    login_path: String,
    application_root: String,
    logout_url: Option<Url>,
    sso_header: Option<String>,
    session_idle: Duration,
    cache_nonce_enabled: bool,
    secure_cookie: bool,
    max_upload_chars: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl GateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            application_root: DEFAULT_APPLICATION_ROOT.to_string(),
            logout_url: None,
            sso_header: None,
            session_idle: Duration::from_secs(DEFAULT_SESSION_IDLE_SECONDS),
            cache_nonce_enabled: true,
            secure_cookie: false,
            max_upload_chars: DEFAULT_MAX_CHARS,
        }
    }

    #[must_use]
    pub fn with_login_path(mut self, path: String) -> Self {
        self.login_path = path;
        self
    }

    #[must_use]
    pub fn with_application_root(mut self, root: String) -> Self {
        self.application_root = root;
        self
    }

    #[must_use]
    pub fn with_logout_url(mut self, url: Option<Url>) -> Self {
        self.logout_url = url;
        self
    }

    /// Header carrying an identity asserted by an upstream SSO proxy.
    #[must_use]
    pub fn with_sso_header(mut self, header: Option<String>) -> Self {
        self.sso_header = header.map(|name| name.to_ascii_lowercase());
        self
    }

    #[must_use]
    pub fn with_session_idle_seconds(mut self, seconds: u64) -> Self {
        self.session_idle = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_cache_nonce(mut self, enabled: bool) -> Self {
        self.cache_nonce_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_secure_cookie(mut self, secure: bool) -> Self {
        self.secure_cookie = secure;
        self
    }

    #[must_use]
    pub fn with_max_upload_chars(mut self, max_chars: usize) -> Self {
        self.max_upload_chars = max_chars;
        self
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn application_root(&self) -> &str {
        &self.application_root
    }

    #[must_use]
    pub fn logout_url(&self) -> Option<&Url> {
        self.logout_url.as_ref()
    }

    #[must_use]
    pub fn sso_header(&self) -> Option<&str> {
        self.sso_header.as_deref()
    }

    #[must_use]
    pub fn session_idle(&self) -> Duration {
        self.session_idle
    }

    #[must_use]
    pub fn cache_nonce_enabled(&self) -> bool {
        self.cache_nonce_enabled
    }

    #[must_use]
    pub fn secure_cookie(&self) -> bool {
        self.secure_cookie
    }

    #[must_use]
    pub fn max_upload_chars(&self) -> usize {
        self.max_upload_chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GateConfig::default();
        assert_eq!(config.login_path(), "/private/login");
        assert_eq!(config.session_idle(), Duration::from_secs(1800));
        assert_eq!(config.max_upload_chars(), 51_200);
        assert!(config.cache_nonce_enabled());
        assert!(!config.secure_cookie());
        assert!(config.logout_url().is_none());
    }

    #[test]
    fn sso_header_is_normalized() {
        let config = GateConfig::new().with_sso_header(Some("X-Remote-User".to_string()));
        assert_eq!(config.sso_header(), Some("x-remote-user"));
    }
}
