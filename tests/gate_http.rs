//! HTTP-level tests for the gate.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`, backed
//! by a configuration file in a temporary directory and the static
//! administrator account.

use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, Response, StatusCode},
    Router,
};
use ldapgate::{
    gate::{
        ApplicationModeController, FileConfigurationStore, Gate, GateConfig, StaticAuthenticator,
    },
    ldapgate::router,
};
use secrecy::SecretString;
use serde_json::Value;
use std::{path::PathBuf, sync::Arc};
use tempfile::TempDir;
use tower::ServiceExt;
use url::Url;

const ADMIN: &str = "admin";
const PASSWORD: &str = "correct-horse";
const BOUNDARY: &str = "gate-http-boundary";
const RUNNING_CONFIGURATION: &str = r#"{"properties":{"configIsEditable":"false"}}"#;

struct TestGate {
    _dir: TempDir,
    path: PathBuf,
    app: Router,
}

impl TestGate {
    async fn new(initial: Option<&str>, config: GateConfig) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ldapgate.json");
        if let Some(document) = initial {
            std::fs::write(&path, document)?;
        }
        let store = Arc::new(FileConfigurationStore::new(path.clone()));
        let modes = ApplicationModeController::open(store).await?;
        let authenticator = Arc::new(StaticAuthenticator::new(
            ADMIN.to_string(),
            SecretString::from(PASSWORD.to_string()),
        ));
        let gate = Arc::new(Gate::new(config, authenticator, modes));
        Ok(Self {
            _dir: dir,
            path,
            app: router(gate),
        })
    }

    async fn send(&self, request: Request<Body>) -> Result<Response<Body>> {
        Ok(self.app.clone().oneshot(request).await?)
    }

    /// Open a session and return its cookie and form token.
    async fn open_session(&self) -> Result<(String, String)> {
        let response = self
            .send(Request::get("/session").body(Body::empty())?)
            .await?;
        let cookie = session_cookie(&response).context("no session cookie")?;
        let view = json(response).await?;
        let token = view["formToken"]
            .as_str()
            .context("no form token")?
            .to_string();
        Ok((cookie, token))
    }

    async fn post_form(&self, query: &str, cookie: &str, body: &str) -> Result<Response<Body>> {
        let request = Request::post(format!("/action?{query}"))
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))?;
        self.send(request).await
    }

    async fn post_upload(&self, cookie: &str, fields: &[(&str, &str)]) -> Result<Response<Body>> {
        let request = Request::post("/action?processAction=uploadConfig")
            .header(header::COOKIE, cookie)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields)))?;
        self.send(request).await
    }

    /// Log in and return the cookie and token of the recycled session.
    async fn login(&self) -> Result<(String, String)> {
        let (cookie, token) = self.open_session().await?;
        let response = self
            .post_form(
                "processAction=login",
                &cookie,
                &format!("username={ADMIN}&password={PASSWORD}&formToken={token}"),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie = session_cookie(&response).context("login did not rotate cookie")?;
        let view = json(
            self.send(
                Request::get("/session")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())?,
            )
            .await?,
        )
        .await?;
        let token = view["formToken"].as_str().context("no form token")?;
        Ok((cookie, token.to_string()))
    }
}

fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("ldapgate_session="))
        .and_then(|value| value.split(';').next())
        .map(ToString::to_string)
}

fn location(response: &Response<Body>) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
}

async fn json(response: Response<Body>) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn multipart_body(fields: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.json\"\r\nContent-Type: application/json\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body
}

#[tokio::test]
async fn health_reports_mode() -> Result<()> {
    let gate = TestGate::new(None, GateConfig::new()).await?;
    let response = gate
        .send(Request::get("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json(response).await?;
    assert_eq!(body["name"], "ldapgate");
    assert_eq!(body["mode"], "NEW");
    Ok(())
}

#[tokio::test]
async fn bootstrap_template_selection_persists_configuration() -> Result<()> {
    let gate = TestGate::new(None, GateConfig::new()).await?;
    let (cookie, token) = gate.open_session().await?;

    let response = gate
        .post_form(
            "processAction=selectTemplate",
            &cookie,
            &format!("template=AD&formToken={token}"),
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await?;
    assert_eq!(body["outcome"], "TEMPLATE_SELECTED");
    assert_eq!(body["mode"], "CONFIGURATION");

    let stored = std::fs::read_to_string(&gate.path)?;
    assert!(stored.contains("\"configIsEditable\": \"true\""));

    let again = gate
        .post_form(
            "processAction=selectTemplate",
            &cookie,
            &format!("template=AD&formToken={token}"),
        )
        .await?;
    assert_eq!(again.status(), StatusCode::FORBIDDEN);
    assert_eq!(json(again).await?["code"], "UNAUTHORIZED");
    Ok(())
}

#[tokio::test]
async fn select_template_without_token_is_rejected() -> Result<()> {
    let gate = TestGate::new(None, GateConfig::new()).await?;
    let (cookie, _) = gate.open_session().await?;

    let response = gate
        .post_form("processAction=selectTemplate", &cookie, "template=AD")
        .await?;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json(response).await?;
    assert_eq!(body["code"], "INVALID_FORM_TOKEN");
    assert_eq!(body["message"], "Unable to read or submit form");
    assert!(!gate.path.exists());
    Ok(())
}

#[tokio::test]
async fn token_from_before_login_is_rejected_after_login() -> Result<()> {
    let gate = TestGate::new(Some(RUNNING_CONFIGURATION), GateConfig::new()).await?;
    let (cookie, token) = gate.open_session().await?;

    let response = gate
        .post_form(
            "processAction=login",
            &cookie,
            &format!("username={ADMIN}&password={PASSWORD}&formToken={token}"),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/"));
    let new_cookie = session_cookie(&response).context("no rotated cookie")?;
    assert_ne!(new_cookie, cookie);

    let replay = gate
        .post_form(
            "processAction=login",
            &new_cookie,
            &format!("username={ADMIN}&password={PASSWORD}&formToken={token}"),
        )
        .await?;
    assert_eq!(replay.status(), StatusCode::FORBIDDEN);
    assert_eq!(json(replay).await?["code"], "INVALID_FORM_TOKEN");
    Ok(())
}

#[tokio::test]
async fn failed_login_is_reported_on_the_session() -> Result<()> {
    let gate = TestGate::new(Some(RUNNING_CONFIGURATION), GateConfig::new()).await?;
    let (cookie, token) = gate.open_session().await?;

    let response = gate
        .post_form(
            "processAction=login",
            &cookie,
            &format!("username={ADMIN}&password=wrong&formToken={token}"),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let view = json(
        gate.send(
            Request::get("/session")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())?,
        )
        .await?,
    )
    .await?;
    assert_eq!(view["authenticationType"], "UNAUTHENTICATED");
    assert_eq!(view["lastError"]["code"], "AUTH_ERROR");
    assert_eq!(view["formToken"], token.as_str());
    Ok(())
}

#[tokio::test]
async fn private_resource_redirects_through_login() -> Result<()> {
    let gate = TestGate::new(Some(RUNNING_CONFIGURATION), GateConfig::new()).await?;
    let (cookie, token) = gate.open_session().await?;

    let response = gate
        .send(
            Request::get("/private/session?view=full")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/private/login"));

    let login = gate
        .post_form(
            "processAction=login",
            &cookie,
            &format!("username={ADMIN}&password={PASSWORD}&formToken={token}"),
        )
        .await?;
    assert_eq!(location(&login), Some("/private/session?view=full"));

    let cookie = session_cookie(&login).context("no rotated cookie")?;
    let private = gate
        .send(
            Request::get("/private/session")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(private.status(), StatusCode::OK);
    assert_eq!(json(private).await?["authenticationType"], "FULL");
    Ok(())
}

#[tokio::test]
async fn running_upload_needs_login_and_is_only_staged() -> Result<()> {
    let gate = TestGate::new(Some(RUNNING_CONFIGURATION), GateConfig::new()).await?;
    let (cookie, token) = gate.open_session().await?;
    let replacement = r#"{"properties":{"configIsEditable":"true"}}"#;

    let anonymous = gate
        .post_upload(&cookie, &[("uploadFile", replacement), ("formToken", &token)])
        .await?;
    assert_eq!(anonymous.status(), StatusCode::FORBIDDEN);
    assert_eq!(json(anonymous).await?["code"], "UNAUTHORIZED");

    let (cookie, token) = gate.login().await?;
    let staged = gate
        .post_upload(&cookie, &[("uploadFile", replacement), ("formToken", &token)])
        .await?;
    assert_eq!(staged.status(), StatusCode::OK);
    let body = json(staged).await?;
    assert_eq!(body["outcome"], "STAGED_FOR_REVIEW");
    assert_eq!(body["mode"], "RUNNING");

    assert_eq!(std::fs::read_to_string(&gate.path)?, RUNNING_CONFIGURATION);
    let view = json(
        gate.send(
            Request::get("/session")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())?,
        )
        .await?,
    )
    .await?;
    assert_eq!(view["configurationStaged"], true);
    Ok(())
}

#[tokio::test]
async fn bootstrap_upload_with_forged_token_is_discarded() -> Result<()> {
    let gate = TestGate::new(None, GateConfig::new()).await?;
    let (cookie, token) = gate.open_session().await?;

    let forged = gate
        .post_upload(
            &cookie,
            &[("uploadFile", RUNNING_CONFIGURATION), ("formToken", "forged")],
        )
        .await?;
    assert_eq!(forged.status(), StatusCode::FORBIDDEN);
    assert!(!gate.path.exists());

    let accepted = gate
        .post_upload(
            &cookie,
            &[("uploadFile", RUNNING_CONFIGURATION), ("formToken", &token)],
        )
        .await?;
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);
    let body = json(accepted).await?;
    assert_eq!(body["outcome"], "RESTARTING");
    assert_eq!(body["mode"], "RUNNING");
    assert!(gate.path.exists());
    Ok(())
}

#[tokio::test]
async fn oversized_multibyte_upload_is_truncated_not_refused() -> Result<()> {
    let gate = TestGate::new(None, GateConfig::new()).await?;
    let (cookie, token) = gate.open_session().await?;
    let large = "\u{20AC}".repeat(1_000_000);

    let response = gate
        .post_upload(&cookie, &[("uploadFile", &large), ("formToken", &token)])
        .await?;

    // The token after the payload was still read; only the truncated
    // document fails to parse.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json(response).await?;
    assert_eq!(body["code"], "CONFIG_FORMAT_ERROR");
    assert!(!gate.path.exists());
    Ok(())
}

#[tokio::test]
async fn logout_redirects_to_global_url_and_clears_cookie() -> Result<()> {
    let config = GateConfig::new().with_logout_url(Some(Url::parse("https://b/y?z=1")?));
    let gate = TestGate::new(Some(RUNNING_CONFIGURATION), config).await?;
    let (cookie, _) = gate.login().await?;

    let response = gate
        .post_form("processAction=logout", &cookie, "idle=true")
        .await?;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        Some("https://b/y?z=1&idle=true&passwordModified=false&publicOnly=false")
    );
    let cleared = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .context("no cookie cleared")?;
    assert!(cleared.contains("Max-Age=0"));

    let view = json(
        gate.send(
            Request::get("/session")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())?,
        )
        .await?,
    )
    .await?;
    assert_eq!(view["authenticationType"], "UNAUTHENTICATED");
    Ok(())
}

#[tokio::test]
async fn logout_with_stale_token_keeps_the_session() -> Result<()> {
    let gate = TestGate::new(Some(RUNNING_CONFIGURATION), GateConfig::new()).await?;
    let (cookie, stale) = gate.open_session().await?;
    let response = gate
        .post_form(
            "processAction=login",
            &cookie,
            &format!("username={ADMIN}&password={PASSWORD}&formToken={stale}"),
        )
        .await?;
    let cookie = session_cookie(&response).context("login did not rotate cookie")?;

    let rejected = gate
        .post_form("processAction=logout", &cookie, &format!("formToken={stale}"))
        .await?;
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);

    let view = json(
        gate.send(
            Request::get("/session")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())?,
        )
        .await?,
    )
    .await?;
    assert_eq!(view["authenticationType"], "FULL");
    let token = view["formToken"].as_str().context("no form token")?;

    let accepted = gate
        .post_form("processAction=logout", &cookie, &format!("formToken={token}"))
        .await?;
    assert_eq!(accepted.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&accepted), Some("/"));
    Ok(())
}

#[tokio::test]
async fn forward_url_is_passed_to_logout_url() -> Result<()> {
    let config = GateConfig::new().with_logout_url(Some(Url::parse("https://sso.example.com/out")?));
    let gate = TestGate::new(Some(RUNNING_CONFIGURATION), config).await?;
    let (cookie, _) = gate.open_session().await?;

    let response = gate
        .post_form(
            "processAction=logout&forwardURL=https%3A%2F%2Fportal.example.com",
            &cookie,
            "",
        )
        .await?;

    assert_eq!(
        location(&response),
        Some("https://sso.example.com/out?idle=false&passwordModified=false&publicOnly=true&forwardUrl=https%3A%2F%2Fportal.example.com")
    );
    Ok(())
}

#[tokio::test]
async fn sso_header_needs_only_a_password() -> Result<()> {
    let config = GateConfig::new().with_sso_header(Some("X-Remote-User".to_string()));
    let gate = TestGate::new(Some(RUNNING_CONFIGURATION), config).await?;

    let response = gate
        .send(
            Request::get("/session")
                .header("x-remote-user", ADMIN)
                .body(Body::empty())?,
        )
        .await?;
    let cookie = session_cookie(&response).context("no session cookie")?;
    let view = json(response).await?;
    assert_eq!(view["authenticationType"], "PASSWORD_ONLY");
    let token = view["formToken"].as_str().context("no form token")?;

    let login = gate
        .post_form(
            "processAction=login",
            &cookie,
            &format!("password={PASSWORD}&formToken={token}"),
        )
        .await?;
    assert_eq!(login.status(), StatusCode::SEE_OTHER);
    Ok(())
}

#[tokio::test]
async fn unknown_action_is_a_bad_request() -> Result<()> {
    let gate = TestGate::new(None, GateConfig::new()).await?;
    let (cookie, _) = gate.open_session().await?;

    let response = gate
        .post_form("processAction=dropDatabase", &cookie, "")
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await?["code"], "UNKNOWN_ACTION");
    Ok(())
}

#[tokio::test]
async fn nonce_prefix_can_be_disabled() -> Result<()> {
    let enabled = TestGate::new(None, GateConfig::new()).await?;
    let view = json(
        enabled
            .send(Request::get("/session").body(Body::empty())?)
            .await?,
    )
    .await?;
    assert!(view["noncePrefix"]
        .as_str()
        .is_some_and(|prefix| prefix.starts_with("/nonce-")));

    let disabled = TestGate::new(None, GateConfig::new().with_cache_nonce(false)).await?;
    let view = json(
        disabled
            .send(Request::get("/session").body(Body::empty())?)
            .await?,
    )
    .await?;
    assert_eq!(view["noncePrefix"], "");
    Ok(())
}
