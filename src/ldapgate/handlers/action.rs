use axum::{
    body::{to_bytes, Body},
    extract::{Extension, FromRequest, Multipart, Query, Request},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    Form,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn, Span};
use utoipa::{IntoParams, ToSchema};

use super::SessionScope;
use crate::gate::{
    ApplicationMode, ErrorInformation, Gate, GateError, LoginContext, LoginRequest, LogoutTarget,
    ProcessAction, UploadOutcome,
};

/// Byte limit for url-encoded action forms.
pub const MAX_FORM_BYTES: usize = 64 * 1024;

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ActionQuery {
    /// One of `login`, `logout`, `selectTemplate`, `uploadConfig`.
    #[serde(rename = "processAction")]
    pub process_action: Option<String>,
    #[serde(rename = "forwardURL")]
    pub forward_url: Option<String>,
}

/// Form fields for the url-encoded actions.
#[derive(Deserialize, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionForm {
    form_token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    /// Directory profile selected on the login form.
    context: Option<String>,
    template: Option<String>,
    /// Set by the client-side idle timer on logout.
    #[serde(default)]
    idle: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    TemplateSelected,
    StagedForReview,
    Restarting,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub outcome: Outcome,
    pub mode: ApplicationMode,
    pub message: String,
}

#[utoipa::path(
    post,
    path = "/action",
    params(ActionQuery),
    request_body(content = ActionForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Template selected or upload staged for review", body = ActionResult),
        (status = 202, description = "Configuration persisted; restarting", body = ActionResult),
        (status = 303, description = "Login or logout redirect"),
        (status = 400, description = "Missing parameter, unknown action, or invalid configuration", body = ErrorInformation),
        (status = 401, description = "Authentication failed", body = ErrorInformation),
        (status = 403, description = "Form could not be submitted or action not permitted", body = ErrorInformation),
        (status = 422, description = "Upload could not be read", body = ErrorInformation),
        (status = 500, description = "Configuration could not be saved", body = ErrorInformation)
    ),
    tag = "action"
)]
#[instrument(skip_all, fields(process_action = tracing::field::Empty))]
pub async fn action(
    gate: Extension<Arc<Gate>>,
    Query(query): Query<ActionQuery>,
    request: Request,
) -> Response {
    let action = match query
        .process_action
        .as_deref()
        .unwrap_or_default()
        .parse::<ProcessAction>()
    {
        Ok(action) => action,
        Err(err) => {
            warn!("{err}");
            return err.into_response();
        }
    };
    Span::current().record("process_action", action.as_str());

    let headers = request.headers().clone();
    let mut scope = SessionScope::open(&gate, &headers, query.forward_url.as_deref()).await;

    let result = match action {
        ProcessAction::UploadConfig => upload(&gate, &mut scope, request).await,
        _ => match read_form(action, request).await {
            Ok(form) => dispatch(&gate, &mut scope, action, form, &headers).await,
            Err(err) => Err(err),
        },
    };

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            warn!("{action} failed: {err}");
            if !scope.is_invalidated() {
                scope.set_last_error(err.information());
            }
            err.into_response()
        }
    };
    scope.close(&gate, response).await
}

async fn read_form(action: ProcessAction, request: Request) -> Result<ActionForm, GateError> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_FORM_BYTES)
        .await
        .map_err(|err| GateError::Read(err.to_string()))?;
    let request = Request::from_parts(parts, Body::from(bytes));
    match Form::<ActionForm>::from_request(request, &()).await {
        Ok(Form(form)) => Ok(form),
        // Logout links and idle timers may post without a body.
        Err(_) if action == ProcessAction::Logout => Ok(ActionForm::default()),
        Err(rejection) => Err(GateError::Read(rejection.body_text())),
    }
}

async fn dispatch(
    gate: &Gate,
    scope: &mut SessionScope,
    action: ProcessAction,
    form: ActionForm,
    headers: &HeaderMap,
) -> Result<Response, GateError> {
    match action {
        ProcessAction::Login => {
            let password = SecretString::from(form.password.unwrap_or_default());
            let request = LoginRequest {
                identity: form.username.as_deref(),
                credential: &password,
                submitted_token: form.form_token.as_deref(),
                context: LoginContext {
                    profile: form.context,
                    source_address: source_address(headers),
                },
                secure: gate.config().secure_cookie(),
            };
            let redirect = gate.login(scope, request).await?;
            Ok(Redirect::to(&redirect).into_response())
        }
        ProcessAction::Logout => {
            match gate
                .logout(scope, form.form_token.as_deref(), form.idle)
                .await?
            {
                LogoutTarget::Redirect(url) => Ok(Redirect::to(&url).into_response()),
                LogoutTarget::DefaultView => {
                    Ok(Redirect::to(gate.config().application_root()).into_response())
                }
            }
        }
        ProcessAction::SelectTemplate => {
            let template = form.template.unwrap_or_default();
            let mode = gate
                .select_template(scope, form.form_token.as_deref(), &template)
                .await?;
            let result = ActionResult {
                outcome: Outcome::TemplateSelected,
                mode,
                message: scope
                    .last_success_message()
                    .unwrap_or("Template selected")
                    .to_string(),
            };
            Ok(Json(result).into_response())
        }
        ProcessAction::UploadConfig => Err(GateError::UnknownAction(action.to_string())),
    }
}

async fn upload(
    gate: &Gate,
    scope: &mut SessionScope,
    request: Request,
) -> Result<Response, GateError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| GateError::Read(rejection.body_text()))?;
    let draft = gate.uploads().decode(&mut multipart).await?;
    let outcome = gate.upload_configuration(scope, draft).await?;
    let mode = gate.modes().mode().await;

    let response = match outcome {
        UploadOutcome::StagedForReview => (
            StatusCode::OK,
            Json(ActionResult {
                outcome: Outcome::StagedForReview,
                mode,
                message: "Configuration staged for review".to_string(),
            }),
        ),
        UploadOutcome::Restarting => (
            StatusCode::ACCEPTED,
            Json(ActionResult {
                outcome: Outcome::Restarting,
                mode,
                message: "Configuration saved; the application is restarting".to_string(),
            }),
        ),
    };
    Ok(response.into_response())
}

fn source_address(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|address| address.trim().to_string())
        .filter(|address| !address.is_empty())
}
