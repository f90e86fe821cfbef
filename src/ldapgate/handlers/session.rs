use axum::{
    extract::{Extension, OriginalUri, Query},
    http::HeaderMap,
    response::{IntoResponse, Json, Redirect},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::IntoParams;

use super::{SessionScope, SessionView};
use crate::gate::{AuthenticationType, Gate};

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NavigationQuery {
    /// Where to send the caller after logout.
    #[serde(rename = "forwardURL")]
    pub forward_url: Option<String>,
}

#[utoipa::path(
    get,
    path = "/session",
    params(NavigationQuery),
    responses(
        (status = 200, description = "Current session state and form token", body = SessionView)
    ),
    tag = "session"
)]
#[instrument(skip_all)]
pub async fn session(
    gate: Extension<Arc<Gate>>,
    headers: HeaderMap,
    Query(query): Query<NavigationQuery>,
) -> impl IntoResponse {
    let scope = SessionScope::open(&gate, &headers, query.forward_url.as_deref()).await;
    let view = SessionView::render(&gate, &scope).await;
    scope.close(&gate, Json(view).into_response()).await
}

#[utoipa::path(
    get,
    path = "/private/session",
    params(NavigationQuery),
    responses(
        (status = 200, description = "Session state for a fully authenticated caller", body = SessionView),
        (status = 303, description = "Not authenticated; redirected to the login view")
    ),
    tag = "session"
)]
#[instrument(skip_all)]
pub async fn private_session(
    gate: Extension<Arc<Gate>>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<NavigationQuery>,
) -> impl IntoResponse {
    let mut scope = SessionScope::open(&gate, &headers, query.forward_url.as_deref()).await;

    if scope.authentication_type() != AuthenticationType::Full {
        let original = uri
            .path_and_query()
            .map_or_else(|| uri.path().to_string(), ToString::to_string);
        debug!("private resource requested without authentication");
        scope.set_original_request_url(original);
        let response = Redirect::to(gate.auth().login_path()).into_response();
        return scope.close(&gate, response).await;
    }

    scope.mark_private_accessed();
    let view = SessionView::render(&gate, &scope).await;
    scope.close(&gate, Json(view).into_response()).await
}
