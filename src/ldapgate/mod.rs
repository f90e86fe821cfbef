use anyhow::Result;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::gate::{
    ApplicationMode, AuthenticationType, ErrorCode, ErrorInformation, Gate, StoredConfiguration,
};

pub mod handlers;

use handlers::{action, health, session};

/// Request bodies larger than this are refused before decoding. `/action`
/// lifts the limit: uploads are bounded by characters and forms by
/// [`action::MAX_FORM_BYTES`].
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        session::session,
        session::private_session,
        action::action,
    ),
    components(schemas(
        health::Health,
        handlers::SessionView,
        action::ActionForm,
        action::ActionResult,
        action::Outcome,
        ApplicationMode,
        AuthenticationType,
        ErrorCode,
        ErrorInformation,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "session", description = "Session state and form tokens"),
        (name = "action", description = "Gated state-changing actions"),
    )
)]
pub struct ApiDoc;

/// Build the application router around a shared gate.
pub fn router(gate: Arc<Gate>) -> Router {
    Router::new()
        .route("/", get(session::session))
        .route("/health", get(health::health))
        .route("/session", get(session::session))
        .route("/private/login", get(session::session))
        .route("/private/session", get(session::private_session))
        .route(
            "/action",
            post(action::action).layer(DefaultBodyLimit::disable()),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
                .layer(Extension(gate)),
        )
}

/// Serve the gate until interrupted.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn new(port: u16, gate: Arc<Gate>) -> Result<()> {
    let mut updates = gate.modes().subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let configuration = updates.borrow_and_update().clone();
            let mode = ApplicationMode::of(configuration.as_deref());
            let template = configuration.as_deref().and_then(StoredConfiguration::template);
            info!(?mode, ?template, "configuration published");
        }
    });

    let app = router(gate);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
