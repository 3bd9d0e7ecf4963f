//! HTTP surface.
//!
//! `/`, `/scan` and `/scan/{profile}` each run one pairing session and
//! answer with its page. `/health` reports uptime and the backend in use.
//! All routes accept any method.

use crate::controller::PairingController;
use crate::page::{not_found_page, HtmlPresenter, Reply};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::any,
    Router,
};
use futures::stream::{self, StreamExt};
use qrlink_core::config::{Config, DEFAULT_PROFILE};
use qrlink_core::event::ProtocolVersion;
use qrlink_core::shellexpand;
use qrlink_core::traits::PairingBackend;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    backend: Arc<dyn PairingBackend>,
    config: Arc<Config>,
    storage_root: PathBuf,
    version: ProtocolVersion,
    uptime: Instant,
}

impl ApiState {
    pub fn new(backend: Arc<dyn PairingBackend>, config: Config, version: ProtocolVersion) -> Self {
        let storage_root = PathBuf::from(shellexpand(&config.session.root));
        Self {
            backend,
            config: Arc::new(config),
            storage_root,
            version,
            uptime: Instant::now(),
        }
    }
}

/// `ANY /health`: uptime and backend name.
async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime.elapsed().as_secs(),
        "backend": state.backend.name(),
        "profiles": state.config.profile_names(),
    }))
}

/// `ANY /` and `ANY /scan`: run the default profile.
async fn scan_default(State(state): State<ApiState>) -> Response {
    run_session(state, DEFAULT_PROFILE).await
}

/// `ANY /scan/{profile}`: run a named profile.
async fn scan_profile(State(state): State<ApiState>, Path(profile): Path<String>) -> Response {
    run_session(state, &profile).await
}

/// Spawn one pairing session and answer with whatever it presents first.
async fn run_session(state: ApiState, profile_name: &str) -> Response {
    let Some(profile) = state.config.profile(profile_name) else {
        let fallback = state.config.profile(DEFAULT_PROFILE).unwrap_or_default();
        return (
            StatusCode::NOT_FOUND,
            Html(not_found_page(
                &fallback.page,
                profile_name,
                &state.config.profile_names(),
            )),
        )
            .into_response();
    };

    let invocation = Uuid::new_v4();
    info!("scan {invocation}: starting profile '{profile_name}'");

    let (mut presenter, reply) = HtmlPresenter::new(profile.page.clone());
    let controller = PairingController::new(
        state.backend.clone(),
        state.storage_root.clone(),
        profile,
        state.version,
    );

    tokio::spawn(async move {
        let outcome = controller.run(&mut presenter).await;
        info!("scan {invocation}: finished with {outcome:?}");
    });

    match reply.await {
        Ok(Reply::Page { status, body }) => (status, Html(body)).into_response(),
        Ok(Reply::Stream { first, rest }) => {
            let updates = stream::unfold(rest, |mut rx| async move {
                rx.recv().await.map(|chunk| (chunk, rx))
            });
            let body = stream::once(async move { first })
                .chain(updates)
                .map(Ok::<_, Infallible>);
            (
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                Body::from_stream(body),
            )
                .into_response()
        }
        Err(_) => {
            error!("scan {invocation}: session ended without a reply");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html("<h1>Error</h1><pre>pairing session ended unexpectedly</pre>".to_string()),
            )
                .into_response()
        }
    }
}

/// Build the axum router with shared state.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/", any(scan_default))
        .route("/scan", any(scan_default))
        .route("/scan/{profile}", any(scan_profile))
        .route("/health", any(health))
        .with_state(state)
}

/// Start the HTTP server and run until it stops.
pub async fn serve(state: ApiState) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind to {addr}: {e}"))?;

    info!("qrlink listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use qrlink_bridge::{ScriptedBackend, Step};
    use qrlink_core::config::ProfileConfig;
    use qrlink_core::event::{BackendEvent, CloseReason, ConnectionState};
    use tower::ServiceExt;

    /// Short deadlines so the real-time tests finish quickly.
    fn test_config(root: &std::path::Path) -> Config {
        let mut cfg = Config::default();
        cfg.session.root = root.to_string_lossy().to_string();
        let fast = ProfileConfig {
            deadline_ms: 200,
            settle_ms: 10,
            linger_ms: 10,
            send_timeout_ms: 500,
            ..ProfileConfig::default()
        };
        cfg.profiles.insert("default".to_string(), fast.clone());
        cfg.profiles.insert("ubuntu".to_string(), fast);
        cfg
    }

    fn test_router(backend: ScriptedBackend, root: &std::path::Path) -> Router {
        build_router(ApiState::new(
            Arc::new(backend),
            test_config(root),
            ProtocolVersion::default(),
        ))
    }

    async fn body_text(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let root = tempfile::tempdir().unwrap();
        let app = test_router(ScriptedBackend::default(), root.path());
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["backend"], "scripted");
        assert_eq!(json["profiles"], json!(["default", "ubuntu"]));
    }

    #[tokio::test]
    async fn test_timeout_without_challenge_is_504() {
        let root = tempfile::tempdir().unwrap();
        let app = test_router(ScriptedBackend::default(), root.path());
        let req = Request::get("/").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(body_text(resp).await.contains("Timeout"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_500_with_message() {
        let root = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::default().failing_connect("spawn <node> failed");
        let app = test_router(backend, root.path());
        let req = Request::post("/scan").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_text(resp).await;
        assert!(body.contains("spawn &lt;node&gt; failed"));
    }

    #[tokio::test]
    async fn test_logout_before_challenge_is_500() {
        let root = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(vec![Step::Emit(BackendEvent::StateChanged(
            ConnectionState::Closed(CloseReason::LoggedOut),
        ))]);
        let app = test_router(backend, root.path());
        let req = Request::get("/scan").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_challenge_streams_page_then_success() {
        let root = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(vec![
            Step::Emit(BackendEvent::ChallengeIssued("tok-1".into())),
            Step::Emit(BackendEvent::ChallengeIssued("tok-2".into())),
            Step::WriteCredentials(br#"{"me":{"id":"123"}}"#.to_vec()),
            Step::Emit(BackendEvent::StateChanged(ConnectionState::Open)),
        ]);
        let app = test_router(backend.clone(), root.path());
        let req = Request::get("/scan/ubuntu").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );

        let body = body_text(resp).await;
        assert!(body.contains("<img id=\"qr\""));
        assert!(body.contains("getElementById(\"qr\")"));
        assert!(body.contains("alert(\"SUCCESS!"));
        assert!(body.trim_end().ends_with("</html>"));
        assert_eq!(backend.sends().len(), 1);
        assert_eq!(backend.sends()[0].0, "123");
    }

    #[tokio::test]
    async fn test_challenge_then_timeout_keeps_200() {
        let root = tempfile::tempdir().unwrap();
        let backend =
            ScriptedBackend::new(vec![Step::Emit(BackendEvent::ChallengeIssued("tok".into()))]);
        let app = test_router(backend.clone(), root.path());
        let req = Request::get("/").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_text(resp).await;
        assert!(body.contains("took too long"));
        assert_eq!(backend.close_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_profile_is_404() {
        let root = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::default();
        let app = test_router(backend.clone(), root.path());
        let req = Request::get("/scan/nope").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(body_text(resp).await.contains("<code>nope</code>"));
        assert!(backend.connects().is_empty());
    }
}
