/// HTTP surface for the generation pipeline and the analyzer.
///
/// Every response carries permissive CORS headers; plain `OPTIONS` requests
/// get an empty 204.
use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::analytics::{Analytics, TrackEvent};
use crate::classify::classify;
use crate::errors::PagesmithError;
use crate::layout::{RenderedBlock, page_document};
use crate::logger::RequestLogger;
use crate::persist::DaClient;
use crate::session::SessionManager;
use crate::store::BlobStore;
use crate::stream::{Pipeline, StreamEvent};
use crate::utils::slugify;

/// Buffered events between the pipeline task and the SSE writer.
const STREAM_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub analytics: Arc<Analytics>,
    pub sessions: Arc<SessionManager>,
    pub blob: Arc<dyn BlobStore>,
    pub da: Option<Arc<DaClient>>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/stream", get(stream_handler).options(preflight))
        .route("/api/classify", get(classify_handler).options(preflight))
        .route(
            "/api/persist",
            axum::routing::post(persist_handler).options(preflight),
        )
        .route("/images/{slug}/{file}", get(image_handler).options(preflight))
        .route(
            "/api/track",
            axum::routing::post(track_handler).options(preflight),
        )
        .route(
            "/api/analytics/analyze",
            axum::routing::post(analyze_fleet_handler).options(preflight),
        )
        .route(
            "/api/analytics/analyze-page",
            get(analyze_page_handler).options(preflight),
        )
        .route(
            "/api/analytics/summary",
            get(summary_handler).options(preflight),
        )
        .route("/health", get(health_handler).options(preflight))
        .layer(cors)
        .with_state(state)
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(json!({"error": message}))).into_response()
}

fn error_status(err: &PagesmithError) -> StatusCode {
    match err {
        PagesmithError::Input(_) => StatusCode::BAD_REQUEST,
        PagesmithError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
        PagesmithError::Auth(_) => StatusCode::BAD_GATEWAY,
        PagesmithError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    #[serde(default)]
    query: String,
    #[serde(default)]
    session: Option<String>,
}

/// GET /api/stream?query= — the SSE generation pipeline.
async fn stream_handler(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    if params.query.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "query parameter is required");
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<StreamEvent>(STREAM_CHANNEL_CAPACITY);
    let pipeline = Arc::clone(&state.pipeline);
    let query = params.query.clone();
    let session = params.session.clone();
    tokio::spawn(async move {
        pipeline.run(&query, session.as_deref(), tx).await;
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        Ok::<_, Infallible>(
            Event::default()
                .event(event.name())
                .data(event.payload().to_string()),
        )
    });

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct ClassifyParams {
    #[serde(default)]
    query: String,
}

/// GET /api/classify?query= — classification without generation.
async fn classify_handler(Query(params): Query<ClassifyParams>) -> Response {
    if params.query.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "query parameter is required");
    }
    axum::Json(classify(&params.query)).into_response()
}

#[derive(Debug, Deserialize)]
struct PersistRequest {
    query: String,
    blocks: Vec<PersistBlock>,
    #[serde(default)]
    slug: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistBlock {
    name: String,
    html: String,
    #[serde(default)]
    section_style: Option<String>,
}

/// POST /api/persist — write a generated page through to the content repo.
async fn persist_handler(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<PersistRequest>,
) -> Response {
    let Some(da) = &state.da else {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "persistence is not configured");
    };
    if body.blocks.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "blocks must not be empty");
    }

    let blocks: Vec<RenderedBlock> = body
        .blocks
        .into_iter()
        .map(|b| RenderedBlock {
            name: b.name,
            html: b.html,
            section_style: b.section_style,
            non_empty: true,
        })
        .collect();
    let slug = body
        .slug
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| slugify(&body.query));
    let html = page_document(&body.query, &blocks);

    match da.persist_and_publish(&format!("/{slug}"), &html).await {
        Ok(result) => axum::Json(json!({
            "success": true,
            "previewUrl": result.preview_url,
            "liveUrl": result.live_url,
        }))
        .into_response(),
        Err(e) => {
            error!("persist failed: {e}");
            json_error(error_status(&e), &e.to_string())
        }
    }
}

/// GET /images/{slug}/{file} — PNG bytes from the blob store.
async fn image_handler(
    State(state): State<AppState>,
    Path((slug, file)): Path<(String, String)>,
) -> Response {
    let key = format!("{slug}/{file}");
    match state.blob.get(&key).await {
        Ok(Some(bytes)) => (
            [
                (header::CONTENT_TYPE, "image/png"),
                (header::CACHE_CONTROL, "public, max-age=31536000"),
            ],
            bytes,
        )
            .into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "image not found"),
        Err(e) => {
            error!("blob read failed: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "blob store error")
        }
    }
}

/// POST /api/track — append one analytics event to the KV log.
async fn track_handler(
    State(state): State<AppState>,
    axum::Json(event): axum::Json<TrackEvent>,
) -> Response {
    if event.session_id.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "sessionId is required");
    }

    // A conversion pins the session's journey stage for good.
    if event.event_type == "conversion" {
        let url = event.data["url"].as_str().unwrap_or("").to_string();
        match state.sessions.get_or_create(Some(&event.session_id)).await {
            Ok(mut session) => {
                if let Err(e) = state.sessions.record_conversion(&mut session, &url).await {
                    error!("failed to record conversion on session: {e}");
                }
            }
            Err(e) => error!("failed to load session for conversion: {e}"),
        }
    }

    match state.analytics.track(&event).await {
        Ok(()) => axum::Json(json!({"success": true})).into_response(),
        Err(e) => {
            error!("track failed: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to record event")
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeFleetParams {
    #[serde(default)]
    force: Option<bool>,
}

/// POST /api/analytics/analyze[?force=true] — rate-limited fleet verdict.
async fn analyze_fleet_handler(
    State(state): State<AppState>,
    Query(params): Query<AnalyzeFleetParams>,
) -> Response {
    let log = RequestLogger::new(uuid::Uuid::new_v4().to_string());
    log.set_phase("analysis");
    match state
        .analytics
        .analyze_recent(params.force.unwrap_or(false), &log)
        .await
    {
        Ok(result) => axum::Json(result).into_response(),
        Err(e) => json_error(StatusCode::CONFLICT, &e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzePageParams {
    #[serde(default)]
    url: String,
    #[serde(default)]
    query: String,
}

/// GET /api/analytics/analyze-page?url=&query= — single-page verdict.
async fn analyze_page_handler(
    State(state): State<AppState>,
    Query(params): Query<AnalyzePageParams>,
) -> Response {
    if params.url.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "url parameter is required");
    }
    let log = RequestLogger::new(uuid::Uuid::new_v4().to_string());
    log.set_phase("analysis");
    match state
        .analytics
        .analyze_page(&params.url, &params.query, &log)
        .await
    {
        Ok(verdict) => axum::Json(verdict).into_response(),
        Err(e) => {
            error!("page analysis failed: {e}");
            json_error(StatusCode::BAD_GATEWAY, &e.to_string())
        }
    }
}

/// GET /api/analytics/summary — 30-day aggregates.
async fn summary_handler(State(state): State<AppState>) -> Response {
    match state.analytics.summary().await {
        Ok(summary) => axum::Json(summary).into_response(),
        Err(e) => {
            error!("summary failed: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read summary")
        }
    }
}

async fn health_handler() -> Response {
    axum::Json(json!({
        "status": "ok",
        "worker": format!("pagesmith/{}", crate::VERSION),
    }))
    .into_response()
}
