use crate::{
    catalog::CategoryRecord,
    errors::SearchError,
    semantic::{QueryOptions, SearchHit, SearchService},
};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    service: Arc<SearchService>,
}

pub fn router(service: Arc<SearchService>) -> Router {
    let shared_state = Arc::new(SharedState { service });

    Router::new()
        .route("/api/search", post(search))
        .route("/api/catalog", get(catalog))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::warn!("shutting down"),
        _ = terminate => {},
    }
}

async fn start_app(service: Arc<SearchService>, bind: &str) -> anyhow::Result<()> {
    let app = router(service);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("listening on {bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(service: Arc<SearchService>, bind: &str) -> anyhow::Result<()> {
    // warm up before accepting requests; a failure here is retried per request
    let warmup = service.clone();
    std::thread::spawn(move || {
        if let Err(e) = warmup.initialize() {
            log::error!("initialization failed: {e}");
        }
    });

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(service, bind))
}

#[derive(Debug)]
pub struct HttpError(SearchError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        log::error!("{:?}", self.0);

        let status = match self.0 {
            SearchError::Config(_) => axum::http::StatusCode::BAD_REQUEST,
            SearchError::DataLoad { .. }
            | SearchError::EmptyIndex
            | SearchError::ModelUnavailable(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = match &self.0 {
            SearchError::ModelUnavailable(_) => json!({
                "error": self.0.to_string(),
                "kind": self.0.kind(),
                "retry": true,
            }),
            _ => json!({
                "error": self.0.to_string(),
                "kind": self.0.kind(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<SearchError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub threshold: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub threshold: f32,
    pub hits: Vec<HitResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HitResponse {
    pub full_path: String,
    pub leaf_label: String,
    pub group_label: String,
    pub score: f32,
    pub percent: u8,
}

impl From<SearchHit> for HitResponse {
    fn from(hit: SearchHit) -> Self {
        let percent = hit.percent();
        Self {
            full_path: hit.record.full_path,
            leaf_label: hit.record.leaf_label,
            group_label: hit.record.group_label,
            score: hit.score,
            percent,
        }
    }
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let service = state.service.clone();
    let threshold = payload
        .threshold
        .unwrap_or(service.options().search.score_threshold);
    let opts = QueryOptions {
        top_k: payload.top_k,
        threshold: Some(threshold),
    };

    let query = payload.query.clone();
    let hits = tokio::task::spawn_blocking(move || service.run_query_with(&query, opts))
        .await
        .map_err(|e| SearchError::model_unavailable(format!("search task failed: {e}")))??;

    Ok(Json(SearchResponse {
        query: payload.query,
        threshold,
        hits: hits.into_iter().map(Into::into).collect(),
    }))
}

async fn catalog(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<Vec<CategoryRecord>>, HttpError> {
    let service = state.service.clone();
    let records = tokio::task::spawn_blocking(move || service.catalog())
        .await
        .map_err(|e| SearchError::model_unavailable(format!("catalog task failed: {e}")))??;

    Ok(Json(records))
}
