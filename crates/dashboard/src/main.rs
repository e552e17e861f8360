use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use farecast_core::api::ApiError;
use farecast_core::app::Dashboard;
use farecast_core::contract::chat::ChatMessage;
use farecast_core::contract::context::MarketContext;
use farecast_core::contract::pricing::PriceExplanation;
use farecast_core::contract::{self, Issue};
use farecast_core::service::pricing::MARKET_CONTEXT_SOURCE;
use farecast_core::service::PricingMode;
use farecast_core::store::{
    ChatBusy, ChatState, LayoutState, Panel, SavedScenario, StatusState, Tab,
};
use farecast_core::view::{EvidenceView, ExecutiveSummary, WorkspaceView};

const DEFAULT_PORT: u16 = 3001;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = farecast_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let dashboard = Dashboard::from_settings(&settings)?;
    let health = dashboard.refresh_health().await;
    tracing::info!(health = ?health.health, version = ?health.backend_version, "pricing backend probed");

    let app = router(AppState::new(dashboard));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "dashboard listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/tabs/workspace", get(workspace_tab))
        .route("/api/tabs/executive", get(executive_tab))
        .route("/api/tabs/evidence", get(evidence_tab))
        .route("/api/context", put(put_context))
        .route("/api/price", post(run_price))
        .route("/api/scenarios", get(list_scenarios).post(save_scenario))
        .route("/api/scenarios/:id/load", post(load_scenario))
        .route(
            "/api/scenarios/:id",
            delete(delete_scenario).patch(rename_scenario),
        )
        .route("/api/layout", get(get_layout).put(put_layout))
        .route("/api/chat", get(get_chat).post(post_chat).delete(clear_chat))
        .route("/api/docs/:id", get(get_doc))
        .route("/api/status", get(get_status))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    dashboard: Arc<Dashboard>,
    /// Cancels the chat reply currently streaming, if any.
    chat_cancel: Arc<Mutex<Option<(Uuid, CancellationToken)>>>,
}

impl AppState {
    fn new(dashboard: Dashboard) -> Self {
        Self {
            dashboard: Arc::new(dashboard),
            chat_cancel: Arc::new(Mutex::new(None)),
        }
    }

    fn chat_slot(&self) -> std::sync::MutexGuard<'_, Option<(Uuid, CancellationToken)>> {
        self.chat_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
    issues: Vec<Issue>,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            issues: Vec::new(),
        }
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "issues": self.issues,
        }));
        (self.status, body).into_response()
    }
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        let status = match &err {
            ApiError::Validation(v) if v.endpoint == MARKET_CONTEXT_SOURCE => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Transport(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Status { .. } | ApiError::Decode { .. } | ApiError::Validation(_) => {
                StatusCode::BAD_GATEWAY
            }
        };
        let issues = err.validation().map(|v| v.issues.clone()).unwrap_or_default();
        let message = err.to_string();
        if status.is_server_error() {
            sentry_anyhow::capture_anyhow(&anyhow::Error::new(err));
        }
        Self {
            status,
            message,
            issues,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if err.downcast_ref::<ChatBusy>().is_some() {
            return Self::new(StatusCode::CONFLICT, err.to_string());
        }
        sentry_anyhow::capture_anyhow(&err);
        Self::new(StatusCode::BAD_GATEWAY, format!("{err:#}"))
    }
}

async fn workspace_tab(State(state): State<AppState>) -> Json<WorkspaceView> {
    state.dashboard.layout.set_active_tab(Tab::Workspace);
    Json(state.dashboard.workspace())
}

async fn executive_tab(State(state): State<AppState>) -> Json<ExecutiveSummary> {
    state.dashboard.layout.set_active_tab(Tab::Executive);
    Json(state.dashboard.executive())
}

#[derive(Debug, Default, Deserialize)]
struct EvidenceQuery {
    /// Drop the cached bundle and mapping before reading.
    #[serde(default)]
    refresh: bool,
}

async fn evidence_tab(
    State(state): State<AppState>,
    Query(query): Query<EvidenceQuery>,
) -> Json<EvidenceView> {
    state.dashboard.layout.set_active_tab(Tab::Evidence);
    if query.refresh {
        state.dashboard.evidence.invalidate().await;
    }
    Json(state.dashboard.evidence_view().await)
}

async fn put_context(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<Json<MarketContext>, AppError> {
    let context = contract::decode::<MarketContext>(&raw).map_err(|issues| AppError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        message: "invalid market context".to_string(),
        issues,
    })?;
    state.dashboard.context.set_context(context.clone());
    Ok(Json(context))
}

#[derive(Debug, Default, Deserialize)]
struct PriceRequest {
    #[serde(default)]
    mode: PricingMode,
}

async fn run_price(
    State(state): State<AppState>,
    body: Option<Json<PriceRequest>>,
) -> Result<Json<PriceExplanation>, AppError> {
    let Json(req) = body.unwrap_or_default();
    let explanation = state.dashboard.price(req.mode).await?;
    Ok(Json(explanation))
}

async fn list_scenarios(State(state): State<AppState>) -> Json<Vec<SavedScenario>> {
    Json(state.dashboard.context.snapshot().saved_scenarios)
}

#[derive(Debug, Default, Deserialize)]
struct SaveScenarioRequest {
    #[serde(default)]
    name: String,
}

async fn save_scenario(
    State(state): State<AppState>,
    body: Option<Json<SaveScenarioRequest>>,
) -> Result<(StatusCode, Json<SavedScenario>), AppError> {
    let Json(req) = body.unwrap_or_default();
    let store = &state.dashboard.context;
    let id = store.save_scenario(&req.name);
    let scenario = store
        .snapshot()
        .scenario(id)
        .cloned()
        .ok_or_else(|| AppError::not_found("scenario"))?;
    Ok((StatusCode::CREATED, Json(scenario)))
}

async fn load_scenario(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MarketContext>, AppError> {
    if !state.dashboard.context.load_scenario(id) {
        return Err(AppError::not_found("scenario"));
    }
    Ok(Json(state.dashboard.context.context()))
}

#[derive(Debug, Deserialize)]
struct RenameScenarioRequest {
    name: String,
}

async fn rename_scenario(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameScenarioRequest>,
) -> Result<Json<SavedScenario>, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "scenario name is empty",
        ));
    }
    let store = &state.dashboard.context;
    store.rename_scenario(id, &req.name);
    store
        .snapshot()
        .scenario(id)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::not_found("scenario"))
}

async fn delete_scenario(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !state.dashboard.context.delete_scenario(id) {
        return Err(AppError::not_found("scenario"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn get_layout(State(state): State<AppState>) -> Json<LayoutState> {
    Json(state.dashboard.layout.snapshot())
}

#[derive(Debug, Default, Deserialize)]
struct LayoutPatch {
    #[serde(default)]
    reset: bool,
    active_tab: Option<Tab>,
    toggle_panel: Option<Panel>,
    chat_width: Option<u32>,
}

async fn put_layout(
    State(state): State<AppState>,
    Json(patch): Json<LayoutPatch>,
) -> Json<LayoutState> {
    let layout = &state.dashboard.layout;
    if patch.reset {
        layout.reset();
    }
    if let Some(tab) = patch.active_tab {
        layout.set_active_tab(tab);
    }
    if let Some(panel) = patch.toggle_panel {
        layout.toggle_panel(panel);
    }
    if let Some(width) = patch.chat_width {
        layout.set_chat_width(width);
    }
    Json(layout.snapshot())
}

async fn get_chat(State(state): State<AppState>) -> Json<ChatState> {
    Json(state.dashboard.chat.snapshot())
}

fn default_stream() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    message: String,
    #[serde(default = "default_stream")]
    stream: bool,
    #[serde(default)]
    plan: bool,
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatReply {
    message: Option<ChatMessage>,
    cancelled: bool,
}

async fn post_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatReply>, AppError> {
    let session = &state.dashboard.chat_session;

    if !body.stream {
        let message = session.send(&body.message).await?;
        return Ok(Json(ChatReply {
            message: Some(message),
            cancelled: false,
        }));
    }

    let cancel = CancellationToken::new();
    let request_id = Uuid::new_v4();
    {
        let mut slot = state.chat_slot();
        if slot.is_some() {
            return Err(anyhow::Error::new(ChatBusy).into());
        }
        *slot = Some((request_id, cancel.clone()));
    }
    let opts = state.dashboard.stream_options(body.plan, body.model);
    let result = session
        .send_streaming(&body.message, &opts, cancel.clone())
        .await;
    {
        let mut slot = state.chat_slot();
        if slot.as_ref().is_some_and(|(id, _)| *id == request_id) {
            *slot = None;
        }
    }

    let message = result?;
    Ok(Json(ChatReply {
        message,
        cancelled: cancel.is_cancelled(),
    }))
}

async fn clear_chat(State(state): State<AppState>) -> StatusCode {
    let pending = state.chat_slot().take();
    if let Some((_, cancel)) = pending {
        cancel.cancel();
    }
    // An in-flight reply settles before the transcript is wiped.
    let mut rx = state.dashboard.chat.subscribe();
    let _ = rx.wait_for(|s| !s.is_streaming).await;
    state.dashboard.chat_session.clear();
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
struct DocBody {
    id: String,
    content: String,
}

async fn get_doc(State(state): State<AppState>, Path(id): Path<String>) -> Json<DocBody> {
    let content = state.dashboard.evidence.doc_content(&id).await;
    Json(DocBody { id, content })
}

async fn get_status(State(state): State<AppState>) -> Json<StatusState> {
    Json(state.dashboard.refresh_health().await)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &farecast_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use farecast_core::api::ApiClient;
    use farecast_core::storage::FileStore;
    use farecast_core::store::BackendHealth;
    use futures_util::StreamExt;
    use std::time::Duration;

    // Nothing listens on the discard port, so every backend call fails fast.
    fn state(dir: &std::path::Path) -> AppState {
        state_for("http://127.0.0.1:9", dir)
    }

    fn state_for(api_url: &str, dir: &std::path::Path) -> AppState {
        let backend = ApiClient::new(api_url, Duration::from_secs(5)).unwrap();
        let storage = FileStore::open(dir).unwrap();
        AppState::new(Dashboard::new(
            Arc::new(backend),
            Arc::new(storage),
            Duration::from_millis(10),
        ))
    }

    #[tokio::test]
    async fn context_is_validated_before_it_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let mut raw = serde_json::to_value(MarketContext::default()).unwrap();
        raw["Average_Ratings"] = json!(9);
        let err = put_context(State(state.clone()), Json(raw)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.issues[0].path, "Average_Ratings");

        let mut raw = serde_json::to_value(MarketContext::default()).unwrap();
        raw["Number_of_Riders"] = json!(90);
        let Json(ctx) = put_context(State(state.clone()), Json(raw)).await.unwrap();
        assert_eq!(ctx.number_of_riders, 90);
        assert_eq!(state.dashboard.context.context().number_of_riders, 90);
    }

    #[tokio::test]
    async fn scenario_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let body = Some(Json(SaveScenarioRequest {
            name: "Friday peak".to_string(),
        }));
        let (status, Json(saved)) = save_scenario(State(state.clone()), body).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(saved.name, "Friday peak");

        let Json(list) = list_scenarios(State(state.clone())).await;
        assert_eq!(list.len(), 1);

        let rename = |name: &str| {
            Json(RenameScenarioRequest {
                name: name.to_string(),
            })
        };
        let Json(renamed) =
            rename_scenario(State(state.clone()), Path(saved.id), rename("Late peak"))
                .await
                .unwrap();
        assert_eq!(renamed.name, "Late peak");
        let err = rename_scenario(State(state.clone()), Path(saved.id), rename("  "))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        let err = rename_scenario(State(state.clone()), Path(Uuid::new_v4()), rename("x"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        assert!(load_scenario(State(state.clone()), Path(saved.id)).await.is_ok());
        assert_eq!(
            delete_scenario(State(state.clone()), Path(saved.id)).await.unwrap(),
            StatusCode::NO_CONTENT
        );
        let err = delete_scenario(State(state), Path(saved.id)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn layout_patch_applies_and_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let patch = LayoutPatch {
            active_tab: Some(Tab::Evidence),
            toggle_panel: Some(Panel::Chat),
            chat_width: Some(10),
            ..Default::default()
        };
        let Json(layout) = put_layout(State(state.clone()), Json(patch)).await;
        assert_eq!(layout.active_tab, Tab::Evidence);
        assert!(layout.collapsed_panels.contains(&Panel::Chat));
        assert_eq!(layout.chat_width, farecast_core::store::layout::MIN_CHAT_WIDTH);

        executive_tab(State(state.clone())).await;
        assert_eq!(get_layout(State(state)).await.0.active_tab, Tab::Executive);
    }

    #[tokio::test]
    async fn unreachable_backend_surfaces_as_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let err = run_price(State(state.clone()), None).await.unwrap_err();
        assert!(matches!(
            err.status,
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ));
        assert!(state.dashboard.pricing.snapshot().error.is_some());

        let Json(status) = get_status(State(state)).await;
        assert_eq!(status.health, BackendHealth::Offline);
    }

    #[tokio::test]
    async fn docs_fall_back_when_backend_is_down() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let Json(doc) = get_doc(State(state.clone()), Path("methodology".to_string())).await;
        assert!(doc.content.starts_with("# Pricing methodology"));

        let Json(doc) = get_doc(State(state), Path("unknown_id".to_string())).await;
        assert!(!doc.content.trim().is_empty());
    }

    #[tokio::test]
    async fn chat_failure_is_reported_and_clear_resets() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let body = ChatBody {
            message: "hello".to_string(),
            stream: true,
            plan: false,
            model: None,
        };
        let err = post_chat(State(state.clone()), Json(body)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(state.chat_slot().is_none());

        let Json(chat) = get_chat(State(state.clone())).await;
        assert_eq!(chat.messages.len(), 1);
        assert!(chat.error.is_some());

        assert_eq!(clear_chat(State(state.clone())).await, StatusCode::NO_CONTENT);
        assert!(get_chat(State(state)).await.0.messages.is_empty());
    }

    #[tokio::test]
    async fn evidence_refresh_still_serves_a_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let query = Query(EvidenceQuery { refresh: true });
        let Json(view) = evidence_tab(State(state.clone()), query).await;
        assert!(!view.bundle.documents.is_empty());
        assert_eq!(state.dashboard.layout.snapshot().active_tab, Tab::Evidence);
    }

    async fn stalled_chat_backend() -> String {
        let app = Router::new().route(
            "/api/v1/chat",
            post(|| async {
                let first = futures_util::stream::once(async {
                    Ok::<_, std::convert::Infallible>(
                        "data: {\"type\":\"token\",\"content\":\"Partial\"}\n\n".to_string(),
                    )
                });
                let rest = futures_util::stream::pending();
                let body = axum::body::Body::from_stream(first.chain(rest));
                ([(axum::http::header::CONTENT_TYPE, "text/event-stream")], body)
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn streaming(message: &str) -> Json<ChatBody> {
        Json(ChatBody {
            message: message.to_string(),
            stream: true,
            plan: false,
            model: None,
        })
    }

    #[tokio::test]
    async fn concurrent_stream_is_refused_and_clear_still_cancels_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(&stalled_chat_backend().await, dir.path());

        let mut rx = state.dashboard.chat.subscribe();
        let first = tokio::spawn(post_chat(State(state.clone()), streaming("first")));
        rx.wait_for(|s| s.streaming_content == "Partial").await.unwrap();
        let first_id = state.chat_slot().as_ref().map(|(id, _)| *id).unwrap();

        let err = post_chat(State(state.clone()), streaming("second"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(state.chat_slot().as_ref().map(|(id, _)| *id), Some(first_id));

        assert_eq!(clear_chat(State(state.clone())).await, StatusCode::NO_CONTENT);
        let Json(reply) = first.await.unwrap().unwrap();
        assert!(reply.cancelled);

        let chat = state.dashboard.chat.snapshot();
        assert!(!chat.is_streaming);
        assert!(chat.messages.is_empty());
        assert!(state.chat_slot().is_none());
    }
}
