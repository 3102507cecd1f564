use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State, ws::WebSocketUpgrade},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use chrono::{DateTime, Duration, Utc};
use packflow_common::{LifecycleError, Stage};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;

use super::views::{self, OrderFilter, OrderSummary};
use super::workflow::{self, Actor, NewOrder, NewUser, Workflow};
use super::ws::{self, WsMessage, broadcast_message};
use crate::auth::{self, Role, Session, SessionStore};
use crate::contact;
use crate::errors::{OmsError, StoreError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub workflow: Workflow,
    pub sessions: SessionStore,
    pub ws_tx: broadcast::Sender<String>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(workflow: Workflow, ws_tx: broadcast::Sender<String>) -> Self {
        let ttl = Duration::hours(workflow.settings().auth.session_ttl_hours.max(1));
        Self {
            workflow,
            sessions: SessionStore::new(ttl),
            ws_tx,
        }
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct AdminNotesRequest {
    pub notes: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct AdvanceRequest {
    /// Stage the client believes the order is in.
    pub expected_stage: Option<String>,
}

#[derive(Deserialize)]
pub struct StageRequest {
    pub stage: String,
}

#[derive(Deserialize)]
pub struct NewCategoryRequest {
    pub product_type: String,
    pub name: String,
}

#[derive(Deserialize, Default)]
pub struct UploadParams {
    pub filename: Option<String>,
}

#[derive(Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

#[derive(Serialize)]
pub struct SessionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub username: String,
    pub name: String,
    pub role: Role,
    pub stages: Vec<Stage>,
    pub expires_at: DateTime<Utc>,
}

impl SessionResponse {
    fn new(session: &Session, include_token: bool) -> Self {
        Self {
            token: include_token.then(|| session.token.clone()),
            username: session.username.clone(),
            name: session.name.clone(),
            role: session.role,
            stages: session.role.stages(),
            expires_at: session.expires_at,
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unauthorized(String),
    Forbidden(String),
    PayloadTooLarge(String),
    BadGateway(String),
    Internal(String),
}

impl From<OmsError> for ApiError {
    fn from(err: OmsError) -> Self {
        let message = err.to_string();
        match err {
            OmsError::OrderNotFound { .. } | OmsError::FileMissing { .. } => ApiError::NotFound(message),
            OmsError::Lifecycle(inner) => match inner {
                LifecycleError::UnknownFileSlot { .. } => ApiError::NotFound(message),
                LifecycleError::NotInPipeline { .. } | LifecycleError::UnknownDetailField { .. } => {
                    ApiError::BadRequest(message)
                }
                _ => ApiError::Conflict(message),
            },
            OmsError::Validation(_) => ApiError::BadRequest(message),
            OmsError::Unauthorized => ApiError::Unauthorized(message),
            OmsError::Forbidden { .. } => ApiError::Forbidden(message),
            OmsError::PayloadTooLarge { .. } => ApiError::PayloadTooLarge(message),
            OmsError::Store(StoreError::InvalidPath(_)) => ApiError::BadRequest(message),
            OmsError::Store(_) => {
                tracing::error!(error = %message, "document store failure");
                ApiError::BadGateway(message)
            }
            OmsError::Other(_) => {
                tracing::error!(error = %message, "internal error");
                ApiError::Internal(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Authentication ────────────────────────────────────────────────────

/// The session behind the request's bearer token.
pub struct CurrentUser(pub Session);

impl CurrentUser {
    fn actor(&self) -> Actor {
        Actor::from(&self.0)
    }
}

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(auth::bearer_token)
            .ok_or(OmsError::Unauthorized)?;
        let session = state
            .sessions
            .get(token)
            .await
            .ok_or(OmsError::Unauthorized)?;
        Ok(CurrentUser(session))
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/orders", get(list_orders).post(create_order))
        .route("/api/orders/{key}", get(get_order).delete(delete_order))
        .route("/api/board", get(get_board))
        .route("/api/departments/{stage}", get(get_department))
        .route("/api/orders/{key}/details/{stage}", patch(update_details))
        .route("/api/orders/{key}/admin-notes", put(set_admin_notes))
        .route("/api/orders/{key}/timer/{stage}/start", post(start_timer))
        .route("/api/orders/{key}/timer/{stage}/stop", post(stop_timer))
        .route(
            "/api/orders/{key}/files/{slot}",
            put(upload_file).get(download_file),
        )
        .route("/api/orders/{key}/readiness", get(get_readiness))
        .route("/api/orders/{key}/advance", post(advance_order))
        .route("/api/orders/{key}/stage", put(override_stage))
        .route("/api/orders/{key}/sheet.pdf", get(order_sheet))
        .route("/api/orders/{key}/qr", get(tracking_qr))
        .route("/api/orders/{key}/slips/{stage}", get(stage_slip))
        .route("/api/orders/{key}/share", get(share_links))
        .route("/api/categories", get(list_categories).post(add_category))
        .route("/api/customers", get(list_customers))
        .route("/api/customers/{name}/orders", get(customer_orders))
        .route("/api/analytics", get(get_analytics))
        .route("/api/export.csv", get(export_csv))
        .route("/api/users", get(list_users).post(save_user))
}

// ── Helpers ───────────────────────────────────────────────────────────

fn order_updated(state: &SharedState, order: &packflow_common::Order) {
    broadcast_message(
        &state.ws_tx,
        &WsMessage::OrderUpdated {
            order: OrderSummary::from(order),
        },
    );
}

/// A file download with a sanitised attachment name.
fn attachment(bytes: Vec<u8>, mime: &str, filename: &str) -> Response {
    let safe: String = filename
        .chars()
        .map(|c| if c == '"' || c.is_control() { '_' } else { c })
        .collect();
    (
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", safe),
            ),
        ],
        bytes,
    )
        .into_response()
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state.workflow.login(&req.username, &req.password).await?;
    let session = state.sessions.create(&user).await;
    Ok(Json(SessionResponse::new(&session, true)))
}

async fn logout(State(state): State<SharedState>, user: CurrentUser) -> ApiResult<impl IntoResponse> {
    state.sessions.remove(&user.0.token).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(user: CurrentUser) -> ApiResult<impl IntoResponse> {
    Ok(Json(SessionResponse::new(&user.0, false)))
}

async fn list_orders(
    State(state): State<SharedState>,
    _user: CurrentUser,
    Query(filter): Query<OrderFilter>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.workflow.list_orders(&filter).await?))
}

async fn create_order(
    State(state): State<SharedState>,
    user: CurrentUser,
    Json(req): Json<NewOrder>,
) -> ApiResult<impl IntoResponse> {
    let order = state.workflow.create_order(&user.actor(), req).await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::OrderCreated {
            order: OrderSummary::from(&order),
        },
    );
    let whatsapp_url = contact::whatsapp_link(
        &order.customer_phone,
        &order.order_id,
        &order.customer,
        &order.tracking_url,
        &state.workflow.settings().company.name,
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "order": views::order_detail(&order),
            "whatsapp_url": whatsapp_url,
        })),
    ))
}

async fn get_order(
    State(state): State<SharedState>,
    _user: CurrentUser,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let order = state.workflow.order(&key).await?;
    Ok(Json(views::order_detail(&order)))
}

async fn delete_order(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state.workflow.delete_order(&user.actor(), &key).await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::OrderDeleted {
            key,
            order_id: deleted.map(|o| o.order_id),
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn get_board(State(state): State<SharedState>, _user: CurrentUser) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.workflow.board().await?))
}

async fn get_department(
    State(state): State<SharedState>,
    _user: CurrentUser,
    Path(stage): Path<String>,
    Query(filter): Query<OrderFilter>,
) -> ApiResult<impl IntoResponse> {
    let stage = workflow::parse_stage(&stage)?;
    Ok(Json(state.workflow.department(stage, &filter).await?))
}

async fn update_details(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path((key, stage)): Path<(String, String)>,
    Json(updates): Json<Map<String, Value>>,
) -> ApiResult<impl IntoResponse> {
    let stage = workflow::parse_stage(&stage)?;
    let order = state
        .workflow
        .update_details(&user.actor(), &key, stage, &updates)
        .await?;
    order_updated(&state, &order);
    Ok(Json(views::order_detail(&order)))
}

async fn set_admin_notes(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(key): Path<String>,
    Json(req): Json<AdminNotesRequest>,
) -> ApiResult<impl IntoResponse> {
    let order = state
        .workflow
        .set_admin_notes(&user.actor(), &key, &req.notes)
        .await?;
    order_updated(&state, &order);
    Ok(Json(views::order_detail(&order)))
}

async fn start_timer(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path((key, stage)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let stage = workflow::parse_stage(&stage)?;
    let order = state.workflow.start_timer(&user.actor(), &key, stage).await?;
    order_updated(&state, &order);
    Ok(Json(views::order_detail(&order)))
}

async fn stop_timer(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path((key, stage)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let stage = workflow::parse_stage(&stage)?;
    let order = state.workflow.stop_timer(&user.actor(), &key, stage).await?;
    order_updated(&state, &order);
    Ok(Json(views::order_detail(&order)))
}

async fn upload_file(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path((key, slot)): Path<(String, String)>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let filename = params.filename.unwrap_or_default();
    let order = state
        .workflow
        .upload_file(&user.actor(), &key, &slot, &body, &filename)
        .await?;
    order_updated(&state, &order);
    Ok(Json(views::order_detail(&order)))
}

async fn download_file(
    State(state): State<SharedState>,
    _user: CurrentUser,
    Path((key, slot)): Path<(String, String)>,
) -> ApiResult<Response> {
    let file = state.workflow.download_file(&key, &slot).await?;
    Ok(attachment(file.bytes, file.mime, &file.filename))
}

async fn get_readiness(
    State(state): State<SharedState>,
    _user: CurrentUser,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.workflow.readiness(&key).await?))
}

async fn advance_order(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(key): Path<String>,
    Json(req): Json<AdvanceRequest>,
) -> ApiResult<impl IntoResponse> {
    let expected = req
        .expected_stage
        .as_deref()
        .map(workflow::parse_stage)
        .transpose()?;
    let advanced = state.workflow.advance(&user.actor(), &key, expected).await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::StageAdvanced {
            key,
            order_id: advanced.order.order_id.clone(),
            from: advanced.from,
            to: advanced.to,
        },
    );
    Ok(Json(views::order_detail(&advanced.order)))
}

async fn override_stage(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path(key): Path<String>,
    Json(req): Json<StageRequest>,
) -> ApiResult<impl IntoResponse> {
    let target = workflow::parse_stage(&req.stage)?;
    let moved = state.workflow.override_stage(&user.actor(), &key, target).await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::StageAdvanced {
            key,
            order_id: moved.order.order_id.clone(),
            from: moved.from,
            to: moved.to,
        },
    );
    Ok(Json(views::order_detail(&moved.order)))
}

async fn order_sheet(
    State(state): State<SharedState>,
    _user: CurrentUser,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    let (order, pdf) = state.workflow.order_sheet(&key).await?;
    Ok(attachment(pdf, "application/pdf", &format!("{}_order.pdf", order.order_id)))
}

async fn tracking_qr(
    State(state): State<SharedState>,
    _user: CurrentUser,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    let (order, png) = state.workflow.tracking_qr(&key).await?;
    Ok(attachment(png, "image/png", &format!("{}_qr.png", order.order_id)))
}

async fn stage_slip(
    State(state): State<SharedState>,
    user: CurrentUser,
    Path((key, stage)): Path<(String, String)>,
) -> ApiResult<Response> {
    let stage = workflow::parse_stage(&stage)?;
    let (order, pdf) = state.workflow.stage_slip(&user.actor(), &key, stage).await?;
    let name = if stage == Stage::Dispatch {
        format!("{}_delivery_note.pdf", order.order_id)
    } else {
        format!("{}_{}_slip.pdf", order.order_id, stage.as_str().to_lowercase())
    };
    Ok(attachment(pdf, "application/pdf", &name))
}

async fn share_links(
    State(state): State<SharedState>,
    _user: CurrentUser,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.workflow.share(&key).await?))
}

async fn list_categories(
    State(state): State<SharedState>,
    _user: CurrentUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.workflow.categories().await?))
}

async fn add_category(
    State(state): State<SharedState>,
    user: CurrentUser,
    Json(req): Json<NewCategoryRequest>,
) -> ApiResult<impl IntoResponse> {
    let categories = state
        .workflow
        .add_category(&user.actor(), &req.product_type, &req.name)
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::CategoriesUpdated {
            categories: categories.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(categories)))
}

async fn list_customers(
    State(state): State<SharedState>,
    _user: CurrentUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.workflow.customers().await?))
}

async fn customer_orders(
    State(state): State<SharedState>,
    _user: CurrentUser,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.workflow.previous_orders(&name).await?))
}

async fn get_analytics(State(state): State<SharedState>, user: CurrentUser) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.workflow.analytics(&user.actor()).await?))
}

async fn export_csv(
    State(state): State<SharedState>,
    user: CurrentUser,
    Query(filter): Query<OrderFilter>,
) -> ApiResult<Response> {
    let csv = state.workflow.export_csv(&user.actor(), &filter).await?;
    Ok(attachment(csv.into_bytes(), "text/csv; charset=utf-8", "orders.csv"))
}

async fn list_users(State(state): State<SharedState>, user: CurrentUser) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.workflow.list_users(&user.actor()).await?))
}

async fn save_user(
    State(state): State<SharedState>,
    user: CurrentUser,
    Json(req): Json<NewUser>,
) -> ApiResult<impl IntoResponse> {
    let saved = state.workflow.save_user(&user.actor(), req).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// `/ws?token=<session token>`. Browsers cannot set headers on a WebSocket
/// handshake, so the token travels in the query string.
pub async fn ws_feed(
    State(state): State<SharedState>,
    Query(params): Query<WsParams>,
    upgrade: WebSocketUpgrade,
) -> ApiResult<Response> {
    let token = params.token.ok_or(OmsError::Unauthorized)?;
    state
        .sessions
        .get(&token)
        .await
        .ok_or(OmsError::Unauthorized)?;
    Ok(ws::ws_handler_with_sender(upgrade, state.ws_tx.clone())
        .await
        .into_response())
}
