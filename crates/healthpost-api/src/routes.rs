use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use chrono::Utc;
use healthpost_core::apply::{ApplyEngine, ApplyError};
use healthpost_core::models::{EntityKind, InventoryItem, Operation, Payload, PatientRecord};
use healthpost_core::protocol::{BatchResponse, RecordResponse};
use healthpost_core::util::user_fingerprint;
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    engine: ApplyEngine,
    jwt_verifier: Arc<JwtVerifier>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, engine: ApplyEngine) -> Self {
        Self {
            jwt_verifier: Arc::new(JwtVerifier::new(
                &config.jwt_secret,
                config.auth_clock_skew,
            )),
            engine,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync", post(sync_batch))
        .route("/inventory", get(list_inventory).post(create_inventory))
        .route("/patients", get(list_patients).post(create_patient))
        .route("/{table}/{id}", put(update_record).delete(delete_record))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt_verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn sync_batch(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<Value>,
) -> Result<Json<BatchResponse>, AppError> {
    let user_hash = user_fingerprint(&user.user_id);
    let response = state
        .engine
        .apply_batch(&user.user_id, &body, state.config.batch_policy())
        .await?;
    tracing::info!(
        endpoint = "sync",
        user = user_hash,
        processed = response.processed,
        "Applied sync batch"
    );
    Ok(Json(response))
}

async fn list_inventory(
    State(state): State<AppState>,
) -> Result<Json<Vec<InventoryItem>>, AppError> {
    Ok(Json(state.engine.list_inventory().await?))
}

async fn list_patients(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<PatientRecord>>, AppError> {
    Ok(Json(state.engine.list_patients(&user.user_id).await?))
}

async fn create_inventory(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<Value>,
) -> Result<Json<RecordResponse>, AppError> {
    let op = Operation::create(EntityKind::InventoryItem, object_body(body)?);
    apply_single(&state, &user, &op, "inventory_create").await
}

async fn create_patient(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<Value>,
) -> Result<Json<RecordResponse>, AppError> {
    let op = Operation::create(EntityKind::PatientRecord, object_body(body)?);
    apply_single(&state, &user, &op, "patient_create").await
}

async fn update_record(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((table, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<RecordResponse>, AppError> {
    let (entity, id) = address(&table, &id)?;
    let op = Operation::update(entity, id, object_body(body)?);
    apply_single(&state, &user, &op, "record_update").await
}

async fn delete_record(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<RecordResponse>, AppError> {
    let (entity, id) = address(&table, &id)?;
    apply_single(&state, &user, &Operation::delete(entity, id), "record_delete").await
}

async fn apply_single(
    state: &AppState,
    user: &AuthenticatedUser,
    op: &Operation,
    endpoint: &'static str,
) -> Result<Json<RecordResponse>, AppError> {
    let user_hash = user_fingerprint(&user.user_id);
    let outcome = state.engine.apply(&user.user_id, op).await?;
    tracing::info!(
        endpoint,
        user = user_hash,
        action = %outcome.action(),
        id = outcome.id,
        "Applied record operation"
    );
    Ok(Json(RecordResponse::from(outcome)))
}

fn address(table: &str, id: &str) -> Result<(EntityKind, i64), ApplyError> {
    let entity = table
        .parse::<EntityKind>()
        .map_err(|_| ApplyError::NotFound(format!("Unknown table: {table}")))?;
    let id = id
        .trim()
        .parse::<i64>()
        .map_err(|_| ApplyError::Validation("id must be an integer".to_string()))?;
    Ok((entity, id))
}

fn object_body(body: Value) -> Result<Payload, ApplyError> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(ApplyError::Validation(
            "request body must be a JSON object".to_string(),
        )),
    }
}
