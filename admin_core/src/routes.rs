//! Admin HTTP routes (nested at `/admin/api` by the server).

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::crud;
use crate::error::AdminError;
use crate::field::FieldKind;
use crate::params::ListParams;
use crate::payload::Payload;
use crate::policy::{Ability, Principal};
use crate::state::AdminState;

/// Room for non-file form fields and multipart framing.
const FORM_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Build the admin router over every registered handler.
pub fn admin_router(state: AdminState) -> Router {
    let body_limit = body_limit(&state);
    Router::new()
        // Metadata
        .route("/models", get(list_models))
        .route("/models/{model}", get(describe_model))
        // Collection
        .route(
            "/{model}",
            get(list_records).post(create_record).delete(bulk_delete_records),
        )
        .route("/{model}/actions/{action}", post(run_bulk_action))
        .route("/{model}/relations/{field}/options", get(relation_options))
        // Single record
        .route(
            "/{model}/{id}",
            get(show_record)
                .put(update_record)
                .patch(update_record)
                .delete(delete_record),
        )
        .route("/{model}/{id}/actions/{action}", post(run_record_action))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Request body cap: every file field of the widest model at the upload
/// limit, plus form overhead.
fn body_limit(state: &AdminState) -> usize {
    let file_fields = state
        .registry
        .list()
        .iter()
        .map(|h| h.fields.iter().filter(|f| matches!(f.kind, FieldKind::File)).count())
        .max()
        .unwrap_or(0)
        .max(1) as u64;
    let limit = state
        .files
        .max_size_bytes()
        .saturating_mul(file_fields)
        .saturating_add(FORM_OVERHEAD_BYTES);
    usize::try_from(limit).unwrap_or(usize::MAX)
}

type QueryPairs = Query<Vec<(String, String)>>;

// ── Metadata ──

async fn list_models(
    State(state): State<AdminState>,
    principal: Principal,
) -> Json<Value> {
    let models: Vec<Value> = state
        .registry
        .list()
        .iter()
        .filter(|h| h.can(&principal, &Ability::ViewAny, None))
        .map(|h| h.describe())
        .collect();
    Json(json!({ "data": models }))
}

async fn describe_model(
    State(state): State<AdminState>,
    principal: Principal,
    Path(model): Path<String>,
) -> Result<Json<Value>, AdminError> {
    let handler = state.registry.resolve(&model)?;
    handler.authorize(&principal, &Ability::ViewAny, None)?;
    Ok(Json(json!({ "data": handler.describe() })))
}

// ── Collection ──

async fn list_records(
    State(state): State<AdminState>,
    principal: Principal,
    Path(model): Path<String>,
    Query(pairs): QueryPairs,
) -> Result<Json<Value>, AdminError> {
    let handler = state.registry.resolve(&model)?;
    let params = ListParams::from_pairs(&pairs)?;
    crud::list(&state, &handler, &principal, &params).await.map(Json)
}

async fn create_record(
    State(state): State<AdminState>,
    principal: Principal,
    Path(model): Path<String>,
    payload: Payload,
) -> Result<(StatusCode, Json<Value>), AdminError> {
    let handler = state.registry.resolve(&model)?;
    crud::create(&state, &handler, &principal, payload)
        .await
        .map(|body| (StatusCode::CREATED, Json(body)))
}

async fn bulk_delete_records(
    State(state): State<AdminState>,
    principal: Principal,
    Path(model): Path<String>,
    payload: Payload,
) -> Result<Json<Value>, AdminError> {
    let handler = state.registry.resolve(&model)?;
    let ids = crud::require_ids(&payload.fields)?;
    let deleted = crud::bulk_delete(&state, &handler, &principal, ids).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn run_bulk_action(
    State(state): State<AdminState>,
    principal: Principal,
    Path((model, action)): Path<(String, String)>,
    payload: Payload,
) -> Result<Json<Value>, AdminError> {
    let handler = state.registry.resolve(&model)?;
    crud::run_action(&state, &handler, &principal, &action, None, payload.fields)
        .await
        .map(Json)
}

#[derive(Debug, Deserialize)]
struct OptionsQuery {
    search: Option<String>,
}

async fn relation_options(
    State(state): State<AdminState>,
    principal: Principal,
    Path((model, field)): Path<(String, String)>,
    Query(query): Query<OptionsQuery>,
) -> Result<Json<Value>, AdminError> {
    let handler = state.registry.resolve(&model)?;
    crud::relation_options(&state, &handler, &principal, &field, query.search.as_deref())
        .await
        .map(Json)
}

// ── Single record ──

async fn show_record(
    State(state): State<AdminState>,
    principal: Principal,
    Path((model, id)): Path<(String, i64)>,
    Query(pairs): QueryPairs,
) -> Result<Json<Value>, AdminError> {
    let handler = state.registry.resolve(&model)?;
    let params = ListParams::from_pairs(&pairs)?;
    crud::show(&state, &handler, &principal, id, &params.with)
        .await
        .map(Json)
}

async fn update_record(
    State(state): State<AdminState>,
    principal: Principal,
    Path((model, id)): Path<(String, i64)>,
    payload: Payload,
) -> Result<Json<Value>, AdminError> {
    let handler = state.registry.resolve(&model)?;
    crud::update(&state, &handler, &principal, id, payload)
        .await
        .map(Json)
}

async fn delete_record(
    State(state): State<AdminState>,
    principal: Principal,
    Path((model, id)): Path<(String, i64)>,
) -> Result<StatusCode, AdminError> {
    let handler = state.registry.resolve(&model)?;
    crud::delete(&state, &handler, &principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn run_record_action(
    State(state): State<AdminState>,
    principal: Principal,
    Path((model, id, action)): Path<(String, i64, String)>,
    payload: Payload,
) -> Result<Json<Value>, AdminError> {
    let handler = state.registry.resolve(&model)?;
    crud::run_action(&state, &handler, &principal, &action, Some(id), payload.fields)
        .await
        .map(Json)
}
