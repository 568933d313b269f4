//! # API Endpoint Handlers
//!
//! The engine is synchronous; every handler moves its work onto the
//! blocking pool so redb commits never stall the async workers.

use super::{
    AppState,
    auth::CurrentUser,
    error::ApiError,
    types::{
        AccrueRequest, AccrueResponse, AddMemberRequest, ArchiveResponse, ChainResponse,
        CompleteResponse, CreateChainRequest, HealthResponse, InstanceJson, InstanceResponse,
        MemberJson, MemberResponse, SweepResponse,
    },
};
use crate::services::Services;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use footprint_core::{ChainId, FootprintError, InstanceId, UserId};
use std::sync::Arc;

/// Run `op` against the services on the blocking pool.
async fn blocking<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Services) -> Result<T, FootprintError> + Send + 'static,
{
    let services = Arc::clone(&state.services);
    tokio::task::spawn_blocking(move || op(&services))
        .await
        .map_err(|e| ApiError::internal(format!("worker task failed: {}", e)))?
        .map_err(ApiError::from)
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// CHAIN HANDLERS
// =============================================================================

/// Create a chain at its first stage with the caller as owner.
pub async fn create_chain_handler(
    State(state): State<AppState>,
    CurrentUser(creator): CurrentUser,
    Json(request): Json<CreateChainRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new_chain = request.into_new_chain(creator);
    let view = blocking(&state, move |s| s.engine.create_chain(&new_chain)).await?;
    Ok((StatusCode::CREATED, Json(InstanceResponse::from(&view))))
}

/// All instances of a chain, oldest stage first.
pub async fn chain_handler(
    State(state): State<AppState>,
    Path(chain_id): Path<u64>,
) -> Result<Json<ChainResponse>, ApiError> {
    let instances = blocking(&state, move |s| s.engine.chain(ChainId(chain_id))).await?;
    Ok(Json(ChainResponse::new(chain_id, &instances)))
}

// =============================================================================
// INSTANCE HANDLERS
// =============================================================================

/// Instance with roster and progress.
pub async fn instance_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<u64>,
) -> Result<Json<InstanceResponse>, ApiError> {
    let view = blocking(&state, move |s| {
        s.engine.instance_view(InstanceId(instance_id))
    })
    .await?;
    Ok(Json(InstanceResponse::from(&view)))
}

/// Accept an invitation on the caller's authority.
pub async fn add_member_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<u64>,
    CurrentUser(inviter): CurrentUser,
    Json(request): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let member = blocking(&state, move |s| {
        s.engine.add_member(
            InstanceId(instance_id),
            inviter,
            UserId(request.user_id),
            request.role,
        )
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(MemberResponse {
            success: true,
            member: MemberJson::from(&member),
        }),
    ))
}

/// Mark the caller's part of the current stage done.
pub async fn complete_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<u64>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<CompleteResponse>, ApiError> {
    let outcome = blocking(&state, move |s| {
        s.engine.complete_stage(InstanceId(instance_id), user)
    })
    .await?;
    Ok(Json(CompleteResponse::from(outcome)))
}

/// Apply a session-stop event for the caller.
pub async fn accrue_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<u64>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<AccrueRequest>,
) -> Result<Json<AccrueResponse>, ApiError> {
    let accrual = blocking(&state, move |s| {
        s.estimator
            .accrue(InstanceId(instance_id), user, request.elapsed_seconds)
    })
    .await?;
    Ok(Json(AccrueResponse::from(&accrual)))
}

/// Archive an instance. Owner only.
pub async fn archive_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<u64>,
    CurrentUser(actor): CurrentUser,
) -> Result<Json<ArchiveResponse>, ApiError> {
    let instance = blocking(&state, move |s| {
        s.engine.archive(InstanceId(instance_id), actor)
    })
    .await?;
    Ok(Json(ArchiveResponse {
        success: true,
        instance: InstanceJson::from(&instance),
    }))
}

// =============================================================================
// SWEEP HANDLER
// =============================================================================

/// Run a completion sweep now.
pub async fn sweep_handler(State(state): State<AppState>) -> Result<Json<SweepResponse>, ApiError> {
    let report = blocking(&state, |s| s.engine.sweep()).await?;
    Ok(Json(SweepResponse::from(report)))
}
