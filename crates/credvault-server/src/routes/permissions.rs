//! Permission routes: `/api/v1/permissions/*`
//!
//! Endpoints:
//! - `GET    /api/v1/permissions?path=...`: entries on a path
//! - `POST   /api/v1/permissions`: grant operations
//! - `DELETE /api/v1/permissions?path=...&actor=...`: revoke an entry
//! - `GET    /api/v1/permissions/{id}`: one entry
//! - `PUT    /api/v1/permissions/{id}`: replace an entry's operations

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use credvault_core::permission::{PermissionEntry, PermissionOperation};

use crate::error::AppError;
use crate::middleware::Actor;
use crate::state::AppState;

/// Build the permission router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/",
            get(list_permissions)
                .post(add_permissions)
                .delete(delete_permission),
        )
        .route("/{id}", get(get_permission).put(replace_permission))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct EntryQuery {
    pub path: String,
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub path: String,
    pub actor: String,
    pub operations: BTreeSet<PermissionOperation>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceRequest {
    pub operations: BTreeSet<PermissionOperation>,
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub path: String,
    pub permissions: Vec<PermissionEntry>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn list_permissions(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<PathQuery>,
) -> Result<Json<PermissionsResponse>, AppError> {
    let permissions = state
        .permissions
        .get_permissions(actor.as_str(), &query.path)
        .await?;
    Ok(Json(PermissionsResponse {
        path: query.path,
        permissions,
    }))
}

async fn add_permissions(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<GrantRequest>,
) -> Result<Json<PermissionEntry>, AppError> {
    let entry = state
        .permissions
        .add_permissions(actor.as_str(), &body.path, &body.actor, body.operations)
        .await?;
    Ok(Json(entry))
}

async fn delete_permission(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<EntryQuery>,
) -> Result<Json<PermissionEntry>, AppError> {
    let entry = state
        .permissions
        .delete_permission(actor.as_str(), &query.path, &query.actor)
        .await?;
    Ok(Json(entry))
}

async fn get_permission(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<PermissionEntry>, AppError> {
    let entry = state.permissions.get_by_uuid(actor.as_str(), id).await?;
    Ok(Json(entry))
}

async fn replace_permission(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReplaceRequest>,
) -> Result<Json<PermissionEntry>, AppError> {
    let entry = state
        .permissions
        .replace_permissions(actor.as_str(), id, body.operations)
        .await?;
    Ok(Json(entry))
}
