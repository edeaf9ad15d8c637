//! Certificate routes: `/api/v1/certificates/*`
//!
//! Endpoints:
//! - `GET    /api/v1/certificates[?name=...]`: summaries with signing relations
//! - `POST   /api/v1/certificates/{id}/regenerate`: new version of one certificate
//! - `PUT    /api/v1/certificates/{id}/update_transitional_version`: move the transitional flag
//! - `GET    /api/v1/certificates/{id}/versions[?current=true]`: versions
//! - `POST   /api/v1/certificates/{id}/versions`: import a version
//! - `DELETE /api/v1/certificates/{id}/versions/{version_id}`: delete a version

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use credvault_core::credential::CertificateValue;
use credvault_core::view::{CertificateSummary, CredentialView};

use crate::error::AppError;
use crate::middleware::Actor;
use crate::state::AppState;

/// Build the certificate router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_certificates))
        .route("/{id}/regenerate", post(regenerate))
        .route(
            "/{id}/update_transitional_version",
            put(update_transitional_version),
        )
        .route("/{id}/versions", get(list_versions).post(create_version))
        .route("/{id}/versions/{version_id}", delete(delete_version))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CurrentQuery {
    #[serde(default)]
    pub current: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegenerateRequest {
    pub set_as_transitional: bool,
}

#[derive(Debug, Deserialize)]
pub struct TransitionalRequest {
    /// Version to mark; `null` clears the flag.
    pub version: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateVersionRequest {
    pub value: CertificateValue,
    #[serde(default)]
    pub transitional: bool,
}

#[derive(Debug, Serialize)]
pub struct CertificatesResponse {
    pub certificates: Vec<CertificateSummary>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn list_certificates(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ListQuery>,
) -> Result<Json<CertificatesResponse>, AppError> {
    let certificates = match query.name {
        Some(name) => vec![
            state
                .certificates
                .get_by_name(actor.as_str(), &name)
                .await?,
        ],
        None => state.certificates.get_all(actor.as_str()).await?,
    };
    Ok(Json(CertificatesResponse { certificates }))
}

async fn regenerate(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    body: Option<Json<RegenerateRequest>>,
) -> Result<Json<CredentialView>, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let view = state
        .certificates
        .regenerate(actor.as_str(), id, body.set_as_transitional)
        .await?;
    Ok(Json(view))
}

async fn update_transitional_version(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(body): Json<TransitionalRequest>,
) -> Result<Json<Vec<CredentialView>>, AppError> {
    let views = state
        .certificates
        .set_transitional_version(actor.as_str(), id, body.version)
        .await?;
    Ok(Json(views))
}

async fn list_versions(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Query(query): Query<CurrentQuery>,
) -> Result<Json<Vec<CredentialView>>, AppError> {
    let views = state
        .certificates
        .get_versions(actor.as_str(), id, query.current)
        .await?;
    Ok(Json(views))
}

async fn create_version(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(body): Json<CreateVersionRequest>,
) -> Result<Json<CredentialView>, AppError> {
    let view = state
        .certificates
        .create_version(actor.as_str(), id, body.value, body.transitional)
        .await?;
    Ok(Json(view))
}

async fn delete_version(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path((id, version_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CredentialView>, AppError> {
    let view = state
        .certificates
        .delete_version(actor.as_str(), id, version_id)
        .await?;
    Ok(Json(view))
}
