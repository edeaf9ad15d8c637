//! Credential routes: `/api/v1/*`
//!
//! Endpoints:
//! - `GET    /api/v1/data?name=...[&versions=N|&current=true]`: read by name
//! - `GET    /api/v1/data/{id}`: read one version
//! - `PUT    /api/v1/data`: set a value
//! - `POST   /api/v1/data`: generate
//! - `DELETE /api/v1/data?name=...`: delete a credential
//! - `GET    /api/v1/find?path=...` or `?name_like=...`: search
//! - `POST   /api/v1/regenerate`: regenerate one credential
//! - `POST   /api/v1/bulk-regenerate`: regenerate everything a CA signs

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use credvault_core::credential::CredentialValue;
use credvault_core::parameters::{GenerationParameters, WriteMode};
use credvault_core::view::{CredentialView, FoundCredential};

use crate::error::AppError;
use crate::middleware::Actor;
use crate::state::AppState;

/// Build the credential router. `bulk-regenerate` is mounted separately
/// behind a concurrency limit.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/data",
            get(read_by_name)
                .put(set_credential)
                .post(generate_credential)
                .delete(delete_credential),
        )
        .route("/data/{id}", get(read_version))
        .route("/find", get(find))
        .route("/regenerate", post(regenerate))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: String,
    /// Return at most this many versions, newest first.
    #[serde(default)]
    pub versions: Option<usize>,
    /// Return only the newest version.
    #[serde(default)]
    pub current: bool,
}

#[derive(Debug, Deserialize)]
pub struct FindQuery {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub name_like: Option<String>,
}

/// Body of `PUT /api/v1/data`: `{"name", "type", "value", "metadata"}`.
#[derive(Debug, Deserialize)]
pub struct SetRequest {
    pub name: String,
    #[serde(flatten)]
    pub value: CredentialValue,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Body of `POST /api/v1/data`: `{"name", "type", "parameters", "mode", "metadata"}`.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub name: String,
    #[serde(flatten)]
    pub parameters: GenerationParameters,
    #[serde(default)]
    pub mode: WriteMode,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkRegenerateRequest {
    pub signed_by: String,
}

#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub data: Vec<CredentialView>,
}

#[derive(Debug, Serialize)]
pub struct FindResponse {
    pub credentials: Vec<FoundCredential>,
}

#[derive(Debug, Serialize)]
pub struct BulkRegenerateResponse {
    pub regenerated_credentials: Vec<String>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn read_by_name(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<NameQuery>,
) -> Result<Json<DataResponse>, AppError> {
    let data = if query.current {
        vec![
            state
                .credentials
                .get_by_name(actor.as_str(), &query.name)
                .await?,
        ]
    } else {
        state
            .credentials
            .get_versions(actor.as_str(), &query.name, query.versions)
            .await?
    };
    Ok(Json(DataResponse { data }))
}

async fn read_version(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<CredentialView>, AppError> {
    let view = state.credentials.get_version(actor.as_str(), id).await?;
    Ok(Json(view))
}

async fn set_credential(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<SetRequest>,
) -> Result<Json<CredentialView>, AppError> {
    let view = state
        .credentials
        .set(actor.as_str(), &body.name, body.value, body.metadata)
        .await?;
    Ok(Json(view))
}

async fn generate_credential(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<CredentialView>, AppError> {
    let view = state
        .credentials
        .generate(
            actor.as_str(),
            &body.name,
            body.parameters,
            body.mode,
            body.metadata,
        )
        .await?;
    Ok(Json(view))
}

async fn delete_credential(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<NameQuery>,
) -> Result<StatusCode, AppError> {
    state.credentials.delete(actor.as_str(), &query.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn find(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<FindQuery>,
) -> Result<Json<FindResponse>, AppError> {
    let credentials = match (query.path, query.name_like) {
        (Some(path), None) => state.credentials.find_by_path(actor.as_str(), &path).await?,
        (None, Some(fragment)) => {
            state
                .credentials
                .find_by_name_like(actor.as_str(), &fragment)
                .await?
        }
        _ => {
            return Err(AppError::BadRequest(
                "exactly one of 'path' or 'name_like' is required".to_owned(),
            ));
        }
    };
    Ok(Json(FindResponse { credentials }))
}

async fn regenerate(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<RegenerateRequest>,
) -> Result<Json<CredentialView>, AppError> {
    let view = state
        .credentials
        .regenerate(actor.as_str(), &body.name)
        .await?;
    Ok(Json(view))
}

pub(crate) async fn bulk_regenerate(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<BulkRegenerateRequest>,
) -> Result<Json<BulkRegenerateResponse>, AppError> {
    let regenerated = state
        .credentials
        .bulk_regenerate(actor.as_str(), &body.signed_by, &state.shutdown)
        .await?;
    Ok(Json(BulkRegenerateResponse {
        regenerated_credentials: regenerated.into_vec(),
    }))
}
