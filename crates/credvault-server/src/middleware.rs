//! Actor extraction.
//!
//! Authentication happens in front of this server; the authenticating proxy
//! forwards the caller's identity in the `X-Credvault-Actor` header. The
//! middleware turns it into an [`Actor`] request extension.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;

/// Header carrying the caller identity.
pub const ACTOR_HEADER: &str = "x-credvault-actor";

/// Opaque caller identity, e.g. `uaa-user:1234` or `mtls-app:abcd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

impl Actor {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Reject requests without a non-empty actor header.
pub async fn actor_middleware(mut req: Request, next: Next) -> Response {
    let actor = req
        .headers()
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned);

    let Some(actor) = actor else {
        return AppError::Unauthorized(format!("missing {ACTOR_HEADER} header")).into_response();
    };

    req.extensions_mut().insert(Actor(actor));
    next.run(req).await
}
