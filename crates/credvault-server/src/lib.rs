//! `credvault` HTTP server.
//!
//! Wires the core services and a storage backend into an Axum JSON API
//! under `/api/v1`. Callers are identified by the `X-Credvault-Actor`
//! header set by the authenticating proxy in front of the server.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
