//! `secman` HTTP server.
//!
//! Wires the core library and a storage backend into a running Axum server.
//! Lifecycle routes live under `/api/sys/*` and every engine is reachable
//! through the catch-all `/api/engine/*`.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
