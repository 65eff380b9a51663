//! Core library for `secman`.
//!
//! Contains the keyring, the encryption barrier with its quorum unseal,
//! per-engine logical storage, the engine registry and request dispatcher,
//! the auth chain, and the [`Core`](core::Core) that orchestrates them. This
//! crate depends on `secman-storage` for the physical storage trait and knows
//! nothing about HTTP.

pub mod auth;
pub mod barrier;
pub mod core;
pub mod crypto;
pub mod dispatcher;
pub mod engine;
pub mod engines;
pub mod error;
pub mod keyring;
pub mod logical_storage;
pub mod quorum;
pub mod registry;
pub mod root_token;
