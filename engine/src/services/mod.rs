//! Infrastructure services
//!
//! - **client**: remote account client trait and its XRPC implementation
//! - **config**: engine configuration and defaults
//! - **errors**: the engine error taxonomy
//! - **session**: session store and the per-request client broker

pub mod client;
pub mod config;
pub mod errors;
pub mod session;
