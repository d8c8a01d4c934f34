//! HTTP server module
//!
//! This module handles HTTP request routing and handling:
//! - Axum router with the stream, health and debug endpoints
//! - Request handlers and the JSON error mapping
//! - CORS middleware

pub mod handlers;
pub mod routes;

pub use routes::create_router;
