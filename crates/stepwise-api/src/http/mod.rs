//! HTTP/REST API layer for Stepwise.
//!
//! Axum-based REST API at `/api/v1/` with an envelope response format and
//! CORS support, plus the demo trigger routes under `/workflow/`.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
