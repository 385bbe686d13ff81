//! HTTP surface of the service.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response bodies
//! - **[`session`]**: Browser session extractor
//!
//! The JSON API lives under `/api/v1`; the page at `/` drives it from the browser. Documentation is
//! served at `/docs`.

pub mod handlers;
pub mod models;
pub mod session;
