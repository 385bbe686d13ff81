//! HTTP request handlers.
//!
//! - [`pages`]: the HTML page
//! - [`interactions`]: upload an image and follow the session's interaction as it progresses
//! - [`stages`]: run a single stage synchronously (caption an image, or write a story for a caption)
//! - [`static_assets`]: embedded script and stylesheet

pub mod interactions;
pub mod pages;
pub mod stages;
pub mod static_assets;
