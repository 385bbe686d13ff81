//! API request/response types.

pub mod interactions;
pub mod stages;
