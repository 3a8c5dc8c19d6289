//! Remote API boundary: payload types and the HTTP client

pub mod client;
pub mod models;

pub use client::ApiClient;
pub use models::*;
