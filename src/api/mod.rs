//! HTTP API Module
//!
//! Provides a REST API over the volume controller's operations.

mod http;
pub mod types;

pub use http::{AppState, HttpServer};
