//! REST API module for external integrations
//!
//! Provides a read-only HTTP API over FailoverServices plus the health and
//! metrics endpoints.

mod dto;
mod handlers;
mod server;

pub use dto::{ErrorResponse, FailoverServiceListResponse, FailoverServiceSummary, HealthResponse};
pub use server::{router, run_server};
