//! Admin HTTP API using Axum.
//!
//! Provides endpoints for:
//! - Health checks (/healthz, /livez, /readyz)
//! - Metrics (/metrics)
//! - Runtime stats (/stats)
//! - Batch intake and inspection (/batches)
//! - Per-message control and confirmations (/schedules)

mod handlers;
mod server;

pub use handlers::{
    ApiError, BatchAccepted, CreateBatchRequest, PauseRequest, ResumeRequest, ScheduleAccepted,
    StatsResponse,
};
pub use server::{AdminServer, AdminState};
