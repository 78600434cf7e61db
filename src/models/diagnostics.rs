use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Runtime diagnostics for the presence service
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    /// Active WebSocket connections on this instance
    pub n_conn: u32,
    /// Case broadcast groups with at least one local subscriber
    pub n_rooms: u32,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
}
