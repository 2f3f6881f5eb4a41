use crate::config::{ApiGeneration, OperatingMode};
use crate::credentials::CredentialStatus;
use crate::error::Result;
use crate::realtime::FetchStrategy;
use crate::stats::Granularity;
use crate::vendor::QueryRequest;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    /// Waiting for the next timer fire or command
    Idle,
    /// Synchronous part of a tick in progress
    Ticking,
    /// Timer cancelled, no further ticks
    ShuttingDown,
}

/// Requests accepted by the driver loop
#[derive(Debug)]
pub enum DriverCommand {
    /// Ad-hoc vendor call (manual mode)
    Query {
        request: QueryRequest,
        reply: oneshot::Sender<Result<QueryResponse>>,
    },
    ListSystems {
        reply: oneshot::Sender<Result<Vec<Value>>>,
    },
    Status {
        reply: oneshot::Sender<DriverStatus>,
    },
}

/// Reply to an ad-hoc query: the request plus the vendor's `data` verbatim
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub request: QueryRequest,
    pub data: Value,
}

/// Tick bookkeeping
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickCounters {
    pub ticks: u64,
    pub documents: u64,
    pub skipped: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_document_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub granularity: Granularity,
    pub cadence_minutes: i64,
    pub warm: bool,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

/// Snapshot served by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct DriverStatus {
    pub state: DriverState,
    pub mode: OperatingMode,
    pub generation: ApiGeneration,
    pub serial: String,
    pub strategy: FetchStrategy,
    pub backup_enabled: bool,
    pub credential: CredentialStatus,
    pub caches: Vec<CacheStatus>,
    pub refreshes_in_flight: usize,
    pub counters: TickCounters,
}
