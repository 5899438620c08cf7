use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::StoreStats;

/// The body returned for a successful upload.
///
/// ```json
/// {"status": "ok", "size": 5120}
/// ```
#[derive(Debug, Serialize)]
pub struct UploadInfo {
    pub status: &'static str,

    /// The number of bytes stored.
    pub size: u64,
}

impl UploadInfo {
    pub fn ok(size: u64) -> Self {
        Self { status: "ok", size }
    }
}

/// The body returned when the store refused an upload.
///
/// ```json
/// {"status": "error", "code": "DUPLICATE_NAME"}
/// ```
#[derive(Debug, Serialize)]
pub struct UploadFailed {
    pub status: &'static str,
    pub code: &'static str,
}

impl UploadFailed {
    pub fn new(code: &'static str) -> Self {
        Self { status: "error", code }
    }
}

/// Aggregate usage of the whole store plus the process uptime.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    /// The number of stored images.
    pub total: u64,

    /// The combined size of every stored image in bytes.
    pub size: u64,

    /// The most recent usage of any image.
    pub last_used: Option<DateTime<Utc>>,

    /// Seconds since the server started.
    pub uptime: f64,
}

impl StatsReport {
    pub fn new(stats: StoreStats, uptime: f64) -> Self {
        Self {
            total: stats.total,
            size: stats.size,
            last_used: stats.last_used,
            uptime,
        }
    }
}
