use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

use super::retention::RetentionPolicy;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend enforces unique names and one already exists.
    #[error("An image named {0:?} already exists.")]
    DuplicateName(String),

    /// Raised by backends that do not treat deletes as idempotent.
    #[error("Image {0:?} does not exist.")]
    NotFound(String),

    /// The name cannot be mapped onto the backend's key space.
    #[error("Image name {0:?} is not usable by this backend.")]
    InvalidName(String),

    #[error("Storage backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// The machine readable code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateName(_) => "DUPLICATE_NAME",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidName(_) => "INVALID_NAME",
            Self::Backend(_) => "IO_FAILURE",
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Backend(e.into())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend(e.into())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.into())
    }
}

impl From<base64::DecodeError> for StoreError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Backend(e.into())
    }
}

/// A single stored image.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub name: String,

    /// The byte length of `data` at creation time.
    pub size: u64,

    pub data: Bytes,

    pub date_created: DateTime<Utc>,

    /// The last successful retrieval, if there ever was one.
    pub date_used: Option<DateTime<Utc>>,
}

/// Aggregate usage across the whole store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub total: u64,
    pub size: u64,
    pub last_used: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ImageStore: Sync + Send + 'static {
    /// Stores the payload under `name`, returning its size.
    ///
    /// Whether an existing name is overwritten or rejected is up to the backend.
    async fn create(&self, name: &str, data: Bytes) -> StoreResult<u64>;

    async fn fetch(&self, name: &str) -> StoreResult<Option<ImageRecord>>;

    /// Must not count as a use of the image.
    async fn exists(&self, name: &str) -> StoreResult<bool>;

    async fn delete(&self, name: &str) -> StoreResult<()>;

    /// Marks the image as used at `at`. The stored value never moves backwards.
    async fn touch_used(&self, name: &str, at: DateTime<Utc>) -> StoreResult<()>;

    /// `None` when the backend has no way of aggregating its contents.
    async fn stats(&self) -> StoreResult<Option<StoreStats>> {
        Ok(None)
    }

    /// Removes every image the policy considers expired as of `now`,
    /// returning how many were purged.
    async fn sweep_expired(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[inline]
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

#[inline]
pub(crate) fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("Invalid timestamp {} in store.", ms)))
}
