use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde::Deserialize;

use crate::storage::retention::RetentionPolicy;
use crate::storage::template::{from_millis, to_millis};
use crate::storage::{ImageRecord, ImageStore, StoreError, StoreResult, StoreStats};

/// Every stored name, used for stats and expiry sweeps.
const INDEX_KEY: &str = "images";
const KEY_PREFIX: &str = "image:";

/// Only moves `date_used` forwards and never resurrects a deleted image.
static TOUCH_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return 0
        end
        local current = redis.call('HGET', KEYS[1], 'date_used')
        if current and tonumber(current) >= tonumber(ARGV[1]) then
            return 0
        end
        redis.call('HSET', KEYS[1], 'date_used', ARGV[1])
        return 1
        "#,
    )
});

/// Re-checks one image against the cutoffs and purges it only if it is
/// still expired, so a touch or re-upload racing the sweep wins.
///
/// An index entry whose hash is already gone is dropped without counting.
static SWEEP_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local fields = redis.call('HMGET', KEYS[1], 'date_created', 'date_used')
        local created = tonumber(fields[1])
        local used = tonumber(fields[2])
        if created == nil then
            redis.call('SREM', KEYS[2], ARGV[1])
            return 0
        end
        local expired
        if used == nil then
            expired = created < tonumber(ARGV[2])
        else
            expired = used < tonumber(ARGV[3])
        end
        if not expired then
            return 0
        end
        redis.call('DEL', KEYS[1])
        redis.call('SREM', KEYS[2], ARGV[1])
        return 1
        "#,
    )
});

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    connection_uri: String,

    #[serde(default = "default_pool_size")]
    pool_size: usize,
}

const fn default_pool_size() -> usize {
    4
}

struct RedisPool {
    connections: Vec<ConnectionManager>,
    index: AtomicUsize,
}

impl RedisPool {
    pub async fn connect(cfg: &RedisConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(cfg.connection_uri.as_str())?;
        let mut conns = Vec::new();
        for _ in 0..cfg.pool_size.max(1) {
            let conn = client.get_tokio_connection_manager().await?;
            conns.push(conn);
        }

        Ok(Self {
            connections: conns,
            index: AtomicUsize::new(0),
        })
    }

    pub fn get(&self) -> ConnectionManager {
        let index = self.index.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[index].clone()
    }
}

/// Stores each image as a hash of flat fields, the payload base64 encoded.
pub struct RedisBackend {
    pool: RedisPool,
}

impl RedisBackend {
    pub async fn connect(cfg: &RedisConfig) -> anyhow::Result<Self> {
        let pool = RedisPool::connect(cfg).await?;

        Ok(Self { pool })
    }
}

#[inline]
fn record_key(name: &str) -> String {
    format!("{}{}", KEY_PREFIX, name)
}

/// The field map written for a freshly created image.
fn to_fields(name: &str, data: &[u8], created: DateTime<Utc>) -> Vec<(&'static str, String)> {
    vec![
        ("name", name.to_string()),
        ("size", data.len().to_string()),
        ("data", base64::encode(data)),
        ("date_created", to_millis(created).to_string()),
    ]
}

fn parse_field<T: std::str::FromStr>(fields: &HashMap<String, String>, key: &str) -> StoreResult<T> {
    fields
        .get(key)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("Image hash is missing a valid {:?} field.", key)))
}

/// Rebuilds a record from its hash, `None` for a missing key.
fn from_fields(fields: HashMap<String, String>) -> StoreResult<Option<ImageRecord>> {
    if fields.is_empty() {
        return Ok(None);
    }

    let data = fields
        .get("data")
        .map(base64::decode)
        .transpose()?
        .unwrap_or_default();

    let date_used = match fields.get("date_used") {
        Some(raw) => Some(from_millis(raw.parse().map_err(anyhow::Error::from)?)?),
        None => None,
    };

    Ok(Some(ImageRecord {
        name: parse_field(&fields, "name")?,
        size: parse_field(&fields, "size")?,
        data: Bytes::from(data),
        date_created: from_millis(parse_field(&fields, "date_created")?)?,
        date_used,
    }))
}

/// Splits a two field `HMGET` reply.
#[inline]
fn pair(row: &[Option<i64>]) -> (Option<i64>, Option<i64>) {
    let field = |i: usize| row.get(i).copied().flatten();
    (field(0), field(1))
}

/// Folds `HMGET size date_used` replies into store wide stats.
fn accumulate_stats(rows: &[Vec<Option<i64>>]) -> StoreResult<StoreStats> {
    let mut stats = StoreStats::default();

    for row in rows {
        let (size, used) = pair(row);
        // Deleted between the two round trips.
        let size = match size {
            Some(size) => size,
            None => continue,
        };

        stats.total += 1;
        stats.size += size.max(0) as u64;

        if let Some(used) = used {
            let used = from_millis(used)?;
            if stats.last_used.map_or(true, |last| used > last) {
                stats.last_used = Some(used);
            }
        }
    }

    Ok(stats)
}

/// Picks the names whose `HMGET date_created date_used` reply looks expired.
///
/// This is only a pre-filter, each candidate is re-checked atomically before
/// it is removed. Names whose hash is missing are included so their index
/// entry gets cleaned up.
fn expiry_candidates<'a>(
    names: &'a [String],
    rows: &[Vec<Option<i64>>],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> StoreResult<Vec<&'a str>> {
    let mut candidates = Vec::new();

    for (name, row) in names.iter().zip(rows) {
        let (created, used) = pair(row);
        let created = match created {
            Some(created) => from_millis(created)?,
            None => {
                candidates.push(name.as_str());
                continue;
            },
        };

        let used = used.map(from_millis).transpose()?;
        if policy.is_expired(created, used, now) {
            candidates.push(name.as_str());
        }
    }

    Ok(candidates)
}

#[async_trait]
impl ImageStore for RedisBackend {
    async fn create(&self, name: &str, data: Bytes) -> StoreResult<u64> {
        let key = record_key(name);
        let fields = to_fields(name, &data, Utc::now());

        let mut conn = self.pool.get();
        let _: () = redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &fields)
            .ignore()
            .sadd(INDEX_KEY, name)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(data.len() as u64)
    }

    async fn fetch(&self, name: &str) -> StoreResult<Option<ImageRecord>> {
        let key = record_key(name);
        let mut conn = self.pool.get();

        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        from_fields(fields)
    }

    async fn exists(&self, name: &str) -> StoreResult<bool> {
        let mut conn = self.pool.get();
        Ok(conn.exists(record_key(name)).await?)
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        let mut conn = self.pool.get();
        let _: () = redis::pipe()
            .atomic()
            .del(record_key(name))
            .ignore()
            .srem(INDEX_KEY, name)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn touch_used(&self, name: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut conn = self.pool.get();
        let _: i64 = TOUCH_SCRIPT
            .key(record_key(name))
            .arg(to_millis(at))
            .invoke_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn stats(&self) -> StoreResult<Option<StoreStats>> {
        let mut conn = self.pool.get();
        let names: Vec<String> = conn.smembers(INDEX_KEY).await?;

        if names.is_empty() {
            return Ok(Some(StoreStats::default()));
        }

        let mut pipe = redis::pipe();
        for name in &names {
            pipe.cmd("HMGET").arg(record_key(name)).arg("size").arg("date_used");
        }

        let rows: Vec<Vec<Option<i64>>> = pipe.query_async(&mut conn).await?;
        Ok(Some(accumulate_stats(&rows)?))
    }

    async fn sweep_expired(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut conn = self.pool.get();
        let names: Vec<String> = conn.smembers(INDEX_KEY).await?;
        if names.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        for name in &names {
            pipe.cmd("HMGET").arg(record_key(name)).arg("date_created").arg("date_used");
        }
        let rows: Vec<Vec<Option<i64>>> = pipe.query_async(&mut conn).await?;

        let candidates = expiry_candidates(&names, &rows, policy, now)?;
        let cutoffs = policy.cutoffs(now);

        let mut purged = 0;
        for name in candidates {
            let removed: i64 = SWEEP_SCRIPT
                .key(record_key(name))
                .key(INDEX_KEY)
                .arg(name)
                .arg(to_millis(cutoffs.created_before))
                .arg(to_millis(cutoffs.used_before))
                .invoke_async(&mut conn)
                .await?;

            if removed > 0 {
                debug!("Expiring image {:?}", name);
                purged += 1;
            }
        }

        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_map(fields: Vec<(&'static str, String)>) -> HashMap<String, String> {
        fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn payload_is_base64_in_the_hash() {
        let fields = as_map(to_fields("cat.png", &[0xff, 0x00, 0x10], Utc::now()));
        assert_eq!(fields["data"], "/wAQ");
        assert_eq!(fields["size"], "3");
        assert!(!fields.contains_key("date_used"));
    }

    #[test]
    fn record_survives_the_field_map() {
        let created = Utc::now();
        let mut fields = as_map(to_fields("cat.png", b"meow", created));
        fields.insert("date_used".to_string(), to_millis(created).to_string());

        let record = from_fields(fields).unwrap().unwrap();
        assert_eq!(record.name, "cat.png");
        assert_eq!(record.size, 4);
        assert_eq!(record.data.as_ref(), b"meow");
        assert_eq!(record.date_created.timestamp_millis(), created.timestamp_millis());
        assert_eq!(record.date_used.unwrap().timestamp_millis(), created.timestamp_millis());
    }

    #[test]
    fn missing_hash_is_no_record() {
        assert!(from_fields(HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn corrupt_hash_is_an_error() {
        let mut fields = as_map(to_fields("cat.png", b"meow", Utc::now()));
        fields.insert("data".to_string(), "***".to_string());
        assert!(matches!(from_fields(fields), Err(StoreError::Backend(_))));
    }

    #[test]
    fn hmget_replies_tolerate_missing_fields() {
        assert_eq!(pair(&[Some(4), None]), (Some(4), None));
        assert_eq!(pair(&[]), (None, None));
    }

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(record_key("cat.png"), "image:cat.png");
    }

    #[test]
    fn stats_skip_vanished_hashes() {
        let used = Utc::now();
        let rows = vec![
            vec![Some(4), None],
            vec![None, None],
            vec![Some(6), Some(to_millis(used))],
        ];

        let stats = accumulate_stats(&rows).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.size, 10);
        assert_eq!(
            stats.last_used.map(|t| t.timestamp_millis()),
            Some(used.timestamp_millis())
        );
    }

    #[test]
    fn candidates_follow_retention_policy() {
        let policy = RetentionPolicy::default();
        let now = Utc::now();
        let days_ago = |days: i64| Some(to_millis(now - chrono::Duration::days(days)));

        let names: Vec<String> = ["fresh.png", "unused.png", "recent.png", "stale.png", "gone.png"]
            .iter()
            .map(|n| n.to_string())
            .collect();
        let rows = vec![
            vec![days_ago(1), None],
            vec![days_ago(8), None],
            vec![days_ago(90), days_ago(29)],
            vec![days_ago(90), days_ago(31)],
            vec![None, None],
        ];

        let candidates = expiry_candidates(&names, &rows, &policy, now).unwrap();
        assert_eq!(candidates, vec!["unused.png", "stale.png", "gone.png"]);
    }

    /// Runs against a live server when `IMAGINI_TEST_REDIS` is set.
    async fn live_backend() -> Option<RedisBackend> {
        let uri = std::env::var("IMAGINI_TEST_REDIS").ok()?;
        let cfg = RedisConfig {
            connection_uri: uri,
            pool_size: 1,
        };
        Some(RedisBackend::connect(&cfg).await.unwrap())
    }

    #[tokio::test]
    async fn live_store_contract() {
        let backend = match live_backend().await {
            Some(backend) => backend,
            None => return,
        };

        let name = "imagini-test-contract.png";
        backend.delete(name).await.unwrap();

        assert_eq!(backend.create(name, Bytes::from_static(b"meow")).await.unwrap(), 4);
        assert!(backend.exists(name).await.unwrap());

        let record = backend.fetch(name).await.unwrap().unwrap();
        assert_eq!(record.data.as_ref(), b"meow");
        assert!(record.date_used.is_none());

        let later = Utc::now() + chrono::Duration::hours(1);
        backend.touch_used(name, later).await.unwrap();
        backend.touch_used(name, later - chrono::Duration::minutes(5)).await.unwrap();
        let used = backend.fetch(name).await.unwrap().unwrap().date_used.unwrap();
        assert_eq!(used.timestamp_millis(), later.timestamp_millis());

        let stats = backend.stats().await.unwrap().unwrap();
        assert!(stats.total >= 1);

        backend.delete(name).await.unwrap();
        assert!(!backend.exists(name).await.unwrap());
        assert!(backend.fetch(name).await.unwrap().is_none());
        backend.delete(name).await.unwrap();
    }

    #[tokio::test]
    async fn live_sweep_spares_touched_images() {
        let backend = match live_backend().await {
            Some(backend) => backend,
            None => return,
        };
        let policy = RetentionPolicy::default();

        let name = "imagini-test-sweep.png";
        backend.create(name, Bytes::from_static(b"meow")).await.unwrap();

        let now = Utc::now();
        backend.touch_used(name, now).await.unwrap();

        let purged = backend
            .sweep_expired(&policy, now + chrono::Duration::days(29))
            .await
            .unwrap();
        assert_eq!(purged, 0);
        assert!(backend.exists(name).await.unwrap());

        backend
            .sweep_expired(&policy, now + chrono::Duration::days(31))
            .await
            .unwrap();
        assert!(!backend.exists(name).await.unwrap());
    }
}
