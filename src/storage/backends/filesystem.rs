use std::fs::{File, FileTimes, Metadata};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::storage::retention::RetentionPolicy;
use crate::storage::{ImageRecord, ImageStore, StoreError, StoreResult};
use crate::validation::ImageKind;

/// Stores each image as a plain file named after it.
///
/// The filesystem itself provides the timestamps: the mtime is the creation
/// date and an atime set later than that by a usage touch is the last use.
/// Writes go straight to the target file, so a crash mid-write can leave a
/// truncated image behind.
pub struct FileSystemBackend {
    directory: PathBuf,
}

impl FileSystemBackend {
    pub async fn new(dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { directory: dir })
    }

    /// Maps a name onto a file directly inside the root directory.
    #[inline]
    fn format_path(&self, name: &str) -> StoreResult<PathBuf> {
        let candidate = Path::new(name);
        let mut components = candidate.components();

        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) if part == candidate.as_os_str() => {
                Ok(self.directory.join(part))
            },
            _ => Err(StoreError::InvalidName(name.to_string())),
        }
    }
}

fn timestamps(meta: &Metadata) -> std::io::Result<(DateTime<Utc>, Option<DateTime<Utc>>)> {
    let created = DateTime::<Utc>::from(meta.modified()?);
    let used = meta
        .accessed()
        .ok()
        .map(DateTime::<Utc>::from)
        .filter(|used| *used > created);

    Ok((created, used))
}

async fn blocking<T, F>(func: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(func)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?
}

#[async_trait]
impl ImageStore for FileSystemBackend {
    async fn create(&self, name: &str, data: Bytes) -> StoreResult<u64> {
        let path = self.format_path(name)?;

        debug!("Storing image @ {:?}", &path);
        tokio::fs::write(&path, &data).await?;

        Ok(data.len() as u64)
    }

    async fn fetch(&self, name: &str) -> StoreResult<Option<ImageRecord>> {
        let path = match self.format_path(name) {
            Ok(path) => path,
            Err(_) => return Ok(None),
        };

        debug!("Retrieving image @ {:?}", &path);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(other) => return Err(other.into()),
        };

        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(other) => return Err(other.into()),
        };
        let (date_created, date_used) = timestamps(&meta)?;

        Ok(Some(ImageRecord {
            name: name.to_string(),
            size: data.len() as u64,
            data: Bytes::from(data),
            date_created,
            date_used,
        }))
    }

    async fn exists(&self, name: &str) -> StoreResult<bool> {
        let path = match self.format_path(name) {
            Ok(path) => path,
            Err(_) => return Ok(false),
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(other) => Err(other.into()),
        }
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        let path = self
            .format_path(name)
            .map_err(|_| StoreError::NotFound(name.to_string()))?;

        debug!("Purging image @ {:?}", &path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            },
            Err(other) => Err(other.into()),
        }
    }

    async fn touch_used(&self, name: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let path = match self.format_path(name) {
            Ok(path) => path,
            Err(_) => return Ok(()),
        };

        blocking(move || {
            let file = match File::options().write(true).open(&path) {
                Ok(file) => file,
                Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                Err(other) => return Err(other.into()),
            };

            let (_, current) = timestamps(&file.metadata()?)?;
            if current.map_or(true, |current| at > current) {
                file.set_times(FileTimes::new().set_accessed(SystemTime::from(at)))?;
            }

            Ok(())
        })
        .await
    }

    async fn sweep_expired(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        let mut purged = 0;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let name = match file_name.to_str() {
                Some(name) if ImageKind::from_name(name).is_some() => name,
                _ => continue,
            };

            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }

            let (created, used) = timestamps(&meta)?;
            if !policy.is_expired(created, used, now) {
                continue;
            }

            debug!("Expiring image {:?}", name);
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => purged += 1,
                Err(ref e) if e.kind() == ErrorKind::NotFound => continue,
                Err(other) => return Err(other.into()),
            }
        }

        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    async fn backend() -> (tempfile::TempDir, FileSystemBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileSystemBackend::new(dir.path().join("images")).await.unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn create_then_fetch_roundtrips() {
        let (_dir, backend) = backend().await;

        let size = backend.create("cat.png", Bytes::from_static(b"meow")).await.unwrap();
        assert_eq!(size, 4);

        let record = backend.fetch("cat.png").await.unwrap().unwrap();
        assert_eq!(record.data.as_ref(), b"meow");
        assert_eq!(record.size, 4);
        assert!(backend.exists("cat.png").await.unwrap());
    }

    #[tokio::test]
    async fn create_overwrites_silently() {
        let (_dir, backend) = backend().await;

        backend.create("cat.png", Bytes::from_static(b"one")).await.unwrap();
        backend.create("cat.png", Bytes::from_static(b"second")).await.unwrap();

        let record = backend.fetch("cat.png").await.unwrap().unwrap();
        assert_eq!(record.data.as_ref(), b"second");
    }

    #[tokio::test]
    async fn deleting_a_missing_file_fails() {
        let (_dir, backend) = backend().await;

        backend.create("cat.png", Bytes::from_static(b"meow")).await.unwrap();
        backend.delete("cat.png").await.unwrap();

        assert!(backend.fetch("cat.png").await.unwrap().is_none());
        assert!(matches!(
            backend.delete("cat.png").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn names_cannot_escape_the_directory() {
        let (_dir, backend) = backend().await;

        assert!(matches!(
            backend.create("../cat.png", Bytes::from_static(b"meow")).await,
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            backend.create("nested/cat.png", Bytes::from_static(b"meow")).await,
            Err(StoreError::InvalidName(_))
        ));
        assert!(backend.fetch("../cat.png").await.unwrap().is_none());
        assert!(!backend.exists("/etc/cat.png").await.unwrap());
    }

    #[tokio::test]
    async fn touch_only_moves_forward() {
        let (_dir, backend) = backend().await;
        backend.create("cat.png", Bytes::from_static(b"meow")).await.unwrap();

        let later = Utc::now() + Duration::hours(2);
        backend.touch_used("cat.png", later).await.unwrap();
        backend
            .touch_used("cat.png", later - Duration::hours(1))
            .await
            .unwrap();

        let used = backend
            .fetch("cat.png")
            .await
            .unwrap()
            .unwrap()
            .date_used
            .unwrap();
        assert!((used - later).num_milliseconds().abs() < 1000);
    }

    #[tokio::test]
    async fn sweep_follows_retention_policy() {
        let (_dir, backend) = backend().await;
        let policy = RetentionPolicy::default();

        backend.create("unused.png", Bytes::from_static(b"a")).await.unwrap();
        backend.create("used.png", Bytes::from_static(b"b")).await.unwrap();

        let now = Utc::now();
        backend
            .touch_used("used.png", now + Duration::seconds(1))
            .await
            .unwrap();

        let purged = backend
            .sweep_expired(&policy, now + Duration::days(8))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(!backend.exists("unused.png").await.unwrap());
        assert!(backend.exists("used.png").await.unwrap());

        let purged = backend
            .sweep_expired(&policy, now + Duration::days(32))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(!backend.exists("used.png").await.unwrap());
    }

    #[tokio::test]
    async fn has_no_stats() {
        let (_dir, backend) = backend().await;
        assert!(backend.stats().await.unwrap().is_none());
    }
}
