use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::filesystem::FileSystemBackend;
use super::redis::{RedisBackend, RedisConfig};
use super::sql::{DatabaseConfig, MySQLBackend, PostgresBackend, SqliteBackend};
use crate::storage::ImageStore;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendConfigs {
    Postgres(DatabaseConfig),
    MySql(DatabaseConfig),
    Sqlite(DatabaseConfig),
    Redis(RedisConfig),
    FileSystem {
        directory: PathBuf,
    },
}

impl BackendConfigs {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::MySql(_) => "mysql",
            Self::Sqlite(_) => "sqlite",
            Self::Redis(_) => "redis",
            Self::FileSystem { .. } => "filesystem",
        }
    }

    pub async fn connect(&self) -> anyhow::Result<Arc<dyn ImageStore>> {
        info!("Connecting to {} storage backend", self.name());

        let backend: Arc<dyn ImageStore> = match self {
            Self::Postgres(cfg) => Arc::new(PostgresBackend::connect(cfg).await?),
            Self::MySql(cfg) => Arc::new(MySQLBackend::connect(cfg).await?),
            Self::Sqlite(cfg) => Arc::new(SqliteBackend::connect(cfg).await?),
            Self::Redis(cfg) => Arc::new(RedisBackend::connect(cfg).await?),
            Self::FileSystem { directory } => {
                Arc::new(FileSystemBackend::new(directory.clone()).await?)
            },
        };

        Ok(backend)
    }
}
