use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use hashbrown::HashMap;

use crate::config::ServingConfig;
use crate::context::StatsReport;
use crate::pipelines::PipelineController;
use crate::storage::{ImageStore, StoreResult};
use crate::transform::{SizedName, TransformSpec};
use crate::validation::{self, ImageKind};

/// An image ready to be written to the response.
pub struct ServedImage {
    pub content_type: String,
    pub data: Bytes,
}

/// Ties the store, the transform pipeline and the serving rules together.
///
/// A single instance is built at startup and shared between every request.
pub struct ImageController {
    serving: ServingConfig,
    pipeline: PipelineController,
    storage: Arc<dyn ImageStore>,
    started: Instant,
}

impl ImageController {
    pub fn new(serving: ServingConfig, storage: Arc<dyn ImageStore>) -> Self {
        Self {
            serving,
            pipeline: PipelineController,
            storage,
            started: Instant::now(),
        }
    }

    #[inline]
    pub fn cfg(&self) -> &ServingConfig {
        &self.serving
    }

    pub async fn upload(&self, name: &str, data: Bytes) -> StoreResult<u64> {
        let size = self.storage.create(name, data).await?;
        info!("Stored image {:?} ({} bytes)", name, size);
        Ok(size)
    }

    /// Looks the image up and applies any requested transforms.
    ///
    /// No recognised transform parameter means the stored bytes are served
    /// untouched. Either way a found image is marked as used.
    pub async fn fetch(
        &self,
        requested: &str,
        query: &HashMap<String, String>,
    ) -> anyhow::Result<Option<ServedImage>> {
        let (name, path_size) = self.resolve_name(requested);

        let kind = match ImageKind::from_name(name) {
            Some(kind) => kind,
            None => return Ok(None),
        };

        let record = match self.storage.fetch(name).await? {
            Some(record) => record,
            None => return Ok(None),
        };

        self.touch(name).await;

        let spec = TransformSpec::from_query(
            query,
            &self.serving.truthy_tokens,
            self.serving.max_dimension,
        );

        let spec = match path_size {
            Some((width, height)) => Some(spec.unwrap_or_default().with_dimensions(width, height)),
            None => spec,
        };

        let data = match spec {
            None => record.data,
            Some(spec) => {
                self.pipeline
                    .on_fetch(kind, record.data, spec, self.serving.max_dimension)
                    .await?
                    .data
            },
        };

        Ok(Some(ServedImage {
            content_type: validation::content_type(name),
            data,
        }))
    }

    pub async fn exists(&self, name: &str) -> StoreResult<bool> {
        self.storage.exists(name).await
    }

    pub async fn delete(&self, name: &str) -> StoreResult<()> {
        self.storage.delete(name).await?;
        info!("Deleted image {:?}", name);
        Ok(())
    }

    /// `None` if the backend cannot aggregate its contents.
    pub async fn stats(&self) -> StoreResult<Option<StatsReport>> {
        let uptime = self.started.elapsed().as_secs_f64();
        let stats = self.storage.stats().await?;
        Ok(stats.map(|stats| StatsReport::new(stats, uptime)))
    }

    /// Records the usage, a failure is logged but never fails the request.
    async fn touch(&self, name: &str) {
        if let Err(e) = self.storage.touch_used(name, Utc::now()).await {
            warn!("Failed to mark image {:?} as used: {}", name, e);
        }
    }

    fn resolve_name<'a>(&self, requested: &'a str) -> (&'a str, Option<(Option<u32>, Option<u32>)>) {
        if !self.serving.path_sizing {
            return (requested, None);
        }

        match SizedName::parse(requested, self.serving.max_dimension) {
            Some(sized) => (sized.name, Some((sized.width, sized.height))),
            None => (requested, None),
        }
    }
}
