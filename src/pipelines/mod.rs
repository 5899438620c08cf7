use std::time::{Duration, Instant};

use anyhow::anyhow;
use bytes::Bytes;

use crate::placeholder::{self, PlaceholderParams};
use crate::processor;
use crate::transform::TransformSpec;
use crate::validation::ImageKind;

pub struct ExecutionResult {
    /// The encoded image.
    pub data: Bytes,

    /// The time taken to execute the pipeline.
    pub execution_time: Duration,
}

/// Runs image work on the rayon pool so the async workers stay free
/// for other requests.
#[derive(Clone, Copy, Default)]
pub struct PipelineController;

impl PipelineController {
    /// Transforms a stored image, keeping its original format.
    pub async fn on_fetch(
        &self,
        kind: ImageKind,
        data: Bytes,
        spec: TransformSpec,
        max_dimension: u32,
    ) -> anyhow::Result<ExecutionResult> {
        let result =
            execute(move || processor::transform(&data, &spec, kind, max_dimension)).await?;

        debug!(
            "Transformed {} image in {:?}",
            kind.as_ref(),
            result.execution_time,
        );

        Ok(result)
    }

    pub async fn on_placeholder(&self, params: PlaceholderParams) -> anyhow::Result<ExecutionResult> {
        let result = execute(move || placeholder::render(&params)).await?;

        debug!("Rendered placeholder in {:?}", result.execution_time);

        Ok(result)
    }
}

async fn execute<F>(func: F) -> anyhow::Result<ExecutionResult>
where
    F: FnOnce() -> anyhow::Result<Bytes> + Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();

    rayon::spawn(move || {
        let instant = Instant::now();
        let result = func().map(|data| ExecutionResult {
            data,
            execution_time: instant.elapsed(),
        });

        // The receiver only goes away if the request was dropped.
        let _ = tx.send(result);
    });

    rx.await
        .map_err(|_| anyhow!("Image worker exited without responding."))?
}
