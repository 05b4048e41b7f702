use super::executor::{ExtractOptions, ExtractionPipeline};
use std::path::PathBuf;

/// Outcome of a multi-container run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Extract each container in turn. A failed container is logged and
/// recorded; the remaining containers are still processed.
pub async fn run_batch(
    pipeline: &ExtractionPipeline,
    inputs: &[PathBuf],
    options: &ExtractOptions,
) -> BatchSummary {
    let mut summary = BatchSummary::default();

    for (i, input) in inputs.iter().enumerate() {
        tracing::info!("Container {}/{}: {:?}", i + 1, inputs.len(), input);

        let failure = match pipeline.run(input, options).await {
            Ok(report) => report.failure(),
            Err(e) => Some(format!("{:#}", e)),
        };

        match failure {
            None => summary.succeeded.push(input.clone()),
            Some(reason) => {
                tracing::error!("Failed to extract {:?}: {}", input, reason);
                summary.failed.push((input.clone(), reason));
            }
        }
    }

    tracing::info!(
        "Extracted {} of {} containers",
        summary.succeeded.len(),
        summary.total()
    );
    summary
}
