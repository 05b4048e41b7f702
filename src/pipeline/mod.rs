mod batch;
mod executor;

pub use batch::{run_batch, BatchSummary};
pub use executor::{
    ExtractOptions, ExtractionPipeline, ExtractionReport, ProgressCallback, StepStatus,
};
