use anyhow::{Context, Result};
use mkv_extract_av::{
    export_streams, extract_metadata, extract_timestamps, inspect_streams, is_complete,
    verify_streams, write_timestamps, Artifacts, ExportOptions, ExportReport, IntegrityReport,
    MetadataRecord, StreamKind, StreamMap, ToolRegistry, VerifyOptions,
};
use std::path::{Path, PathBuf};

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(f32, &str) + Send + Sync>;

/// Per-run choices for one container.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Artifact prefix; defaults to the container path without extension.
    pub output_prefix: Option<PathBuf>,
    /// Verify the exports and remove the container if they match.
    pub delete: bool,
    /// Redo every step even when its artifacts exist.
    pub overwrite: bool,
    pub threads: usize,
    pub verify: VerifyOptions,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            output_prefix: None,
            delete: false,
            overwrite: false,
            threads: 8,
            verify: VerifyOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The artifact already existed.
    Skipped,
    Completed,
}

/// What happened to one container.
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    pub input: PathBuf,
    pub streams: StreamMap,
    pub metadata: StepStatus,
    pub timestamps: StepStatus,
    pub export: StepStatus,
    /// Present when the export step ran.
    pub exports: Option<ExportReport>,
    /// Present when verification ran.
    pub integrity: Option<IntegrityReport>,
}

impl ExtractionReport {
    pub fn succeeded(&self) -> bool {
        self.failure().is_none()
    }

    /// Why the container counts as failed, if it does.
    pub fn failure(&self) -> Option<String> {
        if let Some(exports) = &self.exports {
            if !exports.is_success() {
                let tags: Vec<&str> = exports.failures().map(|s| s.tag.as_str()).collect();
                return Some(format!("stream export failed: {}", tags.join(", ")));
            }
        }
        match &self.integrity {
            Some(integrity) if !integrity.passed => Some("integrity check failed".to_string()),
            _ => None,
        }
    }
}

/// Runs metadata, timestamp and stream extraction for containers, skipping
/// work whose output already exists.
pub struct ExtractionPipeline {
    tools: ToolRegistry,
    progress_callback: Option<ProgressCallback>,
}

impl ExtractionPipeline {
    pub fn new(tools: ToolRegistry) -> Self {
        Self {
            tools,
            progress_callback: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    fn report_progress(&self, progress: f32, step: &str) {
        if let Some(ref cb) = self.progress_callback {
            cb(progress, step);
        }
        tracing::info!("[{:.0}%] {}", progress, step);
    }

    /// Extract one container.
    ///
    /// Returns an error only for hard failures (missing tools, unreadable
    /// container, probe or I/O errors). Failed exports and failed
    /// verification are reported through [`ExtractionReport::failure`].
    ///
    /// A container that is gone but whose artifacts are all in place was
    /// removed by an earlier verified run; every step is skipped.
    pub async fn run(&self, input: &Path, options: &ExtractOptions) -> Result<ExtractionReport> {
        let artifacts = Artifacts::new(input, options.output_prefix.as_deref())?;

        if !input.exists() {
            return self.resume_without_source(&artifacts, options).await;
        }

        if let Some(dir) = artifacts.prefix().parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create output directory: {:?}", dir))?;
            }
        }

        tracing::info!("Processing {:?}", input);
        let streams = inspect_streams(&self.tools, input).await;
        for tag in streams.unknown_tags() {
            tracing::warn!("{:?} has a stream tagged {} with no export profile", input, tag);
        }

        self.report_progress(0.0, "Extracting metadata");
        let metadata = self
            .metadata_step(&artifacts, options)
            .await
            .with_context(|| format!("Failed to extract metadata from {:?}", input))?;

        self.report_progress(25.0, "Extracting timestamps");
        let timestamps = self
            .timestamps_step(&artifacts, &streams, options)
            .await
            .with_context(|| format!("Failed to extract timestamps from {:?}", input))?;

        self.report_progress(50.0, "Exporting streams");
        let (export, exports) = self
            .export_step(&artifacts, &streams, options)
            .await
            .with_context(|| format!("Failed to export streams from {:?}", input))?;

        let mut report = ExtractionReport {
            input: input.to_path_buf(),
            streams,
            metadata,
            timestamps,
            export,
            exports,
            integrity: None,
        };

        if !report.succeeded() {
            tracing::error!("Not verifying {:?}: exports incomplete", input);
            return Ok(report);
        }

        if options.delete {
            self.report_progress(75.0, "Verifying extraction");
            let verify = VerifyOptions {
                delete: true,
                ..options.verify.clone()
            };
            let integrity = verify_streams(&self.tools, &artifacts, &report.streams, &verify)
                .await
                .with_context(|| format!("Failed to verify extraction of {:?}", input))?;
            report.integrity = Some(integrity);
        }

        self.report_progress(100.0, "Done");
        Ok(report)
    }

    async fn resume_without_source(
        &self,
        artifacts: &Artifacts,
        options: &ExtractOptions,
    ) -> Result<ExtractionReport> {
        let input = artifacts.input();
        let metadata_path = artifacts.metadata_path();
        if options.overwrite
            || !is_complete(&metadata_path)
            || !is_complete(&artifacts.timestamps_path())
        {
            anyhow::bail!("Input file does not exist: {:?}", input);
        }

        let streams = MetadataRecord::read_from(&metadata_path)
            .with_context(|| format!("Failed to read {:?}", metadata_path))?
            .stream_map();
        let exported: Vec<PathBuf> = streams
            .known()
            .map(|(kind, _)| artifacts.stream_path(kind))
            .collect();
        if exported.is_empty() || !exported.iter().all(|p| is_complete(p)) {
            anyhow::bail!("Input file does not exist: {:?}", input);
        }

        tracing::info!("{:?} already deleted, extraction is complete", input);
        let integrity = verify_streams(&self.tools, artifacts, &streams, &options.verify)
            .await
            .with_context(|| format!("Failed to verify extraction of {:?}", input))?;

        Ok(ExtractionReport {
            input: input.to_path_buf(),
            streams,
            metadata: StepStatus::Skipped,
            timestamps: StepStatus::Skipped,
            export: StepStatus::Skipped,
            exports: None,
            integrity: Some(integrity),
        })
    }

    async fn metadata_step(&self, artifacts: &Artifacts, options: &ExtractOptions) -> Result<StepStatus> {
        let path = artifacts.metadata_path();
        if !options.overwrite && is_complete(&path) {
            tracing::info!("Metadata already exists at {:?}, continuing", path);
            return Ok(StepStatus::Skipped);
        }

        let record = extract_metadata(&self.tools, artifacts.input()).await?;
        record.write_to(&path)?;
        tracing::info!("Wrote metadata to {:?}", path);
        Ok(StepStatus::Completed)
    }

    async fn timestamps_step(
        &self,
        artifacts: &Artifacts,
        streams: &StreamMap,
        options: &ExtractOptions,
    ) -> Result<StepStatus> {
        let path = artifacts.timestamps_path();
        if !options.overwrite && is_complete(&path) {
            tracing::info!("Timestamps already exist at {:?}, continuing", path);
            return Ok(StepStatus::Skipped);
        }

        let index = streams.index_of(StreamKind::Depth).unwrap_or_else(|| {
            tracing::warn!("No DEPTH stream in {:?}, reading timestamps of stream 0", artifacts.input());
            0
        });
        let series = extract_timestamps(&self.tools, artifacts.input(), index, options.threads).await?;
        write_timestamps(&path, &series)?;
        tracing::info!("Wrote {} timestamps to {:?}", series.len(), path);
        Ok(StepStatus::Completed)
    }

    async fn export_step(
        &self,
        artifacts: &Artifacts,
        streams: &StreamMap,
        options: &ExtractOptions,
    ) -> Result<(StepStatus, Option<ExportReport>)> {
        let expected: Vec<PathBuf> = streams
            .known()
            .map(|(kind, _)| artifacts.stream_path(kind))
            .collect();

        if !options.overwrite && !expected.is_empty() && expected.iter().all(|p| is_complete(p)) {
            tracing::info!("Streams already exported for {:?}, continuing", artifacts.input());
            return Ok((StepStatus::Skipped, None));
        }

        let export = ExportOptions {
            threads: options.threads,
        };
        let report = export_streams(&self.tools, artifacts, streams, &export).await?;
        Ok((StepStatus::Completed, Some(report)))
    }
}
