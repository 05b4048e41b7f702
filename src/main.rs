mod cli;

use mkv_extract::{
    config,
    pipeline::{self, ExtractOptions, ExtractionPipeline},
};
use mkv_extract_av::{inspect_streams, verify_extraction, Artifacts, StreamVerdict, ToolRegistry};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mkv_extract=debug,mkv_extract_av=debug".to_string()
        } else {
            "mkv_extract=info,mkv_extract_av=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Extract {
            inputs,
            output_prefix,
            delete,
            overwrite,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(extract(
                &inputs,
                output_prefix,
                delete,
                overwrite,
                cli.config.as_deref(),
            ))
        }
        Commands::Verify {
            input,
            output_prefix,
            delete,
            chunk_size,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(verify(
                &input,
                output_prefix.as_deref(),
                delete,
                chunk_size,
                cli.config.as_deref(),
            ))
        }
        Commands::Streams { input, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(list_streams(&input, json, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mkv-extract {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn extract(
    inputs: &[PathBuf],
    output_prefix: Option<PathBuf>,
    delete: bool,
    overwrite: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    if output_prefix.is_some() && inputs.len() > 1 {
        anyhow::bail!("--output-prefix can only be used with a single input");
    }

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools);

    let options = ExtractOptions {
        output_prefix,
        delete,
        overwrite,
        threads: config.extract.threads,
        verify: config.verify.to_options(delete)?,
    };

    let pipeline = ExtractionPipeline::new(tools);
    let summary = pipeline::run_batch(&pipeline, inputs, &options).await;

    for input in &summary.succeeded {
        println!("✓ {}", input.display());
    }
    for (input, reason) in &summary.failed {
        println!("✗ {}: {}", input.display(), reason);
    }

    if !summary.is_success() {
        anyhow::bail!(
            "{} of {} containers failed",
            summary.failed.len(),
            summary.total()
        );
    }

    Ok(())
}

async fn verify(
    input: &Path,
    output_prefix: Option<&Path>,
    delete: bool,
    chunk_size: Option<usize>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools);

    let mut options = config.verify.to_options(delete)?;
    if let Some(n) = chunk_size {
        if n == 0 {
            anyhow::bail!("--chunk-size must be positive");
        }
        options.chunk_size = n;
    }

    let artifacts = Artifacts::new(input, output_prefix)?;
    let report = verify_extraction(&tools, &artifacts, &options).await?;

    for check in &report.streams {
        let line = match &check.verdict {
            StreamVerdict::Verified { frames } => format!("✓ {}: {} frames match", check.kind, frames),
            StreamVerdict::Missing { path } => format!("✗ {}: {} is missing", check.kind, path.display()),
            StreamVerdict::Mismatch { chunks } => {
                format!("✗ {}: {} chunks differ {:?}", check.kind, chunks.len(), chunks)
            }
            StreamVerdict::LengthMismatch { expected, found } => {
                format!("✗ {}: exported {} of {} frames", check.kind, found, expected)
            }
            StreamVerdict::SourceGone => format!("- {}: container already removed", check.kind),
        };
        println!("{}", line);
    }

    if report.deleted {
        println!("Deleted {}", input.display());
    }

    if !report.passed {
        anyhow::bail!("Integrity check failed for {:?}", input);
    }

    Ok(())
}

async fn list_streams(input: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("File does not exist: {:?}", input);
    }

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools);
    let artifacts = Artifacts::new(input, None)?;
    let streams = inspect_streams(&tools, input).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&streams)?);
        return Ok(());
    }

    println!("File: {}", input.display());
    for entry in streams.entries() {
        match entry.kind() {
            Ok(kind) => {
                let profile = kind.profile();
                println!(
                    "  [{}] {} -> {} ({}, {})",
                    entry.index,
                    entry.tag,
                    artifacts.stream_path(kind).display(),
                    profile.codec,
                    profile.pixel_format
                );
            }
            Err(_) => println!("  [{}] {} (no export profile)", entry.index, entry.tag),
        }
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if !all_ok {
        anyhow::bail!("ffmpeg and ffprobe are both required");
    }
    println!("All required tools are available!");

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  Tool timeout: {}s", config.tools.timeout_secs);
    println!("  Export timeout: {}s", config.tools.export_timeout_secs);
    println!("  Extract threads: {}", config.extract.threads);
    println!("  Verify chunk size: {}", config.verify.chunk_size);
    println!("  Verify pixel format: {}", config.verify.pixel_format);

    Ok(())
}
