//! Hologram Pipeline - CLI tool for running streaming compute jobs

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::process;

use cli::Cli;
use hologram_pipeline::{
    load_job, run_job, BackendKind, ComputeBackend, DebugUtils, ExecutionMode, HostBackend, JobSpec, MergedConfig,
    PipelineConfig, RunReport,
};

fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize logging
    cli.init_logging();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let file_config = match &cli.config {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("Failed to load settings {}", path.display()))?,
        None => PipelineConfig::find_and_load()?.unwrap_or_default(),
    };

    let settings = file_config.merge_with_cli(
        cli.job.clone(),
        cli.backend.map(Into::into),
        cli.fence_timeout_ms,
        cli.io_threads,
    );

    if !settings.job.is_file() {
        anyhow::bail!("Job description not found: {}", settings.job.display());
    }

    let job = load_job(&settings.job)
        .with_context(|| format!("Failed to load job description {}", settings.job.display()))?;

    let debug = cli.debug_labels.then(DebugUtils::tracing);

    let report = match settings.backend {
        BackendKind::Host => {
            let mode = if cli.deferred {
                ExecutionMode::Deferred
            } else {
                ExecutionMode::Immediate
            };
            let mut backend = HostBackend::new().with_mode(mode);
            if let Some(debug) = debug {
                backend = backend.with_debug(debug);
            }
            execute(&job, &mut backend, &settings)?
        }
        BackendKind::Wgpu => run_wgpu(&job, debug, &settings)?,
    };

    println!("{}", report.summary());
    if cli.stats && !cli.quiet {
        println!("{}", report);
        println!("latency: {}", report.latency);
    }

    Ok(())
}

fn execute(job: &JobSpec, backend: &mut dyn ComputeBackend, settings: &MergedConfig) -> Result<RunReport> {
    run_job(job, backend, settings).with_context(|| format!("Pipeline failed on the {} backend", backend.name()))
}

#[cfg(feature = "wgpu")]
fn run_wgpu(job: &JobSpec, debug: Option<DebugUtils>, settings: &MergedConfig) -> Result<RunReport> {
    let mut backend = hologram_pipeline::WgpuBackend::new().context("Failed to initialize the wgpu backend")?;
    if let Some(debug) = debug {
        backend = backend.with_debug(debug);
    }
    execute(job, &mut backend, settings)
}

#[cfg(not(feature = "wgpu"))]
fn run_wgpu(_job: &JobSpec, _debug: Option<DebugUtils>, _settings: &MergedConfig) -> Result<RunReport> {
    anyhow::bail!("This build does not include the wgpu backend (rebuild with --features wgpu)")
}
