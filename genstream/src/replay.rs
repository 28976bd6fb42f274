//! genstream-replay - feed recorded model responses through the pipeline
//!
//! Each response file stands in for one model call: the first is the
//! initial batch, any further files answer continuation requests in order.
//! Text is delivered in fixed-size chunks so progress, truncation recovery,
//! and continuation behave exactly as they would against a live stream.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/genstream/genstream.log.<date> (~/.local/state/genstream/)
//! - Config: $XDG_CONFIG_HOME/genstream/config.toml (~/.config/genstream/config.toml)

use anyhow::{Context, Result};
use clap::Parser;
use genstream_core::{
    run_generation, CancellationFlag, Config, FileMap, GenerationOutput, GenerationRequest,
    RecordedResponse, ReplayTransport, StreamSnapshot, WireFormat,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "genstream-replay")]
#[command(about = "Replay recorded model responses through the generation pipeline")]
#[command(version)]
struct Args {
    /// Response files, one per batch
    #[arg(required = true)]
    responses: Vec<PathBuf>,

    /// Characters per streamed chunk
    #[arg(short, long, default_value = "64")]
    chunk_size: usize,

    /// Wire format the model was asked for (legacy, v2, marker, bare)
    #[arg(long)]
    format: Option<WireFormat>,

    /// Prompt recorded with the generation
    #[arg(long, default_value = "replayed generation")]
    prompt: String,

    /// Treat the last response as cut off by the length limit
    #[arg(long)]
    truncated: bool,

    /// Complete files as soon as they close instead of staggering them
    #[arg(long)]
    no_stagger: bool,

    /// Directory to write recovered files into
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Output format: text (default) or json
    #[arg(long, default_value = "text")]
    output: String,

    /// Verbose output (print every snapshot status line)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load().context("failed to load configuration")?;
    if args.no_stagger {
        config.completion.staggered = false;
    }

    // Initialize logging
    let _log_guard =
        genstream_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(responses = args.responses.len(), "genstream-replay starting");

    let responses = load_responses(&args.responses, args.truncated)?;
    let mut transport = ReplayTransport::new(responses, args.chunk_size);

    // Set up signal handler for cooperative cancellation
    let cancel = CancellationFlag::new();
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling...");
        flag.cancel();
    })
    .context("failed to set Ctrl+C handler")?;

    let mut request = GenerationRequest::new(args.prompt.clone());
    request.expected_format = args.format;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [batch {prefix}] {msg}")
            .context("invalid progress template")?,
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    let verbose = args.verbose;
    let output = runtime.block_on(run_generation(
        &mut transport,
        request,
        &FileMap::new(),
        &config,
        &cancel,
        |batch, snapshot: &StreamSnapshot| {
            pb.set_prefix(batch.to_string());
            pb.set_message(snapshot.status.clone());
            if verbose {
                pb.println(format!(
                    "[{}] {} ({} chars)",
                    batch, snapshot.status, snapshot.received_chars
                ));
            }
        },
    ));
    pb.finish_and_clear();
    let output = output.context("generation failed")?;

    if let Some(dir) = &args.out {
        let written = write_files(dir, &output.files)?;
        tracing::info!(dir = %dir.display(), written, "Files written");
    }

    if args.output == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("failed to serialize output")?
        );
    } else {
        print_summary(&output, args.out.as_deref());
    }

    tracing::info!(
        batches = output.batches,
        files = output.files.len(),
        outcome = output.outcome.name(),
        "genstream-replay complete"
    );

    Ok(())
}

fn load_responses(paths: &[PathBuf], truncated: bool) -> Result<Vec<RecordedResponse>> {
    let last = paths.len().saturating_sub(1);
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read response {}", path.display()))?;
            Ok(if truncated && i == last {
                RecordedResponse::cut_off(text)
            } else {
                RecordedResponse::complete(text)
            })
        })
        .collect()
}

/// Write files under `dir`, refusing any path that would escape it.
fn write_files(dir: &Path, files: &FileMap) -> Result<usize> {
    for (path, content) in files {
        let relative = Path::new(path);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            anyhow::bail!("refusing to write outside output directory: {}", path);
        }

        let target = dir.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&target, content)
            .with_context(|| format!("failed to write {}", target.display()))?;
    }
    Ok(files.len())
}

/// Print generation summary
fn print_summary(output: &GenerationOutput, out_dir: Option<&Path>) {
    println!("Generation complete:");
    println!("  Outcome:      {}", output.outcome.name());
    println!("  Batches:      {}", output.batches);
    println!(
        "  Continuation: {}",
        if output.continuation_started { "yes" } else { "no" }
    );
    if output.cancelled {
        println!("  Cancelled:    yes");
    }
    println!("  Files:        {}", output.files.len());
    for (path, content) in &output.files {
        println!("    {} ({} lines)", path, content.lines().count());
    }

    if !output.warnings.is_empty() {
        println!("  Warnings:");
        for warning in &output.warnings {
            println!("    {}", warning);
        }
    }

    if let Some(dir) = out_dir {
        println!("  Written to:   {}", dir.display());
    }
}
