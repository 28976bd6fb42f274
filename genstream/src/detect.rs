//! genstream-detect - classify a recorded response without streaming it
//!
//! Prints the wire format, the parsed plan, each planned file's boundary
//! status, and what truncation analysis would recover.

use anyhow::{Context, Result};
use clap::Parser;
use genstream_core::config::Config;
use genstream_core::scan::{scan_file, ScanHint};
use genstream_core::{analyze, detect_format, parse_plan, FileMap, FinishReason, WireFormat};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "genstream-detect")]
#[command(about = "Detect the wire format and plan of a recorded response")]
#[command(version)]
struct Args {
    /// Response file to inspect
    response: PathBuf,

    /// Treat the response as cut off by the length limit
    #[arg(long)]
    truncated: bool,

    /// Output format: text (default) or json
    #[arg(long, default_value = "text")]
    output: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        genstream_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let text = std::fs::read_to_string(&args.response)
        .with_context(|| format!("failed to read response {}", args.response.display()))?;

    let format = detect_format(&text, &config.detection);
    let plan = parse_plan(format, &text);
    let finish = if args.truncated {
        FinishReason::Length
    } else {
        FinishReason::Stop
    };
    let outcome = analyze(&text, format, finish, plan.as_ref(), &FileMap::new(), &config);

    let files: Vec<serde_json::Value> = plan
        .iter()
        .flat_map(|p| p.to_create.iter().map(move |path| (p, path)))
        .map(|(p, path)| {
            let hint = ScanHint {
                expected_lines: p.expected_lines(path, config.scan.default_expected_lines),
                chars_per_line: config.scan.chars_per_line,
            };
            let scan = scan_file(format, &text, path, hint, finish == FinishReason::Stop);
            serde_json::json!({
                "path": path,
                "status": scan.status,
                "received_chars": scan.received_chars,
                "percent": scan.percent,
            })
        })
        .collect();

    tracing::info!(
        format = %format,
        planned = files.len(),
        outcome = outcome.name(),
        "genstream-detect complete"
    );

    if args.output == "json" {
        let report = serde_json::json!({
            "format": format,
            "plan": plan,
            "files": files,
            "recovery": outcome,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
        return Ok(());
    }

    println!("Format:   {}", format);
    match &plan {
        Some(plan) => {
            println!(
                "Plan:     {} to create, {} to delete (total {})",
                plan.to_create.len(),
                plan.to_delete.len(),
                plan.total_count
            );
            for file in &files {
                println!(
                    "  {:<40} {:<10} {:>3}%",
                    file["path"].as_str().unwrap_or(""),
                    file["status"].as_str().unwrap_or(""),
                    file["percent"]
                );
            }
        }
        None if format == WireFormat::Unknown => println!("Plan:     none (format not recognized)"),
        None => println!("Plan:     not found"),
    }
    println!(
        "Recovery: {} ({} file(s))",
        outcome.name(),
        outcome.file_count()
    );

    Ok(())
}
