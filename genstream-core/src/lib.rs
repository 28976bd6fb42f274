//! # genstream-core
//!
//! Core library for genstream - incremental parsing of streamed, model-written
//! source trees.
//!
//! This library provides:
//! - Wire format detection and encoding for the four response conventions
//! - Incremental plan parsing and per-file boundary scanning
//! - A stream orchestrator that turns chunks into progress snapshots
//! - Truncation recovery, emergency extraction, and multi-batch continuation
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! One generation flows through three stages:
//! - **Stream:** chunks arrive from a [`ModelTransport`]; the
//!   [`StreamOrchestrator`] detects the format, parses the plan, and tracks
//!   each file's progress
//! - **Recover:** once the stream ends, [`recovery::analyze`] decides what the
//!   text yields: success, partial files, a continuation, or nothing
//! - **Continue:** the [`ContinuationController`] requests missing files in
//!   follow-up batches and merges them without ever dropping a file
//!
//! ## Example
//!
//! ```rust,no_run
//! use genstream_core::{Config, StreamOrchestrator, FinishReason};
//! use std::time::Instant;
//!
//! let config = Config::load().expect("failed to load config");
//! let mut stream = StreamOrchestrator::from_config(&config);
//!
//! stream.push_chunk("{\"manifest\":{\"create\":[\"src/App.tsx\"]},\"files\":{");
//! stream.push_chunk("\"src/App.tsx\":\"export default function App() {}\"}}");
//! stream.finish_now(FinishReason::Stop, Instant::now());
//!
//! let result = stream.into_result();
//! println!("{} chunks, format {}", result.chunk_count, result.format);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use continuation::{
    run_generation, ContinuationController, ContinuationPhase, ContinuationState,
    ContinuationStep, GenerationOutput,
};
pub use error::{Error, Result};
pub use extract::extract_files;
pub use plan::parse_plan;
pub use recovery::analyze;
pub use stream::{
    run_attempt, run_stream, AttemptResult, CancellationFlag, StreamOrchestrator, StreamPhase,
    StreamSnapshot,
};
pub use transport::{GenerationRequest, ModelTransport, RecordedResponse, ReplayTransport};
pub use types::*;
pub use wire::{detect_format, encode_response, FormatDetector};

// Public modules
pub mod config;
pub mod continuation;
pub mod error;
pub mod extract;
pub mod logging;
pub mod plan;
pub mod recovery;
pub mod scan;
pub mod stream;
pub mod transport;
pub mod types;
pub mod wire;
