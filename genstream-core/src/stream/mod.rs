//! Live stream handling
//!
//! [`StreamOrchestrator`] owns one generation attempt: it accumulates chunks,
//! fixes the wire format, parses the plan as soon as it is complete, and
//! tracks per-file progress. Consumers only ever see [`StreamSnapshot`]s.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──chunk──► Detecting ──format──► PlanPending ──plan──► PlanKnown
//!                                                               │
//!                              StreamEnded ◄────── finish ──────┘
//! ```
//!
//! Format detection runs only while the format is unknown, plan parsing only
//! until a plan is found, and boundary scans at most once per
//! `scan.interval_ms`. Path discovery runs on every chunk so "files detected"
//! stays responsive before a plan exists.
//!
//! Every method that depends on time takes `now` explicitly; the
//! convenience wrappers use [`Instant::now`].

mod driver;
mod schedule;

pub use driver::{run_attempt, run_stream, AttemptResult};
pub use schedule::{
    policy_from_config, CompletionPolicy, ImmediateCompletion, StaggeredCompletion,
};

use crate::config::{Config, DetectionConfig, ScanConfig};
use crate::plan::parse_plan;
use crate::scan::{discover_paths, scan_file, ScanHint};
use crate::types::{
    FileAction, FilePlan, FileProgress, FileStatus, FinishReason, PathSet, PipelineWarning,
    StreamingResult, WireFormat,
};
use crate::wire::{line_start, FormatDetector};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Bytes re-examined by path discovery on each chunk, so a path split across
/// two chunks is still found.
const DISCOVERY_OVERLAP: usize = 256;

/// Cooperative cancellation shared between a caller and a running generation
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where a generation attempt is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    Idle,
    Detecting,
    PlanPending,
    PlanKnown,
    StreamEnded,
    Cancelled,
}

/// Immutable view of the stream handed to consumers on every update
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub phase: StreamPhase,
    pub status: String,
    pub format: WireFormat,
    pub received_chars: usize,
    pub detected_paths: PathSet,
    pub plan: Option<FilePlan>,
    pub progress: IndexMap<String, FileProgress>,
}

#[derive(Debug, Clone)]
struct TrackedFile {
    progress: FileProgress,
    plan_index: usize,
    left_pending_at: Option<Instant>,
    content_complete: bool,
}

/// Owns the plan and per-file progress for one generation attempt.
pub struct StreamOrchestrator {
    detection: DetectionConfig,
    scan: ScanConfig,
    policy: Box<dyn CompletionPolicy>,
    cancel: CancellationFlag,
    expected_format: Option<WireFormat>,
    detector: FormatDetector,
    phase: StreamPhase,
    text: String,
    received_chars: usize,
    chunk_count: usize,
    plan: Option<FilePlan>,
    files: IndexMap<String, TrackedFile>,
    detected_paths: PathSet,
    discovery_offset: usize,
    last_scan_at: Option<Instant>,
    finish_reason: Option<FinishReason>,
    warnings: Vec<PipelineWarning>,
    started_at: DateTime<Utc>,
}

impl StreamOrchestrator {
    pub fn new(config: &Config, policy: Box<dyn CompletionPolicy>) -> Self {
        Self {
            detection: config.detection.clone(),
            scan: config.scan.clone(),
            policy,
            cancel: CancellationFlag::new(),
            expected_format: None,
            detector: FormatDetector::new(),
            phase: StreamPhase::Idle,
            text: String::new(),
            received_chars: 0,
            chunk_count: 0,
            plan: None,
            files: IndexMap::new(),
            detected_paths: PathSet::new(),
            discovery_offset: 0,
            last_scan_at: None,
            finish_reason: None,
            warnings: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Orchestrator with the completion policy selected by `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, policy_from_config(&config.completion))
    }

    /// Format the caller asked the model for; a different verdict is
    /// reported as a warning, not an error.
    pub fn with_expected_format(mut self, format: WireFormat) -> Self {
        self.expected_format = format.is_known().then_some(format);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn format(&self) -> WireFormat {
        self.detector.verdict()
    }

    pub fn plan(&self) -> Option<&FilePlan> {
        self.plan.as_ref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn policy(&self) -> &dyn CompletionPolicy {
        self.policy.as_ref()
    }

    pub fn progress(&self, path: &str) -> Option<&FileProgress> {
        self.files.get(path).map(|f| &f.progress)
    }

    fn is_closed(&self) -> bool {
        matches!(self.phase, StreamPhase::StreamEnded | StreamPhase::Cancelled)
    }

    /// Stop all further scanning and scheduling.
    pub fn cancel(&mut self) {
        if !self.is_closed() {
            tracing::info!(chunks = self.chunk_count, "Stream cancelled");
            self.phase = StreamPhase::Cancelled;
        }
    }

    pub fn push_chunk(&mut self, chunk: &str) {
        self.push_chunk_at(chunk, Instant::now());
    }

    /// Append one chunk and advance the state machine.
    pub fn push_chunk_at(&mut self, chunk: &str, now: Instant) {
        if self.cancel.is_cancelled() {
            self.cancel();
        }
        if self.is_closed() {
            tracing::debug!(phase = ?self.phase, "Ignoring chunk after stream closed");
            return;
        }

        self.text.push_str(chunk);
        self.received_chars += chunk.chars().count();
        self.chunk_count += 1;
        if self.phase == StreamPhase::Idle {
            self.phase = StreamPhase::Detecting;
        }

        if !self.format().is_known() {
            let format = self.detector.observe(&self.text, &self.detection);
            if format.is_known() {
                self.on_format_detected(format);
            }
        }

        let new_paths = self.discover(self.format());

        if self.format().is_known() && self.plan.is_none() {
            if let Some(plan) = parse_plan(self.format(), &self.text) {
                self.install_plan(plan);
            }
        } else if self.format().plan_is_inferred() {
            self.grow_inferred_plan(&new_paths);
        }

        if self.phase == StreamPhase::PlanKnown && self.scan_due(now) {
            self.scan_all(now, false);
        }
    }

    /// Re-check withheld completions without new text.
    ///
    /// Returns how many files were released.
    pub fn poll(&mut self, now: Instant) -> usize {
        if self.phase == StreamPhase::PlanKnown {
            self.release_due(now)
        } else {
            0
        }
    }

    /// End the stream.
    ///
    /// Runs one last unthrottled scan and returns the content-complete files
    /// the completion policy is still holding back, in plan order. The caller
    /// completes them with [`force_complete`](Self::force_complete), pausing
    /// [`CompletionPolicy::finalize_delay`] between each.
    pub fn finish(&mut self, reason: FinishReason, now: Instant) -> Vec<String> {
        if self.cancel.is_cancelled() {
            self.cancel();
        }
        if self.is_closed() {
            return Vec::new();
        }
        self.finish_reason = Some(reason);

        if self.format().is_known() && self.plan.is_none() {
            if let Some(plan) = parse_plan(self.format(), &self.text) {
                self.install_plan(plan);
            }
        }

        if self.phase == StreamPhase::PlanKnown {
            self.scan_all(now, reason == FinishReason::Stop);
        } else {
            self.warnings.push(PipelineWarning::PlanNotFound);
        }

        for tracked in self.files.values() {
            if !tracked.content_complete && tracked.progress.action != FileAction::Delete {
                self.warnings.push(PipelineWarning::TruncatedFile {
                    path: tracked.progress.path.clone(),
                });
            }
        }

        self.phase = StreamPhase::StreamEnded;

        let mut withheld: Vec<(usize, String)> = self
            .files
            .values()
            .filter(|f| f.content_complete && f.progress.status != FileStatus::Complete)
            .map(|f| (f.plan_index, f.progress.path.clone()))
            .collect();
        withheld.sort();

        tracing::info!(
            format = %self.format(),
            chunks = self.chunk_count,
            chars = self.received_chars,
            finish = ?reason,
            withheld = withheld.len(),
            warnings = self.warnings.len(),
            "Stream ended"
        );

        withheld.into_iter().map(|(_, path)| path).collect()
    }

    /// Finish and complete every withheld file immediately.
    pub fn finish_now(&mut self, reason: FinishReason, now: Instant) {
        for path in self.finish(reason, now) {
            self.force_complete(&path);
        }
    }

    /// Mark a content-complete file Complete, bypassing the policy.
    pub fn force_complete(&mut self, path: &str) -> bool {
        if self.phase == StreamPhase::Cancelled {
            return false;
        }
        match self.files.get(path) {
            Some(f) if f.content_complete && f.progress.status != FileStatus::Complete => {
                self.complete_file(path);
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            phase: self.phase,
            status: self.status_line(),
            format: self.format(),
            received_chars: self.received_chars,
            detected_paths: self.detected_paths.clone(),
            plan: self.plan.clone(),
            progress: self
                .files
                .iter()
                .map(|(path, f)| (path.clone(), f.progress.clone()))
                .collect(),
        }
    }

    /// Terminal summary of the attempt
    pub fn into_result(self) -> StreamingResult {
        StreamingResult {
            format: self.format(),
            full_text: self.text,
            chunk_count: self.chunk_count,
            detected_files: self.detected_paths,
            plan: self.plan,
            finish_reason: self.finish_reason.unwrap_or(FinishReason::Length),
            warnings: self.warnings,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    fn status_line(&self) -> String {
        let done = self
            .files
            .values()
            .filter(|f| f.progress.status == FileStatus::Complete)
            .count();
        match self.phase {
            StreamPhase::Idle => "Waiting for response".to_string(),
            StreamPhase::Detecting => format!(
                "Reading response ({} file(s) detected)",
                self.detected_paths.len()
            ),
            StreamPhase::PlanPending => format!("Waiting for file plan ({})", self.format()),
            StreamPhase::PlanKnown => {
                format!("Generating files ({}/{})", done, self.files.len())
            }
            StreamPhase::StreamEnded => {
                format!("Stream finished ({}/{} files)", done, self.files.len())
            }
            StreamPhase::Cancelled => "Cancelled".to_string(),
        }
    }

    fn on_format_detected(&mut self, format: WireFormat) {
        self.phase = StreamPhase::PlanPending;
        tracing::info!(format = %format, chunks = self.chunk_count, "Format fixed for stream");
        if let Some(expected) = self.expected_format {
            if expected != format {
                tracing::warn!(expected = %expected, detected = %format, "Format mismatch");
                self.warnings.push(PipelineWarning::FormatMismatch {
                    expected,
                    detected: format,
                });
            }
        }
    }

    /// Record newly named paths; returns the ones not seen before.
    fn discover(&mut self, format: WireFormat) -> Vec<String> {
        let from = line_start(
            &self.text,
            self.discovery_offset.saturating_sub(DISCOVERY_OVERLAP),
        );
        self.discovery_offset = self.text.len();

        let mut new_paths = Vec::new();
        for path in discover_paths(format, &self.text, from) {
            if self.detected_paths.insert(path.clone()) {
                tracing::debug!(path = %path, "Path detected");
                new_paths.push(path);
            }
        }
        new_paths
    }

    fn install_plan(&mut self, plan: FilePlan) {
        tracing::info!(
            format = %self.format(),
            create = plan.to_create.len(),
            delete = plan.to_delete.len(),
            total = plan.total_count,
            "File plan parsed"
        );

        for path in plan.to_create.iter() {
            self.track(&plan, path);
        }
        for path in plan.to_delete.iter() {
            let index = self.files.len();
            self.files.insert(
                path.clone(),
                TrackedFile {
                    progress: FileProgress {
                        path: path.clone(),
                        action: FileAction::Delete,
                        expected_lines: 0,
                        received_chars: 0,
                        percent: 100,
                        status: FileStatus::Complete,
                    },
                    plan_index: index,
                    left_pending_at: None,
                    content_complete: true,
                },
            );
        }

        self.plan = Some(plan);
        self.phase = StreamPhase::PlanKnown;
        self.last_scan_at = None;

        // Headers seen before the plan existed still belong to an inferred plan
        if self.format().plan_is_inferred() {
            let known: Vec<String> = self.detected_paths.iter().cloned().collect();
            self.grow_inferred_plan(&known);
        }
    }

    fn track(&mut self, plan: &FilePlan, path: &str) {
        let index = self.files.len();
        self.files.insert(
            path.to_string(),
            TrackedFile {
                progress: FileProgress {
                    path: path.to_string(),
                    action: plan.action_for(path),
                    expected_lines: plan.expected_lines(path, self.scan.default_expected_lines),
                    received_chars: 0,
                    percent: 0,
                    status: FileStatus::Pending,
                },
                plan_index: index,
                left_pending_at: None,
                content_complete: false,
            },
        );
    }

    fn grow_inferred_plan(&mut self, paths: &[String]) {
        let Some(mut plan) = self.plan.take() else {
            return;
        };
        for path in paths {
            if plan.add_inferred(path) {
                tracing::debug!(path = %path, "Plan grew from header");
                self.track(&plan, path);
            }
        }
        self.plan = Some(plan);
    }

    fn scan_due(&self, now: Instant) -> bool {
        self.last_scan_at
            .map_or(true, |last| now.duration_since(last) >= self.scan.interval())
    }

    fn scan_all(&mut self, now: Instant, at_end: bool) {
        self.last_scan_at = Some(now);
        let format = self.format();

        for tracked in self.files.values_mut() {
            if tracked.content_complete {
                continue;
            }
            let hint = ScanHint {
                expected_lines: tracked.progress.expected_lines,
                chars_per_line: self.scan.chars_per_line,
            };
            let result = scan_file(format, &self.text, &tracked.progress.path, hint, at_end);
            if result.status == FileStatus::Pending {
                continue;
            }

            if tracked.left_pending_at.is_none() {
                tracked.left_pending_at = Some(now);
                tracked.progress.status = FileStatus::Streaming;
            }
            tracked.progress.received_chars = result.received_chars;
            tracked.progress.percent = result.percent.min(99);
            if result.status == FileStatus::Complete {
                tracked.content_complete = true;
                tracing::debug!(
                    path = %tracked.progress.path,
                    chars = result.received_chars,
                    "File content complete"
                );
            }
        }

        self.release_due(now);
    }

    fn release_due(&mut self, now: Instant) -> usize {
        let due: Vec<String> = self
            .files
            .values()
            .filter(|f| f.content_complete && f.progress.status != FileStatus::Complete)
            .filter(|f| {
                let since = f
                    .left_pending_at
                    .map(|t| now.duration_since(t))
                    .unwrap_or_default();
                self.policy.may_complete(f.plan_index, since)
            })
            .map(|f| f.progress.path.clone())
            .collect();

        for path in &due {
            self.complete_file(path);
        }
        due.len()
    }

    fn complete_file(&mut self, path: &str) {
        if let Some(tracked) = self.files.get_mut(path) {
            tracked.progress.status = FileStatus::Complete;
            tracked.progress.percent = 100;
        }
        if let Some(plan) = self.plan.as_mut() {
            plan.mark_completed(path);
        }
        tracing::debug!(path = %path, "File complete");
    }
}
