//! Multi-batch continuation
//!
//! When a response is cut off after delivering some files, the
//! [`ContinuationController`] asks the model for just the missing ones,
//! merging each batch into the files accumulated so far:
//!
//! ```text
//! Idle ──begin──► AwaitingBatch ──absorb──► Merging ──┬── done ──────► Idle
//!                      ▲                              ├── more ────────┘ (next request)
//!                      └──────────────────────────────┘
//!                                                     └── exhausted ─► Failed
//! ```
//!
//! Files are merged by path with [`merge_files`], so no file delivered by an
//! earlier batch is ever lost. The loop is bounded by
//! `continuation.max_batches`, and follow-up batches that deliver none of the
//! missing files count against `continuation.max_retries`.

use crate::config::{Config, ContinuationConfig};
use crate::error::{Error, Result};
use crate::stream::{run_attempt, CancellationFlag, StreamSnapshot};
use crate::transport::{GenerationRequest, ModelTransport};
use crate::types::{
    merge_files, FileMap, GenerationMeta, PathSet, PipelineWarning, RecoveryOutcome, WireFormat,
};
use crate::wire::encode_response;
use serde::Serialize;

/// Where the controller is in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationPhase {
    Idle,
    AwaitingBatch,
    Merging,
    Failed,
}

/// Everything carried from one batch to the next
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContinuationState {
    pub active: bool,
    pub original_prompt: String,
    pub format: WireFormat,
    pub continuation_instruction: String,
    pub meta: GenerationMeta,
    pub accumulated_files: FileMap,
    /// Index of the most recent batch; the first call is 0
    pub batch_index: usize,
    /// Follow-up batches in a row that delivered none of the missing files
    pub retry_count: usize,
}

/// What to do after absorbing a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationStep {
    /// Every planned file has arrived
    Done { files: FileMap },
    /// Send this request next
    Next(GenerationRequest),
}

/// Drives follow-up batches for one generation.
#[derive(Debug, Clone)]
pub struct ContinuationController {
    config: ContinuationConfig,
    phase: ContinuationPhase,
    state: Option<ContinuationState>,
    degraded: bool,
}

impl ContinuationController {
    pub fn new(config: &ContinuationConfig) -> Self {
        Self {
            config: config.clone(),
            phase: ContinuationPhase::Idle,
            state: None,
            degraded: false,
        }
    }

    pub fn phase(&self) -> ContinuationPhase {
        self.phase
    }

    pub fn state(&self) -> Option<&ContinuationState> {
        self.state.as_ref()
    }

    /// Number of batches sent so far, the first one included
    pub fn batches(&self) -> usize {
        self.state.as_ref().map_or(1, |s| s.batch_index + 1)
    }

    /// True when some batch was only recovered best-effort
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    /// Start a continuation loop from the first batch's outcome.
    ///
    /// Returns `Ok(None)` when the outcome needs no follow-up.
    pub fn begin(
        &mut self,
        prompt: &str,
        format: WireFormat,
        outcome: &RecoveryOutcome,
    ) -> Result<Option<GenerationRequest>> {
        let RecoveryOutcome::Continuation { meta, files } = outcome else {
            return Ok(None);
        };
        if meta.is_complete || meta.remaining_files.is_empty() {
            return Ok(None);
        }

        tracing::info!(
            format = %format,
            recovered = files.len(),
            remaining = meta.remaining_files.len(),
            "Starting continuation"
        );

        let mut meta = meta.clone();
        meta.batch_index = 0;
        self.state = Some(ContinuationState {
            active: true,
            original_prompt: prompt.to_string(),
            format,
            continuation_instruction: String::new(),
            meta,
            accumulated_files: files.clone(),
            batch_index: 0,
            retry_count: 0,
        });
        self.next_request().map(Some)
    }

    /// Build the request for the next batch, or fail once the batch limit is
    /// reached.
    pub fn next_request(&mut self) -> Result<GenerationRequest> {
        let max_batches = self.config.max_batches;
        let Some(state) = self.state.as_mut() else {
            return Err(Error::Config("no continuation in progress".to_string()));
        };

        let remaining: Vec<String> = state.meta.remaining_files.iter().cloned().collect();
        if state.batch_index + 1 >= max_batches {
            tracing::warn!(
                batches = state.batch_index + 1,
                remaining = remaining.len(),
                "Continuation batch limit reached"
            );
            state.active = false;
            self.phase = ContinuationPhase::Failed;
            return Err(Error::ContinuationExhausted {
                batches: state.batch_index + 1,
                remaining,
            });
        }

        state.batch_index += 1;
        state.meta.batch_index = state.batch_index;
        state.continuation_instruction =
            continuation_instruction(state.format, &remaining, &state.accumulated_files);
        self.phase = ContinuationPhase::AwaitingBatch;

        tracing::debug!(
            batch = state.batch_index,
            remaining = remaining.len(),
            "Requesting continuation batch"
        );

        Ok(GenerationRequest {
            prompt: state.original_prompt.clone(),
            system_instruction: Some(state.continuation_instruction.clone()),
            context_files: state.accumulated_files.clone(),
            batch_index: state.batch_index,
            expected_format: Some(state.format),
            remaining_files: remaining,
        })
    }

    /// Merge a follow-up batch's outcome and decide what comes next.
    pub fn absorb(&mut self, outcome: &RecoveryOutcome) -> Result<ContinuationStep> {
        let max_retries = self.config.max_retries;
        let Some(state) = self.state.as_mut() else {
            return Err(Error::Config("no continuation in progress".to_string()));
        };
        self.phase = ContinuationPhase::Merging;

        let empty = FileMap::new();
        let incoming = outcome.files().unwrap_or(&empty);
        let delivered = incoming
            .keys()
            .filter(|path| state.meta.remaining_files.contains(*path))
            .count();
        merge_files(&mut state.accumulated_files, incoming);
        if matches!(outcome, RecoveryOutcome::Partial { .. }) {
            self.degraded = true;
        }

        // The batch may name files it still owes
        let still_owed: Vec<String> = match outcome {
            RecoveryOutcome::Continuation { meta, .. } => {
                meta.remaining_files.iter().cloned().collect()
            }
            RecoveryOutcome::Partial { missing, .. } => missing.clone(),
            _ => Vec::new(),
        };
        let mut remaining: PathSet = state.meta.remaining_files.clone();
        remaining.extend(still_owed);
        remaining.retain(|path| !state.accumulated_files.contains_key(path));

        state.meta.files_this_batch = incoming.keys().cloned().collect();
        state
            .meta
            .completed_files
            .extend(incoming.keys().cloned());
        state.meta.remaining_files = remaining;
        state.meta.is_complete = state.meta.remaining_files.is_empty();

        tracing::info!(
            batch = state.batch_index,
            received = incoming.len(),
            delivered,
            remaining = state.meta.remaining_files.len(),
            "Continuation batch merged"
        );

        if state.meta.is_complete {
            state.active = false;
            self.phase = ContinuationPhase::Idle;
            return Ok(ContinuationStep::Done {
                files: state.accumulated_files.clone(),
            });
        }

        if delivered == 0 {
            state.retry_count += 1;
            if state.retry_count > max_retries {
                tracing::warn!(retries = state.retry_count, "Continuation made no progress");
                state.active = false;
                self.phase = ContinuationPhase::Failed;
                return Err(Error::ContinuationExhausted {
                    batches: state.batch_index + 1,
                    remaining: state.meta.remaining_files.iter().cloned().collect(),
                });
            }
        } else {
            state.retry_count = 0;
        }

        self.next_request().map(ContinuationStep::Next)
    }
}

/// Instruction for a follow-up batch, in the format the model already used.
pub fn continuation_instruction(
    format: WireFormat,
    remaining: &[String],
    written: &FileMap,
) -> String {
    let shape = match format {
        WireFormat::LegacyCommentPlan => {
            "Start with a `// PLAN:` line whose JSON lists only these files, then one JSON object mapping each path to its complete content."
        }
        WireFormat::DelimiterMarker => {
            "Start with a <!-- PLAN --> block listing only these files, then wrap each file in <!-- FILE: path --> and <!-- /FILE: path --> markers."
        }
        WireFormat::BareComment => {
            "Put a `// path` comment on its own line before each file's complete content."
        }
        WireFormat::ManifestV2 | WireFormat::Unknown => {
            "Answer with one JSON object whose \"manifest\" lists only these files and whose \"files\" maps each path to its complete content."
        }
    };

    let example: FileMap = remaining
        .iter()
        .take(1)
        .map(|path| (path.clone(), "...".to_string()))
        .collect();

    let mut out = String::from("Your previous response was cut off. Continue the same project.\n");
    out.push_str("Write ONLY these missing files:\n");
    for path in remaining {
        out.push_str(&format!("- {}\n", path));
    }
    if !written.is_empty() {
        out.push_str("These files are already written; do not repeat them:\n");
        for path in written.keys() {
            out.push_str(&format!("- {}\n", path));
        }
    }
    out.push_str(shape);
    out.push_str("\nExample of the expected shape:\n");
    out.push_str(&encode_response(format, &example, &[]));
    out
}

/// Final result of a generation, across all batches
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutput {
    pub files: FileMap,
    /// True once any follow-up batch was requested
    pub continuation_started: bool,
    pub batches: usize,
    pub outcome: RecoveryOutcome,
    pub warnings: Vec<PipelineWarning>,
    /// Cancelled during a follow-up batch; `files` holds what was merged before
    pub cancelled: bool,
}

/// Run a whole generation: the first batch plus any continuation batches.
///
/// `observer` receives the batch index with every snapshot. Fails with
/// [`Error::Unrecoverable`] when the first batch yields nothing at all and
/// with [`Error::ContinuationExhausted`] when the batch limit is hit.
pub async fn run_generation<T, F>(
    transport: &mut T,
    request: GenerationRequest,
    existing: &FileMap,
    config: &Config,
    cancel: &CancellationFlag,
    mut observer: F,
) -> Result<GenerationOutput>
where
    T: ModelTransport,
    F: FnMut(usize, &StreamSnapshot),
{
    let first = run_attempt(transport, &request, existing, config, cancel, |s| {
        observer(0, s)
    })
    .await?;
    let mut warnings = first.stream.warnings.clone();

    let mut controller = ContinuationController::new(&config.continuation);
    let next = controller.begin(&request.prompt, first.stream.format, &first.outcome)?;

    let Some(mut next) = next else {
        return match first.outcome {
            RecoveryOutcome::None => Err(Error::Unrecoverable {
                raw_text: first.stream.full_text,
            }),
            outcome => Ok(GenerationOutput {
                files: outcome.files().cloned().unwrap_or_default(),
                continuation_started: false,
                batches: 1,
                outcome,
                warnings,
                cancelled: false,
            }),
        };
    };

    loop {
        let batch = next.batch_index;
        let attempt = match run_attempt(transport, &next, existing, config, cancel, |s| {
            observer(batch, s)
        })
        .await
        {
            Ok(attempt) => attempt,
            Err(Error::Cancelled) => {
                let state = controller.state().cloned();
                let (files, missing): (FileMap, Vec<String>) = state
                    .map(|s| {
                        (
                            s.accumulated_files,
                            s.meta.remaining_files.into_iter().collect(),
                        )
                    })
                    .unwrap_or_default();
                tracing::info!(batch, files = files.len(), "Generation cancelled mid-continuation");
                return Ok(GenerationOutput {
                    outcome: RecoveryOutcome::Partial {
                        files: files.clone(),
                        missing,
                    },
                    files,
                    continuation_started: true,
                    batches: controller.batches(),
                    warnings,
                    cancelled: true,
                });
            }
            Err(e) => return Err(e),
        };
        warnings.extend(attempt.stream.warnings.iter().cloned());
        if attempt.outcome == RecoveryOutcome::None {
            let accumulated = controller.state().map_or(0, |s| s.accumulated_files.len());
            warnings.push(PipelineWarning::MergeConflictRisk {
                existing_files: existing.len() + accumulated,
            });
        }

        match controller.absorb(&attempt.outcome)? {
            ContinuationStep::Next(request) => next = request,
            ContinuationStep::Done { files } => {
                let outcome = if controller.degraded() {
                    RecoveryOutcome::Partial {
                        files: files.clone(),
                        missing: Vec::new(),
                    }
                } else {
                    RecoveryOutcome::Success {
                        files: files.clone(),
                    }
                };
                tracing::info!(
                    batches = controller.batches(),
                    files = files.len(),
                    "Generation complete"
                );
                return Ok(GenerationOutput {
                    files,
                    continuation_started: true,
                    batches: controller.batches(),
                    outcome,
                    warnings,
                    cancelled: false,
                });
            }
        }
    }
}
