//! Async loop that feeds a transport's events into an orchestrator

use super::{CancellationFlag, StreamOrchestrator, StreamSnapshot};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::recovery::analyze;
use crate::transport::{GenerationRequest, ModelTransport};
use crate::types::{FileMap, FinishReason, RecoveryOutcome, StreamEvent, StreamingResult};
use std::time::Instant;

/// One finished attempt together with its recovery verdict
#[derive(Debug, Clone)]
pub struct AttemptResult {
    pub stream: StreamingResult,
    pub outcome: RecoveryOutcome,
}

/// Stream one model call to completion.
///
/// `observer` receives a snapshot after every chunk, every scheduler release,
/// and every forced completion. Cancellation is checked between events and
/// returns [`Error::Cancelled`].
pub async fn run_stream<T, F>(
    transport: &mut T,
    request: &GenerationRequest,
    config: &Config,
    cancel: &CancellationFlag,
    mut observer: F,
) -> Result<StreamingResult>
where
    T: ModelTransport,
    F: FnMut(&StreamSnapshot),
{
    let mut orch = StreamOrchestrator::from_config(config).with_cancellation(cancel.clone());
    if let Some(format) = request.expected_format {
        orch = orch.with_expected_format(format);
    }

    let mut events = transport.open(request).await?;
    observer(&orch.snapshot());

    let mut ticker = tokio::time::interval(config.scan.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let reason = loop {
        if cancel.is_cancelled() {
            orch.cancel();
            observer(&orch.snapshot());
            return Err(Error::Cancelled);
        }

        tokio::select! {
            event = events.recv() => match event {
                Some(StreamEvent::Chunk(text)) => {
                    orch.push_chunk(&text);
                    observer(&orch.snapshot());
                }
                Some(StreamEvent::End(reason)) => break reason,
                None => {
                    tracing::warn!(
                        batch = request.batch_index,
                        chunks = orch.chunk_count(),
                        "Transport closed without an end signal, treating as length cutoff"
                    );
                    break FinishReason::Length;
                }
            },
            _ = ticker.tick() => {
                if orch.poll(Instant::now()) > 0 {
                    observer(&orch.snapshot());
                }
            }
        }
    };

    let withheld = orch.finish(reason, Instant::now());
    observer(&orch.snapshot());

    let delay = orch.policy().finalize_delay();
    for path in withheld {
        if cancel.is_cancelled() {
            orch.cancel();
            return Err(Error::Cancelled);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        orch.force_complete(&path);
        observer(&orch.snapshot());
    }

    Ok(orch.into_result())
}

/// Stream one model call and run the Truncation Analyzer on its text.
///
/// `existing` is the caller's current project, used only as merge context.
pub async fn run_attempt<T, F>(
    transport: &mut T,
    request: &GenerationRequest,
    existing: &FileMap,
    config: &Config,
    cancel: &CancellationFlag,
    observer: F,
) -> Result<AttemptResult>
where
    T: ModelTransport,
    F: FnMut(&StreamSnapshot),
{
    let stream = run_stream(transport, request, config, cancel, observer).await?;
    let outcome = analyze(
        &stream.full_text,
        stream.format,
        stream.finish_reason,
        stream.plan.as_ref(),
        existing,
        config,
    );
    tracing::info!(
        batch = request.batch_index,
        outcome = outcome.name(),
        files = outcome.file_count(),
        "Attempt analyzed"
    );
    Ok(AttemptResult { stream, outcome })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamPhase;
    use crate::transport::{RecordedResponse, ReplayTransport};
    use crate::types::{FileStatus, PipelineWarning, WireFormat};
    use crate::wire::encode_response;

    fn files() -> FileMap {
        let mut files = FileMap::new();
        files.insert("src/a.ts".to_string(), "export const a = 1;\n".repeat(3));
        files.insert("src/b.ts".to_string(), "export const b = 2;\n".repeat(3));
        files
    }

    fn headless() -> Config {
        let mut config = Config::default();
        config.completion.staggered = false;
        config
    }

    #[tokio::test]
    async fn test_stream_completes_every_file() {
        let text = encode_response(WireFormat::DelimiterMarker, &files(), &[]);
        let mut transport = ReplayTransport::new([RecordedResponse::complete(text.clone())], 9);
        let mut snapshots = Vec::new();

        let result = run_stream(
            &mut transport,
            &GenerationRequest::new("two files"),
            &headless(),
            &CancellationFlag::new(),
            |s| snapshots.push(s.clone()),
        )
        .await
        .unwrap();

        assert_eq!(result.full_text, text);
        assert_eq!(result.format, WireFormat::DelimiterMarker);
        assert_eq!(result.finish_reason, FinishReason::Stop);
        let last = snapshots.last().unwrap();
        assert_eq!(last.phase, StreamPhase::StreamEnded);
        assert!(last.progress.values().all(|p| p.status == FileStatus::Complete));
    }

    #[tokio::test]
    async fn test_staggered_stream_force_completes_in_plan_order() {
        let text = encode_response(WireFormat::ManifestV2, &files(), &[]);
        let mut transport = ReplayTransport::new([RecordedResponse::complete(text)], 4096);
        let mut completed = Vec::new();

        run_stream(
            &mut transport,
            &GenerationRequest::new("two files"),
            &Config::default(),
            &CancellationFlag::new(),
            |s| {
                for (path, p) in &s.progress {
                    if p.status == FileStatus::Complete && !completed.contains(path) {
                        completed.push(path.clone());
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(completed, vec!["src/a.ts", "src/b.ts"]);
    }

    #[tokio::test]
    async fn test_missing_end_signal_is_length() {
        let text = encode_response(WireFormat::ManifestV2, &files(), &[]);
        let response = RecordedResponse {
            text,
            finish: None,
        };
        let mut transport = ReplayTransport::new([response], 64);
        let result = run_stream(
            &mut transport,
            &GenerationRequest::new("x"),
            &headless(),
            &CancellationFlag::new(),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(result.finish_reason, FinishReason::Length);
    }

    #[tokio::test]
    async fn test_cancel_between_chunks() {
        let text = encode_response(WireFormat::ManifestV2, &files(), &[]);
        let mut transport = ReplayTransport::new([RecordedResponse::complete(text)], 16);
        let cancel = CancellationFlag::new();
        let trigger = cancel.clone();

        let err = run_stream(
            &mut transport,
            &GenerationRequest::new("x"),
            &headless(),
            &cancel,
            |s| {
                if s.received_chars >= 32 {
                    trigger.cancel();
                }
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_attempt_reports_outcome() {
        let text = encode_response(WireFormat::LegacyCommentPlan, &files(), &[]);
        let mut transport = ReplayTransport::new([RecordedResponse::complete(text)], 50);
        let attempt = run_attempt(
            &mut transport,
            &GenerationRequest::new("x"),
            &FileMap::new(),
            &headless(),
            &CancellationFlag::new(),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(attempt.outcome, RecoveryOutcome::Success { files: files() });
    }

    #[tokio::test]
    async fn test_bare_length_cutoff_is_not_success() {
        let text = "// src/a.ts\nexport const a = 1;\n// src/b.ts\nexport function b() {\n  return compute(1, 2) + ano";
        let mut transport = ReplayTransport::new([RecordedResponse::cut_off(text)], 12);
        let attempt = run_attempt(
            &mut transport,
            &GenerationRequest::new("x"),
            &FileMap::new(),
            &headless(),
            &CancellationFlag::new(),
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(attempt.stream.format, WireFormat::BareComment);
        assert!(attempt.stream.warnings.contains(&PipelineWarning::TruncatedFile {
            path: "src/b.ts".to_string()
        }));
        match attempt.outcome {
            RecoveryOutcome::Partial { files, missing } => {
                assert_eq!(files["src/a.ts"], "export const a = 1;");
                assert!(files["src/b.ts"].ends_with("ano\n}\n"));
                assert!(missing.is_empty());
            }
            other => panic!("expected partial, got {other:?}"),
        }
    }
}
