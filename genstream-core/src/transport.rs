//! Model transport seam
//!
//! The pipeline never talks to a model directly. A [`ModelTransport`] turns a
//! [`GenerationRequest`] into a channel of [`StreamEvent`]s; everything after
//! that is transport-agnostic. [`ReplayTransport`] plays back recorded
//! responses and backs the CLI and the test suite.

use crate::error::{Error, Result};
use crate::types::{FileMap, FinishReason, StreamEvent, WireFormat};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// One model call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    /// The user's original prompt, repeated unchanged on every batch
    pub prompt: String,
    /// Extra system instruction; set on continuation batches
    pub system_instruction: Option<String>,
    /// Files the model should treat as already written
    pub context_files: FileMap,
    /// 0 for the first call of a generation
    pub batch_index: usize,
    /// Format the model was asked to answer in
    pub expected_format: Option<WireFormat>,
    /// Files a continuation batch must produce
    pub remaining_files: Vec<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.batch_index > 0
    }
}

/// Source of streamed model output.
///
/// `open` is the pipeline's only suspension point besides waiting on the
/// returned channel. The sender side ends the stream with
/// [`StreamEvent::End`]; dropping the sender without it is read as a
/// length cutoff.
#[allow(async_fn_in_trait)]
pub trait ModelTransport {
    async fn open(&mut self, request: &GenerationRequest) -> Result<mpsc::Receiver<StreamEvent>>;
}

/// A recorded model response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedResponse {
    pub text: String,
    /// `None` simulates a connection that drops without an end signal
    pub finish: Option<FinishReason>,
}

impl RecordedResponse {
    pub fn complete(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish: Some(FinishReason::Stop),
        }
    }

    pub fn cut_off(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish: Some(FinishReason::Length),
        }
    }
}

/// Replays recorded responses, one per `open`, split into fixed-size chunks.
#[derive(Debug, Clone)]
pub struct ReplayTransport {
    responses: VecDeque<RecordedResponse>,
    chunk_chars: usize,
    requests: Vec<GenerationRequest>,
}

impl ReplayTransport {
    pub fn new<I>(responses: I, chunk_chars: usize) -> Self
    where
        I: IntoIterator<Item = RecordedResponse>,
    {
        Self {
            responses: responses.into_iter().collect(),
            chunk_chars: chunk_chars.max(1),
            requests: Vec::new(),
        }
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> &[GenerationRequest] {
        &self.requests
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }
}

/// Split `text` into pieces of at most `chunk_chars` characters.
pub fn split_chunks(text: &str, chunk_chars: usize) -> Vec<String> {
    let chunk_chars = chunk_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    for (i, c) in text.chars().enumerate() {
        if i > 0 && i % chunk_chars == 0 {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

impl ModelTransport for ReplayTransport {
    async fn open(&mut self, request: &GenerationRequest) -> Result<mpsc::Receiver<StreamEvent>> {
        self.requests.push(request.clone());
        let response = self.responses.pop_front().ok_or_else(|| {
            Error::Transport(format!(
                "no recorded response left for batch {}",
                request.batch_index
            ))
        })?;

        let chunks = split_chunks(&response.text, self.chunk_chars);
        let (tx, rx) = mpsc::channel(chunks.len() + 1);
        tracing::debug!(
            batch = request.batch_index,
            chunks = chunks.len(),
            "Replaying recorded response"
        );

        for chunk in chunks {
            tx.try_send(StreamEvent::Chunk(chunk))
                .map_err(|e| Error::Transport(format!("replay channel rejected chunk: {}", e)))?;
        }
        if let Some(reason) = response.finish {
            tx.try_send(StreamEvent::End(reason))
                .map_err(|e| Error::Transport(format!("replay channel rejected end: {}", e)))?;
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_chunks_respects_chars() {
        assert_eq!(split_chunks("héllo!", 2), vec!["hé", "ll", "o!"]);
        assert_eq!(split_chunks("abc", 10), vec!["abc"]);
        assert!(split_chunks("", 3).is_empty());
    }

    #[tokio::test]
    async fn test_replay_sends_chunks_then_end() {
        let mut transport = ReplayTransport::new([RecordedResponse::cut_off("abcdef")], 4);
        let mut rx = transport.open(&GenerationRequest::new("make it")).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                StreamEvent::Chunk("abcd".to_string()),
                StreamEvent::Chunk("ef".to_string()),
                StreamEvent::End(FinishReason::Length),
            ]
        );
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(transport.remaining(), 0);
    }

    #[tokio::test]
    async fn test_replay_runs_out() {
        let mut transport = ReplayTransport::new(Vec::new(), 4);
        let err = transport.open(&GenerationRequest::new("x")).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
