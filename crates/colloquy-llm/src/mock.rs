//! Scripted LLM client for tests and offline development.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use crate::client::{FragmentStream, LlmClient};
use crate::error::LlmError;
use crate::types::{Completion, GenerateRequest};

/// A scripted `LlmClient`.
///
/// Queued replies are consumed in order; once a queue is empty, the
/// default reply (if set) answers every further call. Invocations are
/// counted so tests can assert retry behavior.
#[derive(Default)]
pub struct MockLlm {
    replies: Mutex<VecDeque<Result<Completion, LlmError>>>,
    streams: Mutex<VecDeque<Vec<Result<String, LlmError>>>>,
    default_reply: Option<String>,
    calls: AtomicUsize,
    stream_calls: AtomicUsize,
    last_request: Mutex<Option<GenerateRequest>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that answers every call (and every stream) with `text`.
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            default_reply: Some(text.into()),
            ..Self::default()
        }
    }

    /// Queue a scripted completion result.
    pub fn push_reply(&self, reply: Result<Completion, LlmError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Queue a scripted fragment sequence for the next stream call.
    pub fn push_stream(&self, fragments: Vec<Result<String, LlmError>>) {
        self.streams.lock().unwrap().push_back(fragments);
    }

    /// Number of `generate` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of `stream_generate` invocations so far.
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// The most recent request seen by either entry point.
    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.last_request.lock().unwrap().clone()
    }

    fn record(&self, request: &GenerateRequest) {
        *self.last_request.lock().unwrap() = Some(request.clone());
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(&self, request: &GenerateRequest) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.record(request);

        if let Some(scripted) = self.replies.lock().unwrap().pop_front() {
            return scripted;
        }
        match &self.default_reply {
            Some(text) => Ok(Completion::new(text.clone())),
            None => Err(LlmError::Upstream {
                status: None,
                message: "mock reply queue exhausted".to_string(),
            }),
        }
    }

    async fn stream_generate(&self, request: &GenerateRequest) -> Result<FragmentStream, LlmError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.record(request);

        let fragments = match self.streams.lock().unwrap().pop_front() {
            Some(scripted) => scripted,
            None => match &self.default_reply {
                Some(text) => vec![Ok(text.clone())],
                None => {
                    return Err(LlmError::Upstream {
                        status: None,
                        message: "mock stream queue exhausted".to_string(),
                    })
                }
            },
        };

        Ok(futures::stream::iter(fragments).boxed())
    }
}
