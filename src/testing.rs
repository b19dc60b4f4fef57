//! Mock implementations for testing
//!
//! These mocks enable engine, delivery and bridge tests without real I/O.

use crate::delivery::{PresentationSink, SinkError, Status};
use crate::format::Fragment;
use crate::llm::{CompletionClient, CompletionRequest, LlmError, StructuredResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Mock Completion Client
// ============================================================================

/// Mock completion client that returns queued results
pub struct MockCompletionClient {
    results: Mutex<VecDeque<Result<StructuredResult, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<CompletionRequest>>,
}

#[allow(dead_code)]
impl MockCompletionClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful result
    pub fn queue_result(&self, result: StructuredResult) {
        self.results.lock().unwrap().push_back(Ok(result));
    }

    /// Queue an error
    pub fn queue_error(&self, error: LlmError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_result(&self) -> Result<StructuredResult, LlmError> {
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock result queued")))
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<StructuredResult, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.next_result()
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Delayed Mock Completion Client (for busy and shutdown testing)
// ============================================================================

/// Mock completion client with configurable delay
pub struct DelayedMockCompletionClient {
    inner: MockCompletionClient,
    delay: Duration,
    /// Notified when a request starts (for test synchronization)
    pub request_started: Arc<Notify>,
}

#[allow(dead_code)]
impl DelayedMockCompletionClient {
    pub fn new(model_id: impl Into<String>, delay: Duration) -> Self {
        Self {
            inner: MockCompletionClient::new(model_id),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_result(&self, result: StructuredResult) {
        self.inner.queue_result(result);
    }

    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.inner.recorded_requests()
    }
}

#[async_trait]
impl CompletionClient for DelayedMockCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<StructuredResult, LlmError> {
        self.inner.requests.lock().unwrap().push(request.clone());
        self.request_started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.next_result()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ============================================================================
// Presentation Sinks
// ============================================================================

/// Every call a sink received, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Begin(String),
    Append(Fragment),
    Finalize,
    Error(String),
    Status(Status),
}

/// Sink that records everything it is given
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub calls: Vec<SinkCall>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn appended(&self) -> Vec<Fragment> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                SinkCall::Append(fragment) => Some(fragment.clone()),
                _ => None,
            })
            .collect()
    }

    /// Appended text, words joined by spaces and breaks as newlines
    pub fn text(&self) -> String {
        let mut out = String::new();
        for fragment in self.appended() {
            match fragment {
                Fragment::Text(text) => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push(' ');
                    }
                    out.push_str(&text);
                }
                Fragment::Break => out.push('\n'),
            }
        }
        out
    }

    pub fn errors(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                SinkCall::Error(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                SinkCall::Status(status) => Some(*status),
                _ => None,
            })
            .collect()
    }
}

impl PresentationSink for RecordingSink {
    fn begin(&mut self, raw: &str) -> Result<(), SinkError> {
        self.calls.push(SinkCall::Begin(raw.to_string()));
        Ok(())
    }

    fn append(&mut self, fragment: &Fragment) -> Result<(), SinkError> {
        self.calls.push(SinkCall::Append(fragment.clone()));
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        self.calls.push(SinkCall::Finalize);
        Ok(())
    }

    fn report_error(&mut self, message: &str) {
        self.calls.push(SinkCall::Error(message.to_string()));
    }

    fn status(&mut self, status: Status) {
        self.calls.push(SinkCall::Status(status));
    }
}

/// Sink whose appends fail on a chosen call
pub struct FailingSink {
    pub inner: RecordingSink,
    /// Zero-based append call that fails; `None` fails every append
    fail_at: Option<usize>,
    appends: usize,
}

#[allow(dead_code)]
impl FailingSink {
    /// Fail only the `index`-th append
    pub fn once_at(index: usize) -> Self {
        Self {
            inner: RecordingSink::new(),
            fail_at: Some(index),
            appends: 0,
        }
    }

    /// Fail every append
    pub fn always() -> Self {
        Self {
            inner: RecordingSink::new(),
            fail_at: None,
            appends: 0,
        }
    }
}

impl PresentationSink for FailingSink {
    fn begin(&mut self, raw: &str) -> Result<(), SinkError> {
        self.inner.begin(raw)
    }

    fn append(&mut self, fragment: &Fragment) -> Result<(), SinkError> {
        let call = self.appends;
        self.appends += 1;
        match self.fail_at {
            Some(index) if index != call => self.inner.append(fragment),
            _ => Err(SinkError::Disconnected),
        }
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        self.inner.finalize()
    }

    fn report_error(&mut self, message: &str) {
        self.inner.report_error(message);
    }

    fn status(&mut self, status: Status) {
        self.inner.status(status);
    }
}
