//! Paced delivery of reply fragments to a presentation sink

use crate::format::Fragment;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Presentation status shown alongside the transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Thinking,
    Waiting,
    Completed,
    Failed,
}

impl Status {
    pub fn label(self) -> &'static str {
        match self {
            Status::Thinking => "AI is thinking...",
            Status::Waiting => "Waiting for your response...",
            Status::Completed => "Conversation completed",
            Status::Failed => "Error occurred",
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Presentation surface is gone")]
    Disconnected,
    #[error("Presentation I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Where paced output goes.
///
/// `begin` opens a message and receives the raw text so a sink that fails
/// mid-message can still show it whole.
pub trait PresentationSink {
    fn begin(&mut self, raw: &str) -> Result<(), SinkError>;
    fn append(&mut self, fragment: &Fragment) -> Result<(), SinkError>;
    fn finalize(&mut self) -> Result<(), SinkError>;
    fn report_error(&mut self, message: &str);
    fn status(&mut self, _status: Status) {}
}

/// Delays between fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub initial_delay: Duration,
    pub fragment_delay: Duration,
}

impl Pacing {
    pub fn new(initial_delay: Duration, fragment_delay: Duration) -> Self {
        Self {
            initial_delay,
            fragment_delay,
        }
    }

    /// No delays at all
    #[allow(dead_code)] // Used by tests
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_millis(30))
    }
}

/// How a delivery ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Sink failed mid-message; raw text was sent as one unit instead
    Degraded,
    /// Even the fallback failed; the error was reported
    Failed,
}

/// Push fragments to the sink in order, one per pacing tick, then finalize.
///
/// Cancellation stops the sleeping, not the output: remaining fragments are
/// appended immediately.
pub async fn deliver<S>(
    raw: &str,
    fragments: &[Fragment],
    sink: &mut S,
    pacing: &Pacing,
    cancel: &CancellationToken,
) -> DeliveryOutcome
where
    S: PresentationSink + ?Sized,
{
    if let Err(e) = sink.begin(raw) {
        return fall_back(raw, sink, &e);
    }

    for (index, fragment) in fragments.iter().enumerate() {
        let delay = if index == 0 {
            pacing.initial_delay
        } else {
            pacing.fragment_delay
        };
        pause(delay, cancel).await;

        if let Err(e) = sink.append(fragment) {
            tracing::warn!(
                error = %e,
                delivered = index,
                remaining = fragments.len() - index,
                "Sink failed mid-message, falling back to raw text"
            );
            return fall_back(raw, sink, &e);
        }
    }

    match sink.finalize() {
        Ok(()) => DeliveryOutcome::Delivered,
        Err(e) => {
            tracing::warn!(error = %e, "Sink failed to finalize");
            sink.report_error(&format!("Failed to display reply: {e}"));
            DeliveryOutcome::Failed
        }
    }
}

fn fall_back<S>(raw: &str, sink: &mut S, cause: &SinkError) -> DeliveryOutcome
where
    S: PresentationSink + ?Sized,
{
    let fallback = Fragment::Text(raw.to_string());
    match sink.append(&fallback).and_then(|()| sink.finalize()) {
        Ok(()) => DeliveryOutcome::Degraded,
        Err(e) => {
            tracing::error!(error = %e, cause = %cause, "Fallback delivery failed");
            sink.report_error(&format!("Failed to display reply: {cause}"));
            DeliveryOutcome::Failed
        }
    }
}

async fn pause(delay: Duration, cancel: &CancellationToken) {
    if delay.is_zero() || cancel.is_cancelled() {
        return;
    }
    tokio::select! {
        () = tokio::time::sleep(delay) => {}
        () = cancel.cancelled() => {}
    }
}
