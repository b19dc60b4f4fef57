//! Task bridge between the synchronous presentation thread and the turn worker
//!
//! Two channels carry everything across the thread boundary:
//!
//! - submissions go in on an unbounded queue, so [`TaskBridge::submit`] never
//!   blocks; the engine and conversation live only on the worker thread
//! - presentation events come back out, and the presentation thread applies
//!   them to its own sink through a [`Presenter`]
//!
//! Each turn's result is also handed back on a oneshot owned by its
//! [`TaskHandle`]. The worker commits the turn before sending anything, so the
//! caller never sees a half-applied turn.

use crate::delivery::{deliver, Pacing, PresentationSink, SinkError, Status};
use crate::format::{chunk, normalize, Fragment};
use crate::state_machine::engine::ENDED_NOTICE;
use crate::state_machine::{Conversation, Engine, EngineError, TurnResult};
use chrono::{DateTime, Utc};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub const BUSY_REPLY: &str = "Please wait for the current reply to finish.";
pub const SHUTTING_DOWN_REPLY: &str = "The assistant is shutting down.";

const WORKER_THREAD_NAME: &str = "support-desk-worker";
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("A turn is already in flight")]
    Busy,

    #[error("Bridge is shut down")]
    Closed,

    #[error("Worker stopped before completing the turn")]
    WorkerGone,

    #[error("Failed to start worker: {0}")]
    Spawn(#[from] io::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl BridgeError {
    pub fn user_reply(&self) -> &'static str {
        match self {
            BridgeError::Busy => BUSY_REPLY,
            BridgeError::Closed | BridgeError::WorkerGone | BridgeError::Spawn(_) => {
                SHUTTING_DOWN_REPLY
            }
            BridgeError::Engine(e) => e.user_reply(),
        }
    }
}

// ============================================================================
// Submissions
// ============================================================================

/// One submitted turn, owned by the bridge until it completes
#[derive(Debug)]
pub struct PendingTask {
    pub id: u64,
    pub input: String,
    pub submitted_at: DateTime<Utc>,
    completion: oneshot::Sender<Result<TurnResult, EngineError>>,
}

#[derive(Debug)]
enum Job {
    Turn(PendingTask),
    Announce(String),
}

/// Caller's side of a submitted turn
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    receiver: oneshot::Receiver<Result<TurnResult, EngineError>>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Non-blocking poll; `None` while the turn is still running
    #[allow(dead_code)] // For surfaces that poll from an event loop
    pub fn try_result(&mut self) -> Option<Result<TurnResult, BridgeError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result.map_err(BridgeError::from)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(BridgeError::WorkerGone)),
        }
    }

    /// Block until the turn completes. Must not be called from async context.
    pub fn wait(self) -> Result<TurnResult, BridgeError> {
        self.receiver
            .blocking_recv()
            .map_err(|_| BridgeError::WorkerGone)?
            .map_err(BridgeError::from)
    }
}

// ============================================================================
// Presentation Events
// ============================================================================

/// Everything the worker wants shown, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentationEvent {
    /// A message starts; carries the raw text for the degrade path
    Begin { raw: String },
    Append(Fragment),
    Finalize,
    Error(String),
    Status(Status),
    /// The worker has nothing more to show for the current job
    Idle,
}

/// Worker-side sink that forwards to the presentation thread
struct ChannelSink {
    events: mpsc::UnboundedSender<PresentationEvent>,
}

impl ChannelSink {
    fn send(&self, event: PresentationEvent) -> Result<(), SinkError> {
        self.events
            .send(event)
            .map_err(|_| SinkError::Disconnected)
    }

    fn idle(&self) {
        if self.send(PresentationEvent::Idle).is_err() {
            tracing::debug!("Presenter dropped before idle");
        }
    }
}

impl PresentationSink for ChannelSink {
    fn begin(&mut self, raw: &str) -> Result<(), SinkError> {
        self.send(PresentationEvent::Begin {
            raw: raw.to_string(),
        })
    }

    fn append(&mut self, fragment: &Fragment) -> Result<(), SinkError> {
        self.send(PresentationEvent::Append(fragment.clone()))
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        self.send(PresentationEvent::Finalize)
    }

    fn report_error(&mut self, message: &str) {
        if self
            .send(PresentationEvent::Error(message.to_string()))
            .is_err()
        {
            tracing::warn!(message, "Presenter dropped, error not shown");
        }
    }

    fn status(&mut self, status: Status) {
        // Status is advisory; a dropped presenter surfaces on the next message
        let _ = self.send(PresentationEvent::Status(status));
    }
}

/// Presentation-thread side of the event channel
pub struct Presenter {
    events: mpsc::UnboundedReceiver<PresentationEvent>,
    current_raw: Option<String>,
    degraded: bool,
}

impl Presenter {
    fn new(events: mpsc::UnboundedReceiver<PresentationEvent>) -> Self {
        Self {
            events,
            current_raw: None,
            degraded: false,
        }
    }

    /// Apply every event already waiting. Returns true if the worker went idle.
    #[allow(dead_code)] // For surfaces that poll from an event loop
    pub fn pump(&mut self, sink: &mut dyn PresentationSink) -> bool {
        let mut idle = false;
        while let Ok(event) = self.events.try_recv() {
            idle |= self.apply(event, sink);
        }
        idle
    }

    /// Block applying events until the worker goes idle.
    ///
    /// Must not be called from async context.
    pub fn pump_until_idle(&mut self, sink: &mut dyn PresentationSink) -> Result<(), BridgeError> {
        loop {
            let event = self.events.blocking_recv().ok_or(BridgeError::WorkerGone)?;
            if self.apply(event, sink) {
                return Ok(());
            }
        }
    }

    fn apply(&mut self, event: PresentationEvent, sink: &mut dyn PresentationSink) -> bool {
        match event {
            PresentationEvent::Begin { raw } => {
                self.degraded = false;
                let result = sink.begin(&raw);
                self.current_raw = Some(raw);
                if let Err(e) = result {
                    self.degrade(sink, &e);
                }
            }
            PresentationEvent::Append(fragment) => {
                if !self.degraded {
                    if let Err(e) = sink.append(&fragment) {
                        self.degrade(sink, &e);
                    }
                }
            }
            PresentationEvent::Finalize => {
                if !self.degraded {
                    if let Err(e) = sink.finalize() {
                        sink.report_error(&format!("Failed to display reply: {e}"));
                    }
                }
                self.current_raw = None;
                self.degraded = false;
            }
            PresentationEvent::Error(message) => sink.report_error(&message),
            PresentationEvent::Status(status) => sink.status(status),
            PresentationEvent::Idle => return true,
        }
        false
    }

    /// Skip the rest of this message and show its raw text in one piece
    fn degrade(&mut self, sink: &mut dyn PresentationSink, cause: &SinkError) {
        tracing::warn!(error = %cause, "Presentation sink failed, showing raw text");
        self.degraded = true;
        let Some(raw) = self.current_raw.clone() else {
            return;
        };
        if let Err(e) = sink
            .append(&Fragment::Text(raw))
            .and_then(|()| sink.finalize())
        {
            sink.report_error(&format!("Failed to display reply: {e}"));
        }
    }
}

// ============================================================================
// Task Bridge
// ============================================================================

/// How [`TaskBridge::shutdown`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Joined,
    /// Worker still busy at the deadline; left to finish on its own
    Detached,
}

pub struct TaskBridge {
    submissions: Option<mpsc::UnboundedSender<Job>>,
    in_flight: Arc<AtomicBool>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl TaskBridge {
    /// Start the worker thread. The engine and its conversation move onto it.
    pub fn start(engine: Engine, pacing: Pacing) -> Result<(Self, Presenter), BridgeError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let in_flight = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let worker = Worker {
            conversation: engine.start_conversation(),
            engine,
            sink: ChannelSink { events: event_tx },
            in_flight: in_flight.clone(),
            pacing,
            cancel: cancel.clone(),
        };
        tracing::info!(conversation_id = %worker.conversation.id(), "Starting worker");

        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(worker.run(job_rx)))?;

        Ok((
            Self {
                submissions: Some(job_tx),
                in_flight,
                next_id: AtomicU64::new(1),
                cancel,
                worker: Some(handle),
            },
            Presenter::new(event_rx),
        ))
    }

    /// Queue one turn. Never blocks; rejects with `Busy` while a turn is in flight.
    pub fn submit(&self, input: impl Into<String>) -> Result<TaskHandle, BridgeError> {
        let sender = self.open_sender()?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Submission rejected, turn in flight");
            return Err(BridgeError::Busy);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (completion, receiver) = oneshot::channel();
        let task = PendingTask {
            id,
            input: input.into(),
            submitted_at: Utc::now(),
            completion,
        };

        if sender.send(Job::Turn(task)).is_err() {
            self.in_flight.store(false, Ordering::Release);
            return Err(BridgeError::WorkerGone);
        }

        tracing::debug!(task_id = id, "Turn submitted");
        Ok(TaskHandle { id, receiver })
    }

    /// Queue static text for paced display, in order with turns
    pub fn announce(&self, text: impl Into<String>) -> Result<(), BridgeError> {
        self.open_sender()?
            .send(Job::Announce(text.into()))
            .map_err(|_| BridgeError::WorkerGone)
    }

    #[allow(dead_code)] // Used by tests
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn open_sender(&self) -> Result<&mpsc::UnboundedSender<Job>, BridgeError> {
        match &self.submissions {
            Some(sender) if !self.cancel.is_cancelled() => Ok(sender),
            _ => Err(BridgeError::Closed),
        }
    }

    /// Stop accepting work, let the in-flight turn finish, and join the worker.
    ///
    /// Pacing delays are cut short. A completion call is never aborted; if it
    /// outlives `timeout` the worker is detached.
    pub fn shutdown(mut self, timeout: Duration) -> ShutdownOutcome {
        self.close();
        let Some(worker) = self.worker.take() else {
            return ShutdownOutcome::Joined;
        };

        let deadline = Instant::now() + timeout;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Worker still busy, detaching"
                );
                return ShutdownOutcome::Detached;
            }
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }

        if worker.join().is_err() {
            tracing::error!("Worker thread panicked");
        }
        tracing::info!("Worker joined");
        ShutdownOutcome::Joined
    }

    fn close(&mut self) {
        self.submissions = None;
        self.cancel.cancel();
    }
}

impl Drop for TaskBridge {
    fn drop(&mut self) {
        if self.worker.is_some() {
            tracing::debug!("Bridge dropped without shutdown, detaching worker");
            self.close();
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker {
    engine: Engine,
    conversation: Conversation,
    sink: ChannelSink,
    in_flight: Arc<AtomicBool>,
    pacing: Pacing,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            match job {
                Job::Announce(text) => self.present(&text).await,
                Job::Turn(task) => self.run_task(task).await,
            }
            self.sink.idle();
        }
        tracing::debug!("Submission channel closed, worker exiting");
    }

    async fn run_task(&mut self, task: PendingTask) {
        let PendingTask {
            id,
            input,
            submitted_at,
            completion,
        } = task;
        tracing::debug!(
            task_id = id,
            queued_ms = (Utc::now() - submitted_at).num_milliseconds(),
            "Turn started"
        );

        self.sink.status(Status::Thinking);
        let result = self.engine.run_turn(&mut self.conversation, &input).await;

        match &result {
            Ok(turn) => {
                self.present(&turn.reply_text).await;
                if turn.ended_conversation() && turn.reply_text != ENDED_NOTICE {
                    self.present(ENDED_NOTICE).await;
                }
                if self.conversation.is_completed() {
                    tracing::info!(conversation_id = %self.conversation.id(), "Conversation completed");
                    self.sink.status(Status::Completed);
                } else {
                    self.sink.status(Status::Waiting);
                }
            }
            Err(e) => {
                tracing::warn!(task_id = id, error = %e, fatal = e.is_fatal(), "Turn failed");
                if e.is_fatal() {
                    self.sink.report_error(e.user_reply());
                } else {
                    self.present(e.user_reply()).await;
                }
                self.sink.status(Status::Failed);
            }
        }

        self.in_flight.store(false, Ordering::Release);
        if completion.send(result).is_err() {
            tracing::debug!(task_id = id, "Task handle dropped before completion");
        }
    }

    async fn present(&mut self, raw: &str) {
        let fragments = chunk(&normalize(raw));
        deliver(raw, &fragments, &mut self.sink, &self.pacing, &self.cancel).await;
    }
}
