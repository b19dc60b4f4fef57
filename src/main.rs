//! Support Desk - terminal customer support assistant
//!
//! A conversation state machine drives a structured-completion service
//! through identity capture, confirmation and request handling, while replies
//! stream to the terminal at a steady pace.

mod bridge;
mod config;
mod delivery;
mod format;
mod llm;
mod state_machine;
#[cfg(test)]
mod testing;

use bridge::{BridgeError, ShutdownOutcome, TaskBridge};
use config::SupportConfig;
use delivery::{PresentationSink, SinkError, Status};
use format::Fragment;
use llm::{CompletionClient, LoggingClient, OpenAiClient, ScriptedClient};
use state_machine::support::{support_registry, WELCOME_MESSAGE};
use state_machine::Engine;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long shutdown waits for an in-flight turn before detaching
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Env files may set RUST_LOG, so they load first and are reported once tracing is up
    let env_report = config::load_env_files();
    init_tracing();
    env_report.log();

    let config = SupportConfig::from_env()?;
    let client: Arc<dyn CompletionClient> = if config.demo {
        tracing::info!("Demo mode, using scripted replies");
        Arc::new(ScriptedClient::new())
    } else {
        Arc::new(OpenAiClient::new(config.credentials()?, &config)?)
    };
    let client = Arc::new(LoggingClient::new(client));
    tracing::info!(model = %client.model_id(), "Completion client ready");

    let engine = Engine::new(support_registry()?, client);
    let (bridge, mut presenter) = TaskBridge::start(engine, config.pacing)?;
    let mut sink = TerminalSink::new(io::stdout());

    bridge.announce(WELCOME_MESSAGE)?;
    presenter.pump_until_idle(&mut sink)?;

    let result = run_shell(&bridge, &mut presenter, &mut sink, io::stdin().lock());

    match bridge.shutdown(SHUTDOWN_TIMEOUT) {
        ShutdownOutcome::Joined => {}
        ShutdownOutcome::Detached => tracing::warn!("Exiting with a turn still in flight"),
    }
    result
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("support_desk=info"));
    let json = std::env::var("SUPPORT_DESK_LOG_JSON")
        .is_ok_and(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "yes"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false)
                    .with_writer(io::stderr),
            )
            .init();
    } else {
        registry.with(fmt::layer().with_writer(io::stderr)).init();
    }
}

/// Read a line, submit it, stream the reply; stop at END or EOF
fn run_shell<R: BufRead>(
    bridge: &TaskBridge,
    presenter: &mut bridge::Presenter,
    sink: &mut TerminalSink<impl Write>,
    mut input: R,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut line = String::new();
    loop {
        sink.prompt()?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            tracing::debug!("End of input");
            return Ok(());
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let handle = match bridge.submit(text) {
            Ok(handle) => handle,
            Err(e @ BridgeError::Busy) => {
                sink.report_error(e.user_reply());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(task_id = handle.id(), "Streaming reply");
        presenter.pump_until_idle(sink)?;
        match handle.wait() {
            Ok(turn) if turn.next_state.is_terminal() => return Ok(()),
            Ok(_) => {}
            Err(BridgeError::Engine(e)) if e.is_fatal() => return Err(e.into()),
            Err(BridgeError::Engine(e)) => tracing::debug!(error = %e, "Turn failed"),
            Err(e) => return Err(e.into()),
        }
    }
}

// ============================================================================
// Terminal Sink
// ============================================================================

/// Writes paced fragments to a terminal
struct TerminalSink<W: Write> {
    out: W,
    at_line_start: bool,
}

impl<W: Write> TerminalSink<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            at_line_start: true,
        }
    }

    fn prompt(&mut self) -> io::Result<()> {
        write!(self.out, "\nYou: ")?;
        self.out.flush()
    }
}

impl<W: Write> PresentationSink for TerminalSink<W> {
    fn begin(&mut self, _raw: &str) -> Result<(), SinkError> {
        write!(self.out, "\nAssistant: ")?;
        self.at_line_start = true;
        self.out.flush()?;
        Ok(())
    }

    fn append(&mut self, fragment: &Fragment) -> Result<(), SinkError> {
        match fragment {
            Fragment::Text(text) => {
                if !self.at_line_start {
                    write!(self.out, " ")?;
                }
                write!(self.out, "{text}")?;
                self.at_line_start = false;
            }
            Fragment::Break => {
                writeln!(self.out)?;
                self.at_line_start = true;
            }
        }
        self.out.flush()?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        writeln!(self.out)?;
        self.at_line_start = true;
        self.out.flush()?;
        Ok(())
    }

    fn report_error(&mut self, message: &str) {
        if writeln!(self.out, "\n[error] {message}").is_err() {
            tracing::error!(message, "Failed to write error to terminal");
        }
    }

    fn status(&mut self, status: Status) {
        if status == Status::Thinking {
            // Best effort; the reply itself reports write failures
            let _ = writeln!(self.out, "({})", status.label());
        } else {
            tracing::debug!(status = status.label(), "Status");
        }
    }
}
