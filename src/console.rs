//! Async driver around [`ConnectionController`].
//!
//! The driver is the single writer of console state. Command outcomes and
//! bridge events are funnelled into [`ConsoleDriver::next_event`]; the caller
//! (the terminal loop, or a test) feeds whatever it receives back into
//! [`ConsoleDriver::dispatch`], one event at a time.
//!
//! Backend commands go through one worker task fed by a queue, so they reach
//! the backend in the order the controller issued them.

use crate::bridge::{BackendEvent, EventBridge, EventSource};
use crate::config::ConsoleConfig;
use crate::controller::{ConnectionController, ConsoleEvent, ConsoleView, Effect};
use crate::gateway::{CommandGateway, ForwardBackend};
use crate::session::{ConnectionState, Field};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const MAX_ACTIVITY_LINES: usize = 1000;

/// How long quitting waits for queued commands, the final stop included.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub fn get_timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Timestamped activity lines shown under the chart.
#[derive(Debug, Default)]
pub struct ActivityLog {
    lines: Vec<String>,
    quiet: bool,
}

impl ActivityLog {
    pub fn new(quiet: bool) -> Self {
        ActivityLog {
            lines: Vec::new(),
            quiet,
        }
    }

    pub fn push(&mut self, message: impl AsRef<str>) {
        if self.quiet {
            return;
        }
        self.lines
            .push(format!("[{}] {}", get_timestamp(), message.as_ref()));
        if self.lines.len() > MAX_ACTIVITY_LINES {
            self.lines.remove(0);
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Continue,
    Quit,
}

pub struct ConsoleDriver {
    controller: ConnectionController,
    commands_tx: mpsc::UnboundedSender<Effect>,
    worker: JoinHandle<()>,
    bridge: Option<EventBridge>,
    outcomes_rx: mpsc::UnboundedReceiver<ConsoleEvent>,
    status_tx: watch::Sender<ConsoleView>,
    activity: ActivityLog,
    focus: Field,
}

impl ConsoleDriver {
    /// Activates the event bridge against `backend` and starts the command
    /// worker. Must be called inside a tokio runtime. Subscriptions live until
    /// [`ConsoleDriver::shutdown`] (or drop).
    pub fn new<B>(controller: ConnectionController, backend: Arc<B>, activity: ActivityLog) -> Self
    where
        B: ForwardBackend + EventSource,
    {
        let source: Arc<dyn EventSource> = backend.clone();
        let bridge = EventBridge::activate(source);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(controller.view(Instant::now()));
        let worker = tokio::spawn(command_worker(
            CommandGateway::new(backend),
            commands_rx,
            outcomes_tx,
        ));

        ConsoleDriver {
            controller,
            commands_tx,
            worker,
            bridge: Some(bridge),
            outcomes_rx,
            status_tx,
            activity,
            focus: Field::LocalAddress,
        }
    }

    pub fn controller(&self) -> &ConnectionController {
        &self.controller
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn focus(&self) -> Field {
        self.focus
    }

    pub fn view(&self) -> ConsoleView {
        self.controller.view(Instant::now())
    }

    pub fn status_receiver(&self) -> watch::Receiver<ConsoleView> {
        self.status_tx.subscribe()
    }

    /// Waits for the next command outcome, bridge event or error expiry.
    /// The end of the bridge stream is reported once, as
    /// [`ConsoleEvent::BackendLost`].
    pub async fn next_event(&mut self) -> ConsoleEvent {
        let deadline = self.controller.error_deadline();
        tokio::select! {
            Some(event) = self.outcomes_rx.recv() => event,
            event = recv_bridge(&mut self.bridge) => match event {
                Some(event) => ConsoleEvent::from(event),
                None => {
                    if let Some(bridge) = self.bridge.take() {
                        bridge.deactivate();
                    }
                    warn!("Backend event stream ended");
                    ConsoleEvent::BackendLost
                }
            },
            _ = sleep_until(deadline) => ConsoleEvent::Tick,
        }
    }

    pub fn dispatch(&mut self, event: ConsoleEvent) {
        let now = Instant::now();
        let before = self.controller.state();
        let errors_before = self.controller.errors_shown();

        let effect = self.controller.handle(event, now);

        let after = self.controller.state();
        if before != after {
            self.note_transition(before, after);
        }
        if self.controller.errors_shown() != errors_before {
            if let Some(error) = self.controller.error() {
                let message = format!("Error: {}", error.message);
                self.activity.push(message);
            }
        }
        if let Some(effect) = effect {
            self.enqueue(effect);
        }
        self.publish(now);
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> KeyAction {
        if key.kind != KeyEventKind::Press {
            return KeyAction::Continue;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return KeyAction::Quit;
            }
            KeyCode::Tab | KeyCode::Down => self.focus = self.focus.next(),
            KeyCode::BackTab | KeyCode::Up => self.focus = self.focus.prev(),
            KeyCode::Enter => self.dispatch(ConsoleEvent::Submit),
            KeyCode::Esc => self.dispatch(ConsoleEvent::Stop),
            KeyCode::Backspace => {
                self.controller.draft_mut().value_mut(self.focus).pop();
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.controller.draft_mut().value_mut(self.focus).push(c);
            }
            _ => {}
        }
        KeyAction::Continue
    }

    /// Applies a reloaded config file; returns true when some of the
    /// changes only take effect after a restart.
    pub fn apply_config(&mut self, old: &ConsoleConfig, new: &ConsoleConfig) -> bool {
        let before = self.controller.settings();
        let after = new.controller_settings();
        if before != after {
            self.controller.apply_settings(after);
            if before.max_samples != after.max_samples {
                self.activity
                    .push(format!("Chart window updated to: {} samples", after.max_samples));
            }
            if before.error_display != after.error_display {
                self.activity.push(format!(
                    "Error display time updated to: {} ms",
                    after.error_display.as_millis()
                ));
            }
            if before.reset_telemetry_on_connect != after.reset_telemetry_on_connect {
                self.activity.push(format!(
                    "Reset chart on connect: {}",
                    if after.reset_telemetry_on_connect { "enabled" } else { "disabled" }
                ));
            }
            self.publish(Instant::now());
        }

        let restart = old.needs_restart(new);
        if restart {
            self.activity
                .push("Note: backend, logging or httpd settings changed - restart required");
        }
        restart
    }

    /// Stops an active forward, waits up to [`SHUTDOWN_GRACE`] for the
    /// queued commands, then releases both event subscriptions.
    pub async fn shutdown(mut self) {
        if let Some(effect) = self.controller.handle(ConsoleEvent::Stop, Instant::now()) {
            self.enqueue(effect);
        }

        let ConsoleDriver {
            commands_tx,
            mut worker,
            bridge,
            ..
        } = self;
        drop(commands_tx);
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await.is_err() {
            warn!(
                "Backend did not finish pending commands within {:?}, giving up",
                SHUTDOWN_GRACE
            );
            worker.abort();
        }

        if let Some(bridge) = bridge {
            bridge.deactivate();
        }
        info!("Console shut down");
    }

    fn enqueue(&mut self, effect: Effect) {
        if self.commands_tx.send(effect).is_err() {
            warn!("Command worker gone, command dropped");
        }
    }

    fn note_transition(&mut self, before: ConnectionState, after: ConnectionState) {
        let message = match (before, after) {
            (_, ConnectionState::Connecting) => match self.controller.session() {
                Some(session) => format!("Connecting {}", session.describe()),
                None => "Connecting".to_string(),
            },
            (_, ConnectionState::Connected) => "Forward started".to_string(),
            (ConnectionState::Connecting, ConnectionState::Disconnected) => {
                "Connect attempt ended".to_string()
            }
            (_, ConnectionState::Disconnected) => "Forward stopped".to_string(),
        };
        self.activity.push(message);
    }

    fn publish(&self, now: Instant) {
        self.status_tx.send_replace(self.controller.view(now));
    }
}

/// Runs commands one at a time in queue order. Only start outcomes are
/// reported back; a stop always resolves.
async fn command_worker<B: ForwardBackend>(
    gateway: CommandGateway<B>,
    mut commands: mpsc::UnboundedReceiver<Effect>,
    outcomes: mpsc::UnboundedSender<ConsoleEvent>,
) {
    while let Some(effect) = commands.recv().await {
        match effect {
            Effect::StartForward { attempt, config } => {
                let outcome = gateway.start_forward(&config).await;
                if outcomes
                    .send(ConsoleEvent::StartResolved { attempt, outcome })
                    .is_err()
                {
                    debug!(attempt, "console gone before start resolved");
                }
            }
            Effect::StopForward => gateway.stop_forward().await,
        }
    }
    debug!("command worker finished");
}

async fn recv_bridge(bridge: &mut Option<EventBridge>) -> Option<BackendEvent> {
    match bridge {
        Some(bridge) => bridge.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
