//! Session state machine.
//!
//! Every input the console reacts to (operator actions, command outcomes,
//! backend push events, the error timer) is a [`ConsoleEvent`] fed through
//! [`ConnectionController::handle`]. The controller never performs I/O
//! itself; it returns the [`Effect`] the driver has to run, which keeps the
//! whole transition table testable with plain values.

use crate::bridge::BackendEvent;
use crate::gateway::{BackendError, StartOutcome};
use crate::session::{ConnectionState, SessionConfig, SessionDraft};
use crate::telemetry::{TelemetrySample, TelemetryWindow, DEFAULT_MAX_SAMPLES};
use crate::validate::validate;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_ERROR_DISPLAY: Duration = Duration::from_millis(3000);

pub type AttemptId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub max_samples: usize,
    pub error_display: Duration,
    pub reset_telemetry_on_connect: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            max_samples: DEFAULT_MAX_SAMPLES,
            error_display: DEFAULT_ERROR_DISPLAY,
            reset_telemetry_on_connect: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// The form's submit action: connect when idle, stop when connected.
    Submit,
    /// Explicit stop, allowed while connecting as well.
    Stop,
    StartResolved {
        attempt: AttemptId,
        outcome: StartOutcome,
    },
    ConnectionCount(u32),
    Transfer(TelemetrySample),
    /// The backend connection is gone; no further events or outcomes arrive.
    BackendLost,
    /// Clock advanced; expires the transient error when due.
    Tick,
}

impl From<BackendEvent> for ConsoleEvent {
    fn from(event: BackendEvent) -> Self {
        match event {
            BackendEvent::ConnectCountChange(n) => ConsoleEvent::ConnectionCount(n),
            BackendEvent::TransferStatistic(sample) => ConsoleEvent::Transfer(sample),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartForward {
        attempt: AttemptId,
        config: SessionConfig,
    },
    StopForward,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientError {
    pub message: String,
    pub expires_at: Instant,
}

/// Render-ready snapshot of the console.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleView {
    pub state: ConnectionState,
    pub button_label: &'static str,
    pub submit_enabled: bool,
    pub danger: bool,
    pub connection_count: Option<u32>,
    pub error: Option<String>,
    pub session: Option<String>,
    pub window: usize,
    pub send: Vec<u64>,
    pub recv: Vec<u64>,
}

impl ConsoleView {
    pub fn connection_count_text(&self) -> String {
        match self.connection_count {
            Some(n) => n.to_string(),
            None => "---".to_string(),
        }
    }
}

pub struct ConnectionController {
    state: ConnectionState,
    draft: SessionDraft,
    settings: ControllerSettings,
    next_attempt: AttemptId,
    active_attempt: Option<AttemptId>,
    session: Option<SessionConfig>,
    connection_count: u32,
    error: Option<TransientError>,
    errors_shown: u64,
    telemetry: TelemetryWindow,
}

impl ConnectionController {
    pub fn new(draft: SessionDraft, settings: ControllerSettings) -> Self {
        ConnectionController {
            state: ConnectionState::Disconnected,
            draft,
            settings,
            next_attempt: 0,
            active_attempt: None,
            session: None,
            connection_count: 0,
            error: None,
            errors_shown: 0,
            telemetry: TelemetryWindow::new(settings.max_samples),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn draft(&self) -> &SessionDraft {
        &self.draft
    }

    /// Operator edits go straight into the draft; the snapshot used by the
    /// backend is only taken on submit.
    pub fn draft_mut(&mut self) -> &mut SessionDraft {
        &mut self.draft
    }

    pub fn settings(&self) -> ControllerSettings {
        self.settings
    }

    pub fn telemetry(&self) -> &TelemetryWindow {
        &self.telemetry
    }

    pub fn session(&self) -> Option<&SessionConfig> {
        self.session.as_ref()
    }

    pub fn error(&self) -> Option<&TransientError> {
        self.error.as_ref()
    }

    /// Number of errors raised so far, repeats included.
    pub fn errors_shown(&self) -> u64 {
        self.errors_shown
    }

    /// When the driver has to deliver the next [`ConsoleEvent::Tick`].
    pub fn error_deadline(&self) -> Option<Instant> {
        self.error.as_ref().map(|e| e.expires_at)
    }

    pub fn apply_settings(&mut self, settings: ControllerSettings) {
        if settings.max_samples != self.settings.max_samples {
            self.telemetry.set_capacity(settings.max_samples);
        }
        self.settings = settings;
    }

    pub fn handle(&mut self, event: ConsoleEvent, now: Instant) -> Option<Effect> {
        match event {
            ConsoleEvent::Submit => self.submit(now),
            ConsoleEvent::Stop => self.stop(),
            ConsoleEvent::StartResolved { attempt, outcome } => {
                self.resolve_start(attempt, outcome, now)
            }
            ConsoleEvent::ConnectionCount(n) => {
                match self.state {
                    ConnectionState::Connecting | ConnectionState::Connected => {
                        self.connection_count = n;
                    }
                    ConnectionState::Disconnected => {
                        debug!(count = n, "connection count ignored while disconnected");
                    }
                }
                None
            }
            ConsoleEvent::Transfer(sample) => {
                self.telemetry.push(sample);
                None
            }
            ConsoleEvent::BackendLost => {
                if self.state != ConnectionState::Disconnected {
                    self.active_attempt = None;
                    self.session = None;
                    self.transition(ConnectionState::Disconnected);
                }
                self.show_error(BackendError::Disconnected.to_string(), now);
                None
            }
            ConsoleEvent::Tick => {
                self.expire_error(now);
                None
            }
        }
    }

    pub fn view(&self, now: Instant) -> ConsoleView {
        let (button_label, submit_enabled, danger) = match self.state {
            ConnectionState::Disconnected => ("Connect", true, false),
            ConnectionState::Connecting => ("Connecting", false, false),
            ConnectionState::Connected => ("Stop", true, true),
        };
        ConsoleView {
            state: self.state,
            button_label,
            submit_enabled,
            danger,
            connection_count: (self.state == ConnectionState::Connected)
                .then_some(self.connection_count),
            error: self
                .error
                .as_ref()
                .filter(|e| now < e.expires_at)
                .map(|e| e.message.clone()),
            session: self.session.as_ref().map(SessionConfig::describe),
            window: self.telemetry.capacity(),
            send: self.telemetry.send().collect(),
            recv: self.telemetry.recv().collect(),
        }
    }

    fn submit(&mut self, now: Instant) -> Option<Effect> {
        match self.state {
            ConnectionState::Disconnected => match validate(&self.draft) {
                Ok(config) => {
                    self.next_attempt += 1;
                    let attempt = self.next_attempt;
                    self.active_attempt = Some(attempt);
                    self.session = Some(config.clone());
                    self.error = None;
                    self.connection_count = 0;
                    if self.settings.reset_telemetry_on_connect {
                        self.telemetry.clear();
                    }
                    self.transition(ConnectionState::Connecting);
                    Some(Effect::StartForward { attempt, config })
                }
                Err(err) => {
                    self.show_error(err.to_string(), now);
                    None
                }
            },
            ConnectionState::Connecting => {
                debug!("submit ignored while connecting");
                None
            }
            ConnectionState::Connected => self.stop(),
        }
    }

    fn stop(&mut self) -> Option<Effect> {
        if self.state == ConnectionState::Disconnected {
            debug!("stop ignored while disconnected");
            return None;
        }
        self.active_attempt = None;
        self.session = None;
        self.transition(ConnectionState::Disconnected);
        Some(Effect::StopForward)
    }

    fn resolve_start(
        &mut self,
        attempt: AttemptId,
        outcome: StartOutcome,
        now: Instant,
    ) -> Option<Effect> {
        let current =
            self.state == ConnectionState::Connecting && self.active_attempt == Some(attempt);
        if !current {
            debug!(attempt, ?outcome, state = %self.state, "discarding stale start result");
            // The backend may have come up after the operator stopped. Tear it
            // down again, unless a newer attempt now owns the backend.
            let abandoned = self.state == ConnectionState::Disconnected;
            return (abandoned && outcome == StartOutcome::Started).then_some(Effect::StopForward);
        }

        match outcome {
            StartOutcome::Started => {
                self.transition(ConnectionState::Connected);
            }
            StartOutcome::Rejected(reason) => {
                self.active_attempt = None;
                self.session = None;
                self.transition(ConnectionState::Disconnected);
                self.show_error(reason, now);
            }
        }
        None
    }

    fn show_error(&mut self, message: String, now: Instant) {
        info!("Error shown: {}", message);
        self.errors_shown += 1;
        self.error = Some(TransientError {
            message,
            expires_at: now + self.settings.error_display,
        });
    }

    fn expire_error(&mut self, now: Instant) {
        if self.error.as_ref().is_some_and(|e| now >= e.expires_at) {
            self.error = None;
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        info!(from = %self.state, to = %to, "state transition");
        self.state = to;
    }
}
