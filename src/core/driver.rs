//! Instrument driver
//!
//! Ties the pieces together for one instrument: inbound bytes are chunked by
//! the driver's recognizers and routed (command responses, samples, events),
//! every protocol event funnels through a single dispatcher task, and the
//! state machine's actions are carried out with the command/response matcher
//! and the scheduler.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::command::{CommandKind, CommandResponseMatcher, PendingCommand, ResponseBuffer};
use super::dispatcher::{event_channel, Envelope, EventDispatcher, EventQueue, Origin};
use super::error::{ConfigError, ParseError, ProtocolError};
use super::scheduler::{Scheduler, Trigger};
use super::state_machine::{Action, ProtocolEvent, ProtocolState, ProtocolStateMachine, StateTransition};
use super::stream::{ChunkKind, StreamBuffer};
use super::transport::Connection;
use crate::config::{CommandTable, DriverConfig};

/// Scheduler id of the leveling deadline
pub const LEVELING_JOB: &str = "leveling_timeout";

/// Capacity of the driver event channel
const EVENT_CAPACITY: usize = 1024;

/// Where inbound chunks of a recognizer go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Command echoes and replies, read by the response matcher
    Response,
    /// Instrument data, published as [`DriverEvent::Sample`]
    Sample,
    /// Known noise
    Ignore,
    /// Status line that raises a protocol event
    Event(ProtocolEvent),
}

/// Driver event
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// Protocol state changed
    StateChanged {
        /// Previous state
        from: ProtocolState,
        /// New state
        to: ProtocolState,
    },
    /// Sample chunk received
    Sample {
        /// Recognizer name
        recognizer: String,
        /// Raw chunk bytes
        raw: Bytes,
    },
    /// Needs operator attention
    Alert(String),
    /// Inbound bytes nothing recognized
    ParseError(String),
    /// Command written to the device
    CommandSent(Bytes),
    /// Raw inbound bytes while in direct access
    DirectData(Bytes),
}

/// Compiled command set
#[derive(Debug, Clone)]
struct Commands {
    status: PendingCommand,
    data_on: PendingCommand,
    data_off: PendingCommand,
    level_on: PendingCommand,
    level_off: PendingCommand,
}

impl Commands {
    fn compile(table: &CommandTable) -> Result<Self, ConfigError> {
        let build = |kind: CommandKind| {
            table
                .get(kind)
                .ok_or_else(|| ConfigError::MissingCommand(kind.name().into()))?
                .compile(kind.name())
        };
        Ok(Self {
            status: build(CommandKind::Status)?,
            data_on: build(CommandKind::DataOn)?,
            data_off: build(CommandKind::DataOff)?,
            level_on: build(CommandKind::LevelOn)?,
            level_off: build(CommandKind::LevelOff)?,
        })
    }

    fn get(&self, kind: CommandKind) -> &PendingCommand {
        match kind {
            CommandKind::Status => &self.status,
            CommandKind::DataOn => &self.data_on,
            CommandKind::DataOff => &self.data_off,
            CommandKind::LevelOn => &self.level_on,
            CommandKind::LevelOff => &self.level_off,
        }
    }
}

/// State shared by handles and the dispatcher task
struct Shared {
    inbound: Mutex<StreamBuffer>,
    routes: Vec<Route>,
    machine: Mutex<ProtocolStateMachine>,
    matcher: CommandResponseMatcher,
    connection: Arc<dyn Connection>,
    dispatcher: EventDispatcher,
    events: broadcast::Sender<DriverEvent>,
}

/// Cloneable access to a running driver
#[derive(Clone)]
pub struct DriverHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverHandle").field("state", &self.current_state()).finish()
    }
}

/// A running instrument driver
pub struct InstrumentDriver {
    id: Uuid,
    handle: DriverHandle,
    scheduler: Scheduler,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl InstrumentDriver {
    /// Validate the configuration and start the dispatcher task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: &DriverConfig, connection: Arc<dyn Connection>) -> Result<Self, ConfigError> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|_| ConfigError::InvalidValue("driver requires a tokio runtime".into()))?;

        let commands = Commands::compile(&config.commands)?;
        let autosample = config
            .autosample_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|source| ConfigError::InvalidPattern { name: "autosample_pattern".into(), source })?;

        let mut recognizers = Vec::with_capacity(config.recognizers.len());
        let mut routes = Vec::with_capacity(config.recognizers.len());
        for spec in &config.recognizers {
            recognizers.push(spec.build()?);
            routes.push(*spec.role());
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut machine = ProtocolStateMachine::new();
        let state_events = events.clone();
        machine.on_state_change(move |from, to| {
            let _ = state_events.send(DriverEvent::StateChanged { from, to });
        });

        let (dispatcher, queue) = event_channel();
        let responses = Arc::new(ResponseBuffer::new(config.max_response_len));
        let shared = Arc::new(Shared {
            inbound: Mutex::new(StreamBuffer::new(recognizers).with_max_pending(config.max_pending)),
            routes,
            machine: Mutex::new(machine),
            matcher: CommandResponseMatcher::new(
                connection.clone(),
                responses,
                Duration::from_millis(config.poll_interval_ms),
            ),
            connection,
            dispatcher: dispatcher.clone(),
            events,
        });

        let scheduler = Scheduler::new(dispatcher, runtime.clone());
        let shutdown = CancellationToken::new();
        let actor = Actor {
            shared: shared.clone(),
            scheduler: scheduler.clone(),
            commands,
            autosample,
            leveling_timeout: Duration::from_millis(config.leveling_timeout_ms),
            leveling_armed: None,
        };
        let task = runtime.spawn(actor.run(queue, shutdown.clone()));

        let id = Uuid::new_v4();
        info!(driver = %id, "driver started");
        Ok(Self { id, handle: DriverHandle { shared }, scheduler, shutdown, task: Some(task) })
    }

    /// Driver instance id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Handle for feeding data and issuing events
    pub fn handle(&self) -> DriverHandle {
        self.handle.clone()
    }

    /// Scheduled jobs of this driver
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Cancel every job and stop the dispatcher task
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        self.scheduler.cancel_all();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!(driver = %self.id, "driver stopped");
    }
}

impl Drop for InstrumentDriver {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.scheduler.cancel_all();
    }
}

impl DriverHandle {
    /// Inbound bytes from the transport.
    ///
    /// Runs on the caller's thread; events raised by status lines are posted
    /// to the dispatcher, never handled inline.
    pub fn got_data(&self, data: &[u8]) {
        if self.current_state().allows_direct() {
            let _ = self.shared.events.send(DriverEvent::DirectData(Bytes::copy_from_slice(data)));
            return;
        }

        let mut inbound = self.shared.inbound.lock();
        inbound.append(data);
        while let Some(chunk) = inbound.next_chunk(false) {
            match chunk.kind {
                ChunkKind::Matched(id) => {
                    let route = self.shared.routes.get(id).copied().unwrap_or(Route::Ignore);
                    debug!(recognizer = inbound.recognizer_name(id), ?route, len = chunk.len(), "inbound chunk");
                    match route {
                        Route::Response => self.shared.matcher.responses().push(&chunk.bytes),
                        Route::Sample => {
                            let _ = self.shared.events.send(DriverEvent::Sample {
                                recognizer: inbound.recognizer_name(id).to_string(),
                                raw: chunk.bytes,
                            });
                        }
                        Route::Ignore => {}
                        Route::Event(event) => {
                            if let Err(e) = self.shared.dispatcher.post(event, Origin::Detector) {
                                warn!(?event, "cannot post detected event: {e}");
                            }
                        }
                    }
                }
                ChunkKind::NonData => {
                    let error = ParseError::UnexpectedData { position: chunk.start, bytes: chunk.bytes.to_vec() };
                    warn!("{error}");
                    let _ = self.shared.events.send(DriverEvent::ParseError(error.to_string()));
                }
            }
        }
    }

    /// Run an event through the state machine and wait for the new state
    pub async fn execute(&self, event: ProtocolEvent) -> Result<ProtocolState, ProtocolError> {
        self.shared.dispatcher.request(event).await
    }

    /// Queue an event without waiting; ignored if no handler exists by the
    /// time it is processed
    pub fn post(&self, event: ProtocolEvent) -> Result<(), ProtocolError> {
        self.shared.dispatcher.post(event, Origin::Detector)
    }

    /// Current protocol state
    pub fn current_state(&self) -> ProtocolState {
        self.shared.machine.lock().state()
    }

    /// Transition history
    pub fn history(&self) -> Vec<StateTransition> {
        self.shared.machine.lock().history().to_vec()
    }

    /// Subscribe to driver events
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.shared.events.subscribe()
    }

    /// Send an ad-hoc command and wait for its response
    pub async fn send_command(&self, cmd: &PendingCommand) -> Result<String, ProtocolError> {
        let _ = self.shared.events.send(DriverEvent::CommandSent(cmd.bytes.clone()));
        self.shared.matcher.send_command(cmd).await
    }

    /// Write raw operator bytes; only valid in direct access
    pub async fn send_direct(&self, data: &[u8]) -> Result<(), ProtocolError> {
        let state = self.current_state();
        if !state.allows_direct() {
            return Err(ProtocolError::InvalidState(state));
        }
        self.shared.connection.send(data).await?;
        Ok(())
    }
}

/// The dispatcher task
struct Actor {
    shared: Arc<Shared>,
    scheduler: Scheduler,
    commands: Commands,
    autosample: Option<Regex>,
    leveling_timeout: Duration,
    /// Generation of the leveling deadline guarding the current session
    leveling_armed: Option<u64>,
}

impl Actor {
    async fn run(mut self, mut queue: EventQueue, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                envelope = queue.recv() => match envelope {
                    Some(envelope) => self.handle(envelope).await,
                    None => break,
                },
            }
        }
        queue.close();
        debug!("dispatcher task finished");
    }

    async fn handle(&mut self, envelope: Envelope) {
        let event = envelope.event;
        let state = self.shared.machine.lock().state();

        let action = if self.is_current_deadline(event, &envelope.origin) {
            super::state_machine::plan(state, event)
        } else {
            None
        };
        let Some(action) = action else {
            if envelope.origin.is_async() {
                debug!(?event, %state, origin = %envelope.origin, "no handler, dropping stale event");
                return;
            }
            warn!(?event, %state, "invalid state transition requested");
            envelope.respond(Err(ProtocolError::InvalidStateTransition { state, event }));
            return;
        };

        let result = self.perform(event, action).await;
        if let Err(ref e) = result {
            warn!(?event, %state, "transition failed: {e}");
            if matches!(action, Action::FinishLeveling { .. }) {
                // Still leveling: keep a deadline so the exit is retried
                self.arm_leveling();
            }
            if envelope.origin.is_async() {
                self.alert(format!("{event:?} from {} failed in {state}: {e}", envelope.origin));
            }
        }
        envelope.respond(result);
    }

    /// A leveling timeout counts only when it comes from the deadline armed
    /// for the current session
    fn is_current_deadline(&self, event: ProtocolEvent, origin: &Origin) -> bool {
        if event != ProtocolEvent::LevelingTimeout {
            return true;
        }
        match origin {
            Origin::Timer { id, generation } => id == LEVELING_JOB && self.leveling_armed == Some(*generation),
            Origin::Command | Origin::Detector => false,
        }
    }

    fn arm_leveling(&mut self) {
        let generation =
            self.scheduler.register(LEVELING_JOB, Trigger::After(self.leveling_timeout), ProtocolEvent::LevelingTimeout);
        self.leveling_armed = Some(generation);
    }

    fn disarm_leveling(&mut self) {
        self.scheduler.cancel(LEVELING_JOB);
        self.leveling_armed = None;
    }

    fn alert(&self, message: String) {
        warn!("{message}");
        let _ = self.shared.events.send(DriverEvent::Alert(message));
    }

    async fn perform(&mut self, event: ProtocolEvent, action: Action) -> Result<ProtocolState, ProtocolError> {
        let (to, reason) = match action {
            Action::QueryStatus => {
                let reply = self.send(CommandKind::Status).await?;
                let streaming = self
                    .autosample
                    .as_ref()
                    .is_some_and(|re| re.is_match(reply.as_bytes()));
                let to = if streaming { ProtocolState::Autosample } else { ProtocolState::Command };
                (to, Some(reply.trim().to_string()))
            }
            Action::StartSampling => {
                self.send(CommandKind::DataOn).await?;
                (ProtocolState::Autosample, None)
            }
            Action::StopSampling => {
                self.send(CommandKind::DataOff).await?;
                (ProtocolState::Command, None)
            }
            Action::BeginLeveling => {
                self.send(CommandKind::LevelOn).await?;
                self.arm_leveling();
                (ProtocolState::Leveling, None)
            }
            Action::FinishLeveling { alert } => {
                // The deadline either fired already or is no longer wanted
                self.disarm_leveling();
                let reason = if alert {
                    let message = format!(
                        "leveling did not complete within {}ms, resuming sampling",
                        self.leveling_timeout.as_millis()
                    );
                    self.alert(message.clone());
                    Some(message)
                } else {
                    None
                };
                self.send(CommandKind::LevelOff).await?;
                self.send(CommandKind::DataOn).await?;
                (ProtocolState::Autosample, reason)
            }
            Action::EnterDirectAccess => (ProtocolState::DirectAccess, None),
            Action::ExitDirectAccess => {
                // Bytes buffered before direct access are stale
                self.shared.inbound.lock().reset();
                (ProtocolState::Command, None)
            }
        };

        let mut machine = self.shared.machine.lock();
        let from = machine.state();
        machine.transition(event, to, reason.as_deref())?;
        info!(%from, %to, ?event, "state changed");
        Ok(to)
    }

    async fn send(&self, kind: CommandKind) -> Result<String, ProtocolError> {
        let cmd = self.commands.get(kind);
        let _ = self.shared.events.send(DriverEvent::CommandSent(cmd.bytes.clone()));
        self.shared.matcher.send_command(cmd).await
    }
}
