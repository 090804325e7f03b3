//! Protocol State Machine
//!
//! Instrument protocol states, the events that move between them and the
//! action each transition performs. The machine itself is plain data: the
//! driver asks it for a plan, performs the I/O, then commits the transition.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::ProtocolError;

/// Protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    /// Device mode not yet known
    Unknown,
    /// Idle, accepting commands
    Command,
    /// Streaming samples
    Autosample,
    /// Calibrating, guarded by a timeout
    Leveling,
    /// Operator owns the link
    DirectAccess,
}

impl ProtocolState {
    /// Check if inbound samples are expected in this state
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Autosample | Self::Leveling)
    }

    /// Check if raw operator bytes may be written
    pub fn allows_direct(&self) -> bool {
        matches!(self, Self::DirectAccess)
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Command => "command",
            Self::Autosample => "autosample",
            Self::Leveling => "leveling",
            Self::DirectAccess => "direct_access",
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// Query the device to find its current mode
    Discover,
    /// Begin streaming
    StartAutosample,
    /// Stop streaming
    StopAutosample,
    /// Begin leveling
    StartLeveling,
    /// Device reported leveling done
    LevelingComplete,
    /// Leveling deadline passed
    LevelingTimeout,
    /// Operator stopped leveling
    StopLeveling,
    /// Hand the link to the operator
    StartDirectAccess,
    /// Take the link back
    StopDirectAccess,
}

/// What a transition does before committing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Query status, target depends on the reply
    QueryStatus,
    /// Send DATA_ON
    StartSampling,
    /// Send DATA_OFF
    StopSampling,
    /// Send LEVEL_ON and arm the leveling deadline
    BeginLeveling,
    /// Disarm the leveling deadline, send LEVEL_OFF then DATA_ON
    FinishLeveling {
        /// Raise an operator alert
        alert: bool,
    },
    /// No I/O
    EnterDirectAccess,
    /// No I/O
    ExitDirectAccess,
}

impl Action {
    /// Fixed target state; `None` when the outcome decides it
    pub fn target(&self) -> Option<ProtocolState> {
        match self {
            Action::QueryStatus => None,
            Action::StartSampling => Some(ProtocolState::Autosample),
            Action::StopSampling => Some(ProtocolState::Command),
            Action::BeginLeveling => Some(ProtocolState::Leveling),
            Action::FinishLeveling { .. } => Some(ProtocolState::Autosample),
            Action::EnterDirectAccess => Some(ProtocolState::DirectAccess),
            Action::ExitDirectAccess => Some(ProtocolState::Command),
        }
    }
}

/// Handler lookup for `(state, event)`
pub fn plan(state: ProtocolState, event: ProtocolEvent) -> Option<Action> {
    use ProtocolEvent as E;
    use ProtocolState as S;

    match (state, event) {
        (S::Unknown, E::Discover) => Some(Action::QueryStatus),

        (S::Command, E::StartAutosample) => Some(Action::StartSampling),
        (S::Autosample, E::StopAutosample) => Some(Action::StopSampling),

        (S::Command | S::Autosample, E::StartLeveling) => Some(Action::BeginLeveling),

        (S::Leveling, E::LevelingComplete) => {
            Some(Action::FinishLeveling { alert: false })
        }
        (S::Leveling, E::LevelingTimeout) => {
            Some(Action::FinishLeveling { alert: true })
        }
        (S::Leveling, E::StopLeveling) => {
            Some(Action::FinishLeveling { alert: false })
        }

        (S::Command, E::StartDirectAccess) => Some(Action::EnterDirectAccess),
        (S::DirectAccess, E::StopDirectAccess) => Some(Action::ExitDirectAccess),

        _ => None,
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: ProtocolState,
    /// New state
    pub to: ProtocolState,
    /// Triggering event
    pub event: ProtocolEvent,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Reason for transition
    pub reason: Option<String>,
}

type StateCallback = Box<dyn Fn(ProtocolState, ProtocolState) + Send + Sync>;

/// Protocol state machine
pub struct ProtocolStateMachine {
    state: ProtocolState,
    previous_state: Option<ProtocolState>,
    history: Vec<StateTransition>,
    max_history: usize,
    on_state_change: Option<StateCallback>,
}

impl Default for ProtocolStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProtocolStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolStateMachine")
            .field("state", &self.state)
            .field("previous_state", &self.previous_state)
            .field("transitions", &self.history.len())
            .finish()
    }
}

impl ProtocolStateMachine {
    /// Create a machine in `Unknown`
    pub fn new() -> Self {
        Self {
            state: ProtocolState::Unknown,
            previous_state: None,
            history: Vec::new(),
            max_history: 100,
            on_state_change: None,
        }
    }

    /// Cap the retained history
    #[must_use]
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self
    }

    /// Get current state
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Get previous state
    pub fn previous_state(&self) -> Option<ProtocolState> {
        self.previous_state
    }

    /// Get state history
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Set state change callback
    pub fn on_state_change<F>(&mut self, callback: F)
    where
        F: Fn(ProtocolState, ProtocolState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Box::new(callback));
    }

    /// Action for `event` in the current state
    pub fn plan(&self, event: ProtocolEvent) -> Result<Action, ProtocolError> {
        plan(self.state, event).ok_or(ProtocolError::InvalidStateTransition { state: self.state, event })
    }

    /// Check if `event` may move the machine to `to`
    pub fn is_valid_transition(&self, event: ProtocolEvent, to: ProtocolState) -> bool {
        match plan(self.state, event) {
            Some(Action::QueryStatus) => {
                matches!(to, ProtocolState::Command | ProtocolState::Autosample)
            }
            Some(action) => action.target() == Some(to),
            None => false,
        }
    }

    /// Commit a transition
    pub fn transition(
        &mut self,
        event: ProtocolEvent,
        to: ProtocolState,
        reason: Option<&str>,
    ) -> Result<(), ProtocolError> {
        if !self.is_valid_transition(event, to) {
            return Err(ProtocolError::InvalidStateTransition { state: self.state, event });
        }

        self.history.push(StateTransition {
            from: self.state,
            to,
            event,
            timestamp: Local::now(),
            reason: reason.map(String::from),
        });
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        let old_state = self.state;
        self.previous_state = Some(old_state);
        self.state = to;

        if let Some(ref callback) = self.on_state_change {
            callback(old_state, to);
        }

        Ok(())
    }
}
