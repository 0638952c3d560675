//! Turn coordinator
//!
//! Decides who holds the floor. A cheap VAD pause moves the user into
//! `UserSilencePending`; the turn only ends once a semantic check confirms
//! it or the fallback window elapses. Each silence episode gets a new epoch,
//! so confirmations that arrive after the user resumed speaking are ignored.
//!
//! A system turn lasts from the moment a response is requested until its
//! audio has played out. Without interruptions, a user turn that ends inside
//! a system turn is held until the system turn completes.
//!
//! The coordinator is a pure state machine. It never spawns or sleeps; it
//! returns [`TurnAction`]s for its owning stage to carry out.

use std::time::Duration;

use voice_bridge_core::TurnCheckOutcome;

use super::vad::VadEvent;

/// Turn state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    /// User holds the floor (initial state)
    #[default]
    UserSpeaking,
    /// User paused, awaiting semantic confirmation or the fallback
    UserSilencePending,
    /// User turn is over, a response may start
    UserTurnEnded,
    /// Assistant audio is being emitted
    SystemSpeaking,
}

/// Why a user turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEndReason {
    /// Semantic analyzer confirmed completion
    Semantic,
    /// Fallback window elapsed without confirmation
    Timeout,
}

impl TurnEndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnEndReason::Semantic => "semantic",
            TurnEndReason::Timeout => "timeout",
        }
    }
}

/// Side effect requested by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    /// Schedule `TurnCheck { epoch, TimedOut }` after `after`
    ArmFallback { epoch: u64, after: Duration },
    /// Run the semantic analyzer on `text`; confirm `epoch` if complete
    Analyze { epoch: u64, text: String },
    /// Append a user entry and forward the consolidated utterance
    SealUserTurn { text: String, reason: TurnEndReason },
    /// Cancel the in-flight assistant response
    Interrupt,
}

/// Turn coordinator configuration
#[derive(Debug, Clone)]
pub struct TurnCoordinatorConfig {
    /// Fallback window for semantic confirmation
    pub semantic_timeout: Duration,
    /// Whether user speech cancels an in-flight response
    pub allow_interruptions: bool,
}

impl Default for TurnCoordinatorConfig {
    fn default() -> Self {
        Self {
            semantic_timeout: Duration::from_millis(
                voice_bridge_config::constants::turn::SEMANTIC_TIMEOUT_MS,
            ),
            allow_interruptions: true,
        }
    }
}

/// Turn coordinator state machine
#[derive(Debug)]
pub struct TurnCoordinator {
    config: TurnCoordinatorConfig,
    state: TurnState,
    /// Incremented on every new silence episode or resumption
    epoch: u64,
    /// Finalized, not yet sealed user text
    buffer: String,
    /// Turn ended but the seal waits for text or for the bot to stop
    seal_pending: bool,
    pending_reason: TurnEndReason,
    user_voiced: bool,
    bot_speaking: bool,
    /// A response was requested and has not finished playing
    response_pending: bool,
}

impl TurnCoordinator {
    pub fn new(config: TurnCoordinatorConfig) -> Self {
        Self {
            config,
            state: TurnState::UserSpeaking,
            epoch: 0,
            buffer: String::new(),
            seal_pending: false,
            pending_reason: TurnEndReason::Timeout,
            user_voiced: false,
            bot_speaking: false,
            response_pending: false,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Accumulated, unsealed user text
    pub fn pending_text(&self) -> &str {
        &self.buffer
    }

    fn in_system_turn(&self) -> bool {
        self.response_pending || self.bot_speaking
    }

    /// Handle a voice activity boundary
    pub fn on_vad(&mut self, event: VadEvent) -> Vec<TurnAction> {
        match event {
            VadEvent::SpeechStarted => self.on_speech_started(),
            VadEvent::SpeechStopped => self.on_speech_stopped(),
        }
    }

    fn on_speech_started(&mut self) -> Vec<TurnAction> {
        self.user_voiced = true;

        match self.state {
            TurnState::UserSpeaking => vec![],
            TurnState::UserSilencePending => {
                // False pause: invalidate outstanding checks
                self.epoch += 1;
                self.state = TurnState::UserSpeaking;
                vec![]
            }
            TurnState::UserTurnEnded | TurnState::SystemSpeaking => {
                // Held text stays buffered and joins the resumed turn
                self.epoch += 1;
                self.seal_pending = false;
                self.state = TurnState::UserSpeaking;
                self.barge_in()
            }
        }
    }

    /// Cancel the system turn if one is running and interruptions are allowed
    fn barge_in(&mut self) -> Vec<TurnAction> {
        if !self.config.allow_interruptions || !self.in_system_turn() {
            return vec![];
        }
        self.response_pending = false;
        vec![TurnAction::Interrupt]
    }

    fn on_speech_stopped(&mut self) -> Vec<TurnAction> {
        self.user_voiced = false;

        if self.state == TurnState::UserSpeaking {
            self.begin_silence()
        } else {
            vec![]
        }
    }

    fn begin_silence(&mut self) -> Vec<TurnAction> {
        self.epoch += 1;
        self.state = TurnState::UserSilencePending;

        let mut actions = vec![TurnAction::ArmFallback {
            epoch: self.epoch,
            after: self.config.semantic_timeout,
        }];
        if !self.buffer.is_empty() {
            actions.push(TurnAction::Analyze {
                epoch: self.epoch,
                text: self.buffer.clone(),
            });
        }
        actions
    }

    /// Handle speech-to-text output; partial results are ignored
    pub fn on_transcript(&mut self, text: &str, is_final: bool) -> Vec<TurnAction> {
        let text = text.trim();
        if !is_final || text.is_empty() {
            return vec![];
        }

        if !self.buffer.is_empty() {
            self.buffer.push(' ');
        }
        self.buffer.push_str(text);

        match self.state {
            TurnState::UserSilencePending => vec![TurnAction::Analyze {
                epoch: self.epoch,
                text: self.buffer.clone(),
            }],
            TurnState::UserTurnEnded if self.seal_pending => self.try_seal(self.pending_reason),
            // Text without any voice activity: treat the transcript itself as the pause
            TurnState::UserSpeaking if !self.user_voiced => self.begin_silence(),
            _ => vec![],
        }
    }

    /// Handle a semantic confirmation or fallback expiry
    pub fn on_turn_check(&mut self, epoch: u64, outcome: TurnCheckOutcome) -> Vec<TurnAction> {
        if epoch != self.epoch || self.state != TurnState::UserSilencePending {
            tracing::trace!(epoch, current = self.epoch, ?outcome, "Stale turn check ignored");
            return vec![];
        }

        let reason = match outcome {
            TurnCheckOutcome::Confirmed => TurnEndReason::Semantic,
            TurnCheckOutcome::TimedOut => {
                tracing::debug!(epoch, "Turn detection timed out, ending user turn");
                TurnEndReason::Timeout
            }
        };

        self.state = TurnState::UserTurnEnded;
        self.try_seal(reason)
    }

    fn try_seal(&mut self, reason: TurnEndReason) -> Vec<TurnAction> {
        // Without interruptions the user's turn waits for the system turn
        let held = self.in_system_turn() && !self.config.allow_interruptions;
        if self.buffer.is_empty() || held {
            self.seal_pending = true;
            self.pending_reason = reason;
            return vec![];
        }

        self.seal_pending = false;
        self.response_pending = true;
        vec![TurnAction::SealUserTurn {
            text: std::mem::take(&mut self.buffer),
            reason,
        }]
    }

    /// A response was requested without a user turn (e.g. the greeting)
    pub fn on_response_requested(&mut self) {
        self.response_pending = true;
    }

    /// Assistant audio started reaching the caller
    pub fn on_bot_started_speaking(&mut self) -> Vec<TurnAction> {
        self.bot_speaking = true;

        match self.state {
            // A held seal keeps the turn ended until the bot stops
            TurnState::UserTurnEnded if !self.seal_pending => {
                self.state = TurnState::SystemSpeaking
            }
            TurnState::UserSpeaking if !self.user_voiced => self.state = TurnState::SystemSpeaking,
            _ => {}
        }
        vec![]
    }

    /// Assistant audio finished or was cleared, or a response ended silently
    pub fn on_bot_stopped_speaking(&mut self) -> Vec<TurnAction> {
        self.bot_speaking = false;
        self.response_pending = false;

        match self.state {
            TurnState::SystemSpeaking => {
                self.state = TurnState::UserSpeaking;
                vec![]
            }
            TurnState::UserTurnEnded if self.seal_pending => self.try_seal(self.pending_reason),
            _ => vec![],
        }
    }
}
