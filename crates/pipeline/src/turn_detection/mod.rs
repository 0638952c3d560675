//! Turn detection
//!
//! Two capabilities feed one state machine:
//! - [`VoiceActivityDetector`]: fast speech start/stop events from audio energy
//! - [`TurnAnalyzer`]: slower judgement of whether the utterance is complete
//!
//! [`TurnCoordinator`] combines them and owns the [`TurnState`].

mod coordinator;
mod semantic;
mod vad;

pub use coordinator::{
    TurnAction, TurnCoordinator, TurnCoordinatorConfig, TurnEndReason, TurnState,
};
pub use semantic::{
    AlwaysComplete, CompletenessClass, SemanticTurnAnalyzer, TurnAnalysis, TurnAnalyzer,
};
pub use vad::{EnergyVad, EnergyVadConfig, VadEvent, VoiceActivityDetector};
