//! Voice activity detection capability
//!
//! A detector turns a stream of audio frames into speech start/stop events.
//! The turn coordinator only sees those events, never the detector itself.

use std::time::Duration;
use voice_bridge_core::AudioFrame;

/// Speech boundary reported by a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Voiced audio persisted for the start window
    SpeechStarted,
    /// Silence persisted for the stop window
    SpeechStopped,
}

/// Voice activity detector capability
pub trait VoiceActivityDetector: Send + 'static {
    /// Feed one frame, returning a boundary event if one was crossed
    fn process_frame(&mut self, frame: &AudioFrame) -> Option<VadEvent>;

    /// Forget accumulated state
    fn reset(&mut self);

    /// Detector name for logging
    fn name(&self) -> &'static str;
}

/// Energy VAD configuration
#[derive(Debug, Clone)]
pub struct EnergyVadConfig {
    /// Frames at or above this level count as voiced (dBFS)
    pub threshold_db: f32,
    /// Voiced duration needed before reporting speech
    pub start: Duration,
    /// Silence duration needed before reporting a pause
    pub stop: Duration,
}

impl Default for EnergyVadConfig {
    fn default() -> Self {
        use voice_bridge_config::constants::turn::{VAD_START_SECS, VAD_STOP_SECS, VAD_THRESHOLD_DB};

        Self {
            threshold_db: VAD_THRESHOLD_DB,
            start: secs_to_duration(VAD_START_SECS),
            stop: secs_to_duration(VAD_STOP_SECS),
        }
    }
}

impl From<&voice_bridge_config::TurnConfig> for EnergyVadConfig {
    fn from(config: &voice_bridge_config::TurnConfig) -> Self {
        Self {
            threshold_db: config.vad_threshold_db,
            start: secs_to_duration(config.start_secs),
            stop: secs_to_duration(config.stop_secs),
        }
    }
}

/// Millisecond-rounded so 0.2s compares equal to ten 20ms frames
fn secs_to_duration(secs: f32) -> Duration {
    Duration::from_millis((secs.max(0.0) * 1000.0).round() as u64)
}

/// RMS-energy detector with start/stop hysteresis
///
/// Durations are accumulated from frame lengths, not wall time, so the
/// detector behaves the same under a paused clock.
pub struct EnergyVad {
    config: EnergyVadConfig,
    speaking: bool,
    voiced: Duration,
    silence: Duration,
}

impl EnergyVad {
    pub fn new(config: EnergyVadConfig) -> Self {
        Self {
            config,
            speaking: false,
            voiced: Duration::ZERO,
            silence: Duration::ZERO,
        }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(EnergyVadConfig::default())
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn process_frame(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        let voiced = !frame.is_likely_silence(self.config.threshold_db);

        if self.speaking {
            if voiced {
                self.silence = Duration::ZERO;
                return None;
            }
            self.silence += frame.duration;
            if self.silence >= self.config.stop {
                self.speaking = false;
                self.voiced = Duration::ZERO;
                self.silence = Duration::ZERO;
                return Some(VadEvent::SpeechStopped);
            }
            None
        } else {
            if !voiced {
                self.voiced = Duration::ZERO;
                return None;
            }
            self.voiced += frame.duration;
            if self.voiced >= self.config.start {
                self.speaking = true;
                self.silence = Duration::ZERO;
                return Some(VadEvent::SpeechStarted);
            }
            None
        }
    }

    fn reset(&mut self) {
        self.speaking = false;
        self.voiced = Duration::ZERO;
        self.silence = Duration::ZERO;
    }

    fn name(&self) -> &'static str {
        "energy_vad"
    }
}
