//! Semantic turn analysis
//!
//! Classifies whether an utterance is linguistically complete. The
//! coordinator treats a positive result as confirmation that a pause is a
//! real turn end; anything else waits for the fallback window.

use async_trait::async_trait;

use crate::PipelineError;

/// Semantic completeness classification
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompletenessClass {
    /// Definitely incomplete (mid-sentence)
    Incomplete,
    /// No strong signal either way
    PossiblyComplete,
    /// Definitely complete (can respond)
    Complete,
    /// Question detected
    Question,
    /// Short acknowledgement ("okay", "yes")
    Backchannel,
}

impl CompletenessClass {
    /// Whether this class confirms the end of a user turn
    pub fn ends_turn(&self) -> bool {
        matches!(
            self,
            CompletenessClass::Complete | CompletenessClass::Question | CompletenessClass::Backchannel
        )
    }
}

/// Result of one analysis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnAnalysis {
    pub class: CompletenessClass,
    pub confidence: f32,
}

impl TurnAnalysis {
    pub fn new(class: CompletenessClass, confidence: f32) -> Self {
        Self { class, confidence }
    }

    pub fn is_complete(&self) -> bool {
        self.class.ends_turn()
    }
}

/// Turn-completion analyzer capability
///
/// Implementations may be slow; callers bound them with a timeout.
#[async_trait]
pub trait TurnAnalyzer: Send + Sync + 'static {
    /// Analyze the user's accumulated utterance
    async fn analyze(&self, text: &str) -> Result<TurnAnalysis, PipelineError>;

    /// Analyzer name for logging
    fn name(&self) -> &'static str;
}

/// Rule-based analyzer
///
/// Looks at punctuation, question openers, acknowledgements and trailing
/// connectives. Speech-to-text output is expected to be punctuated.
#[derive(Debug, Default)]
pub struct SemanticTurnAnalyzer;

const QUESTION_OPENERS: &[&str] = &[
    "what", "how", "why", "when", "where", "who", "which", "can you", "could you", "would you",
    "do you", "are you", "is it", "is there",
];

const BACKCHANNELS: &[&str] = &[
    "hmm", "ok", "okay", "yes", "yeah", "yep", "no", "nope", "sure", "right", "uh huh", "got it",
    "thanks", "thank you",
];

const TRAILING_CONNECTIVES: &[&str] = &[
    "and", "but", "so", "that", "which", "when", "if", "because", "or", "the", "a", "an", "to",
    "um", "uh",
];

impl SemanticTurnAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Classify utterance completeness
    pub fn classify(&self, text: &str) -> TurnAnalysis {
        self.quick_classify(text)
            .unwrap_or(TurnAnalysis::new(CompletenessClass::PossiblyComplete, 0.5))
    }

    /// Rule-based classification for obvious cases
    fn quick_classify(&self, text: &str) -> Option<TurnAnalysis> {
        let trimmed = text.trim();

        if trimmed.is_empty() {
            return Some(TurnAnalysis::new(CompletenessClass::Incomplete, 1.0));
        }

        if trimmed.ends_with(',') || trimmed.ends_with("...") {
            return Some(TurnAnalysis::new(CompletenessClass::Incomplete, 0.8));
        }

        // Question detection
        if trimmed.ends_with('?') {
            return Some(TurnAnalysis::new(CompletenessClass::Question, 0.95));
        }

        let lower = trimmed
            .to_lowercase()
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .to_string();

        // Backchannel patterns
        for bc in BACKCHANNELS {
            if lower == *bc {
                return Some(TurnAnalysis::new(CompletenessClass::Backchannel, 0.9));
            }
        }

        // Incomplete sentence markers
        let last_word = lower.rsplit(' ').next().unwrap_or_default();
        if !trimmed.ends_with('.') && TRAILING_CONNECTIVES.contains(&last_word) {
            return Some(TurnAnalysis::new(CompletenessClass::Incomplete, 0.85));
        }

        for opener in QUESTION_OPENERS {
            if lower.starts_with(&format!("{} ", opener)) {
                return Some(TurnAnalysis::new(CompletenessClass::Question, 0.85));
            }
        }

        // Complete sentence markers
        if trimmed.ends_with('.') || trimmed.ends_with('!') {
            return Some(TurnAnalysis::new(CompletenessClass::Complete, 0.8));
        }

        None
    }
}

#[async_trait]
impl TurnAnalyzer for SemanticTurnAnalyzer {
    async fn analyze(&self, text: &str) -> Result<TurnAnalysis, PipelineError> {
        Ok(self.classify(text))
    }

    fn name(&self) -> &'static str {
        "semantic_rules"
    }
}

/// Analyzer that confirms every pause; used when semantic analysis is disabled
#[derive(Debug, Default)]
pub struct AlwaysComplete;

#[async_trait]
impl TurnAnalyzer for AlwaysComplete {
    async fn analyze(&self, _text: &str) -> Result<TurnAnalysis, PipelineError> {
        Ok(TurnAnalysis::new(CompletenessClass::Complete, 1.0))
    }

    fn name(&self) -> &'static str {
        "always_complete"
    }
}
