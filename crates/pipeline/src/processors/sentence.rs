//! Sentence splitting for streaming LLM output
//!
//! Buffers generated fragments and releases complete sentences so synthesis
//! can start before the whole response is known.

/// Sentence splitter configuration
#[derive(Debug, Clone)]
pub struct SentenceSplitterConfig {
    /// Characters after which the first sentence is released at a word boundary
    pub min_chars_first_sentence: usize,
    /// Maximum characters to buffer before forcing emission
    pub max_buffer_chars: usize,
}

impl Default for SentenceSplitterConfig {
    fn default() -> Self {
        Self {
            min_chars_first_sentence: 80,
            max_buffer_chars: 300,
        }
    }
}

const TERMINATORS: &[char] = &['.', '!', '?', ';'];
const CLOSERS: &[char] = &['"', '\'', ')', ']', '\u{201D}', '\u{2019}'];

/// Streaming sentence splitter
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    config: SentenceSplitterConfig,
    buffer: String,
    first_emitted: bool,
}

impl SentenceSplitter {
    pub fn new(config: SentenceSplitterConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            first_emitted: false,
        }
    }

    /// Add a fragment; returns sentences completed by it
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        let mut sentences = self.extract_sentences();

        if sentences.is_empty() && self.should_emit_early() {
            // Break at the last word boundary
            if let Some(pos) = self.buffer.rfind(char::is_whitespace) {
                let partial = self.buffer[..pos].trim().to_string();
                self.buffer = self.buffer[pos..].to_string();
                if !partial.is_empty() {
                    sentences.push(partial);
                }
            }
        }

        if !sentences.is_empty() {
            self.first_emitted = true;
        }
        sentences
    }

    /// Release whatever is buffered
    pub fn flush(&mut self) -> Option<String> {
        let text = self.buffer.trim().to_string();
        self.reset();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.first_emitted = false;
    }

    fn should_emit_early(&self) -> bool {
        let limit = if self.first_emitted {
            self.config.max_buffer_chars
        } else {
            self.config.min_chars_first_sentence
        };
        self.buffer.len() >= limit
    }

    /// A terminator only ends a sentence once whitespace follows it, so
    /// "3.5" and a trailing "." still waiting for more text stay buffered.
    fn extract_sentences(&mut self) -> Vec<String> {
        let mut sentences = Vec::new();
        let chars: Vec<(usize, char)> = self.buffer.char_indices().collect();
        let mut start = 0;
        let mut i = 0;

        while i < chars.len() {
            if TERMINATORS.contains(&chars[i].1) {
                let mut end = i + 1;
                while end < chars.len() && CLOSERS.contains(&chars[end].1) {
                    end += 1;
                }
                if end < chars.len() && chars[end].1.is_whitespace() {
                    let byte_end = chars[end].0;
                    let sentence = self.buffer[start..byte_end].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence.to_string());
                    }
                    start = byte_end;
                    i = end;
                    continue;
                }
            }
            i += 1;
        }

        self.buffer = self.buffer[start..].to_string();
        sentences
    }
}
