//! Text-to-speech providers

mod http;

pub use http::{HttpTts, HttpTtsConfig};
