//! Speech-to-text providers

mod http;

pub use http::{HttpStt, HttpSttConfig};
