//! Websocket audio sink
//!
//! Serialized events go through a bounded channel to the connection's writer
//! task, which owns the socket's send half.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use voice_bridge_core::{AudioFrame, Error, Result};
use voice_bridge_pipeline::AudioSink;

use crate::serializer::TwilioFrameSerializer;

/// Outbound half of one caller connection
pub struct WebSocketSink {
    serializer: Arc<TwilioFrameSerializer>,
    outbound: mpsc::Sender<String>,
    closed: AtomicBool,
}

impl WebSocketSink {
    pub fn new(serializer: Arc<TwilioFrameSerializer>, outbound: mpsc::Sender<String>) -> Self {
        Self {
            serializer,
            outbound,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn send(&self, message: String) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Transport(format!(
                "connection for {} is closed",
                self.serializer.stream_sid()
            )));
        }
        self.outbound
            .send(message)
            .await
            .map_err(|_| Error::Transport("websocket writer has exited".to_string()))
    }
}

#[async_trait]
impl AudioSink for WebSocketSink {
    async fn send_audio(&self, frame: &AudioFrame) -> Result<()> {
        self.send(self.serializer.serialize_audio(frame)).await
    }

    async fn clear(&self) -> Result<()> {
        self.send(self.serializer.serialize_clear()).await
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(stream_sid = %self.serializer.stream_sid(), "Audio sink closed");
        }
        Ok(())
    }
}
