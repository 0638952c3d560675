//! Speech-to-text stage
//!
//! Tees caller audio into a provider stream and forwards it unchanged for
//! voice activity detection downstream. Transcripts are pushed from a reader
//! task as the provider produces them.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use voice_bridge_core::{
    AudioFrame, ControlSignal, Frame, FrameProcessor, ProcessorContext, Result, SpeechToText,
};

const AUDIO_BUFFER_FRAMES: usize = 512;

struct SttStream {
    audio_tx: Option<mpsc::Sender<AudioFrame>>,
    reader: Option<JoinHandle<()>>,
}

/// Speech-to-text stage
pub struct SttProcessor {
    stt: Arc<dyn SpeechToText>,
    stream: Mutex<SttStream>,
}

impl SttProcessor {
    pub fn new(stt: Arc<dyn SpeechToText>) -> Self {
        Self {
            stt,
            stream: Mutex::new(SttStream {
                audio_tx: None,
                reader: None,
            }),
        }
    }
}

#[async_trait]
impl FrameProcessor for SttProcessor {
    async fn on_start(&self, ctx: &ProcessorContext) -> Result<()> {
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_BUFFER_FRAMES);
        let stt = Arc::clone(&self.stt);
        let ctx = ctx.clone();

        let reader = tokio::spawn(async move {
            let mut results = stt.transcribe_stream(Box::pin(ReceiverStream::new(audio_rx)));
            while let Some(result) = results.next().await {
                match result {
                    Ok(transcript) if transcript.text.trim().is_empty() => {}
                    Ok(transcript) => {
                        tracing::debug!(
                            session_id = %ctx.session_id,
                            is_final = transcript.is_final,
                            confidence = transcript.confidence,
                            "Transcript received"
                        );
                        let frame = Frame::TranscribedText {
                            text: transcript.text,
                            is_final: transcript.is_final,
                        };
                        if ctx.push(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if !ctx.is_cancelled() {
                            ctx.report_error(e);
                        }
                        break;
                    }
                }
            }
        });

        tracing::debug!(model = self.stt.model_name(), "STT stream opened");
        let mut stream = self.stream.lock();
        stream.audio_tx = Some(audio_tx);
        stream.reader = Some(reader);
        Ok(())
    }

    async fn process(&self, frame: Frame, ctx: &ProcessorContext) -> Result<()> {
        match frame {
            Frame::AudioChunk(audio) => {
                let audio_tx = self.stream.lock().audio_tx.clone();
                if let Some(tx) = audio_tx {
                    if tx.send(audio.clone()).await.is_err() {
                        tracing::warn!(session_id = %ctx.session_id, "STT stream closed, dropping audio");
                    }
                }
                ctx.push(Frame::AudioChunk(audio)).await
            }
            Frame::Control(ControlSignal::EndOfSession) => {
                // Close the audio stream and let the provider flush its last result
                let reader = {
                    let mut stream = self.stream.lock();
                    stream.audio_tx = None;
                    stream.reader.take()
                };
                if let Some(reader) = reader {
                    let _ = reader.await;
                }
                Ok(())
            }
            other => ctx.push(other).await,
        }
    }

    fn name(&self) -> &'static str {
        "stt"
    }

    async fn on_stop(&self, _ctx: &ProcessorContext) -> Result<()> {
        let mut stream = self.stream.lock();
        stream.audio_tx = None;
        if let Some(reader) = stream.reader.take() {
            reader.abort();
        }
        Ok(())
    }
}
