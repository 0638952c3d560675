//! Telephony media-stream serializer
//!
//! Twilio-style JSON events carrying base64 mu-law audio. Inbound `media`
//! events become audio frames and `stop` ends the call. Outbound audio and
//! playback-clear requests are tagged with the stream id.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use voice_bridge_core::{AudioFrame, SampleRate};

/// Decoded inbound message
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// Caller audio
    Audio(AudioFrame),
    /// The provider ended the stream
    Stop,
    /// Events with no pipeline meaning (`connected`, `mark`, `dtmf`, ...)
    Ignored,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    event: String,
    media: Option<InboundMedia>,
}

#[derive(Debug, Deserialize)]
struct InboundMedia {
    payload: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum OutboundMessage<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: OutboundMedia,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
    },
}

#[derive(Debug, Serialize)]
struct OutboundMedia {
    payload: String,
}

/// Serializer bound to one stream
#[derive(Debug, Clone)]
pub struct TwilioFrameSerializer {
    stream_sid: String,
    sample_rate: SampleRate,
}

impl TwilioFrameSerializer {
    pub fn new(stream_sid: impl Into<String>, sample_rate: SampleRate) -> Self {
        Self {
            stream_sid: stream_sid.into(),
            sample_rate,
        }
    }

    pub fn stream_sid(&self) -> &str {
        &self.stream_sid
    }

    /// Decode one inbound text message
    ///
    /// Malformed messages are logged and ignored; a single bad packet does
    /// not end the call.
    pub fn deserialize(&self, raw: &str, sequence: u64) -> InboundEvent {
        let message: InboundMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(stream_sid = %self.stream_sid, error = %e, "Ignoring malformed media message");
                return InboundEvent::Ignored;
            }
        };

        match (message.event.as_str(), message.media) {
            ("media", Some(media)) => match BASE64.decode(media.payload.as_bytes()) {
                Ok(bytes) if !bytes.is_empty() => {
                    InboundEvent::Audio(AudioFrame::from_mulaw(&bytes, self.sample_rate, sequence))
                }
                Ok(_) => InboundEvent::Ignored,
                Err(e) => {
                    tracing::warn!(stream_sid = %self.stream_sid, error = %e, "Ignoring undecodable media payload");
                    InboundEvent::Ignored
                }
            },
            ("stop", _) => InboundEvent::Stop,
            _ => InboundEvent::Ignored,
        }
    }

    /// Encode assistant audio as a `media` event
    pub fn serialize_audio(&self, frame: &AudioFrame) -> String {
        let message = OutboundMessage::Media {
            stream_sid: &self.stream_sid,
            media: OutboundMedia {
                payload: BASE64.encode(frame.to_mulaw()),
            },
        };
        // Plain string fields only; serialization cannot fail
        serde_json::to_string(&message).unwrap_or_default()
    }

    /// `clear` event asking the provider to drop buffered playback
    pub fn serialize_clear(&self) -> String {
        let message = OutboundMessage::Clear {
            stream_sid: &self.stream_sid,
        };
        serde_json::to_string(&message).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn serializer() -> TwilioFrameSerializer {
        TwilioFrameSerializer::new("MZ42", SampleRate::Hz8000)
    }

    #[test]
    fn test_inbound_media() {
        let payload = BASE64.encode([0xFFu8; 160]);
        let raw = format!(r#"{{"event":"media","streamSid":"MZ42","media":{{"track":"inbound","payload":"{}"}}}}"#, payload);

        match serializer().deserialize(&raw, 7) {
            InboundEvent::Audio(frame) => {
                assert_eq!(frame.samples.len(), 160);
                assert_eq!(frame.sequence, 7);
                assert_eq!(frame.sample_rate, SampleRate::Hz8000);
                // 0xFF is mu-law zero
                assert!(frame.is_likely_silence(-40.0));
            }
            other => panic!("expected audio, got {:?}", other),
        }
    }

    #[test]
    fn test_inbound_control_events() {
        let s = serializer();
        assert!(matches!(s.deserialize(r#"{"event":"stop","stop":{}}"#, 0), InboundEvent::Stop));
        assert!(matches!(s.deserialize(r#"{"event":"mark"}"#, 0), InboundEvent::Ignored));
        assert!(matches!(s.deserialize("not-json", 0), InboundEvent::Ignored));
        assert!(matches!(
            s.deserialize(r#"{"event":"media","media":{"payload":"%%%"}}"#, 0),
            InboundEvent::Ignored
        ));
    }

    #[test]
    fn test_outbound_media_and_clear() {
        let s = serializer();
        let frame = AudioFrame::new(vec![0.0; 160], SampleRate::Hz8000, 0);

        let media: Value = serde_json::from_str(&s.serialize_audio(&frame)).unwrap();
        assert_eq!(media["event"], "media");
        assert_eq!(media["streamSid"], "MZ42");
        let payload = BASE64.decode(media["media"]["payload"].as_str().unwrap()).unwrap();
        assert_eq!(payload.len(), 160);

        let clear: Value = serde_json::from_str(&s.serialize_clear()).unwrap();
        assert_eq!(clear["event"], "clear");
        assert_eq!(clear["streamSid"], "MZ42");
    }
}
