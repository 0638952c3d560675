//! Stream identifier recovery from the opening websocket messages
//!
//! Telephony providers may send a `connected` event before the `start`
//! event, so both of the first two messages are inspected, in arrival order.
//! A third message is never read.

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use voice_bridge_core::HandshakeError;

/// Number of messages read before giving up
pub const HANDSHAKE_MESSAGES: usize = 2;

/// Decode a message as a JSON object
///
/// Anything that is not a JSON object becomes an empty object so a single
/// malformed message cannot abort the handshake.
pub fn decode_lenient(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) | Err(_) => Value::Object(Map::new()),
    }
}

/// Non-empty `start.stream_sid` of a decoded message
pub fn find_stream_sid(message: &Value) -> Option<String> {
    message
        .get("start")?
        .get("stream_sid")?
        .as_str()
        .filter(|sid| !sid.is_empty())
        .map(str::to_string)
}

/// Resolve the stream identifier from two raw messages
pub fn resolve_from_messages(first: &str, second: &str) -> Result<String, HandshakeError> {
    tracing::trace!(message = %first, "First handshake message");
    tracing::trace!(message = %second, "Second handshake message");

    [first, second]
        .iter()
        .find_map(|raw| find_stream_sid(&decode_lenient(raw)))
        .ok_or_else(|| HandshakeError::MissingStreamId {
            first: first.to_string(),
            second: second.to_string(),
        })
}

/// Read exactly two messages from `messages` and resolve the stream id
pub async fn resolve_stream_id<S>(messages: &mut S) -> Result<String, HandshakeError>
where
    S: Stream<Item = String> + Unpin,
{
    let mut received = Vec::with_capacity(HANDSHAKE_MESSAGES);
    while received.len() < HANDSHAKE_MESSAGES {
        match messages.next().await {
            Some(message) => received.push(message),
            None => {
                return Err(HandshakeError::ConnectionClosed {
                    received: received.len(),
                })
            }
        }
    }
    resolve_from_messages(&received[0], &received[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_decode_lenient() {
        assert_eq!(decode_lenient("not-json"), Value::Object(Map::new()));
        assert_eq!(decode_lenient("[1, 2]"), Value::Object(Map::new()));
        assert_eq!(decode_lenient("\"start\""), Value::Object(Map::new()));
        assert_eq!(decode_lenient(r#"{"event":"connected"}"#)["event"], "connected");
    }

    #[test]
    fn test_find_stream_sid() {
        let message = decode_lenient(r#"{"event":"start","start":{"stream_sid":"MZ1","call_sid":"CA1"}}"#);
        assert_eq!(find_stream_sid(&message).as_deref(), Some("MZ1"));

        assert!(find_stream_sid(&decode_lenient(r#"{"start":{"stream_sid":""}}"#)).is_none());
        assert!(find_stream_sid(&decode_lenient(r#"{"start":{"stream_sid":42}}"#)).is_none());
        assert!(find_stream_sid(&decode_lenient(r#"{"stream_sid":"MZ1"}"#)).is_none());
    }

    #[test]
    fn test_identifier_in_second_message() {
        let sid = resolve_from_messages(
            r#"{"event":"connected"}"#,
            r#"{"start":{"stream_sid":"CA123"}}"#,
        )
        .unwrap();
        assert_eq!(sid, "CA123");
    }

    #[test]
    fn test_invalid_json_degrades_to_empty() {
        let sid = resolve_from_messages("not-json", r#"{"start":{"stream_sid":"CA999"}}"#).unwrap();
        assert_eq!(sid, "CA999");

        let sid = resolve_from_messages(r#"{"start":{"stream_sid":"CA7"}}"#, "{oops").unwrap();
        assert_eq!(sid, "CA7");
    }

    #[test]
    fn test_first_message_wins() {
        let sid = resolve_from_messages(
            r#"{"start":{"stream_sid":"first"}}"#,
            r#"{"start":{"stream_sid":"second"}}"#,
        )
        .unwrap();
        assert_eq!(sid, "first");
    }

    #[test]
    fn test_missing_identifier_names_both_messages() {
        let err = resolve_from_messages("{}", "{}").unwrap_err();
        assert_eq!(
            err,
            HandshakeError::MissingStreamId {
                first: "{}".into(),
                second: "{}".into(),
            }
        );

        let err = resolve_from_messages("garbage", r#"{"event":"media"}"#).unwrap_err();
        assert!(err.to_string().contains("garbage"));
    }

    #[tokio::test]
    async fn test_stream_reads_exactly_two() {
        let mut messages = stream::iter(vec![
            r#"{"event":"connected"}"#.to_string(),
            "{}".to_string(),
            r#"{"start":{"stream_sid":"late"}}"#.to_string(),
        ]);

        let err = resolve_stream_id(&mut messages).await.unwrap_err();
        assert!(matches!(err, HandshakeError::MissingStreamId { .. }));

        // The third message is still unread
        assert_eq!(
            messages.next().await.as_deref(),
            Some(r#"{"start":{"stream_sid":"late"}}"#)
        );
    }

    #[tokio::test]
    async fn test_stream_closed_early() {
        let mut messages = stream::iter(vec![r#"{"event":"connected"}"#.to_string()]);
        let err = resolve_stream_id(&mut messages).await.unwrap_err();
        assert_eq!(err, HandshakeError::ConnectionClosed { received: 1 });
    }
}
