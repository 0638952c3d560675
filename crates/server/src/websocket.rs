//! Caller websocket
//!
//! Connection flow: handshake, session assembly, `ClientConnected`, media
//! loop, then `ClientDisconnected` when the socket closes, the provider sends
//! `stop`, or the pipeline fails.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{future, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::handshake::resolve_stream_id;
use crate::serializer::{InboundEvent, TwilioFrameSerializer};
use crate::session::{sample_rate, Session};
use crate::state::AppState;
use crate::transport::WebSocketSink;
use crate::ServerError;

/// Outbound events buffered per connection
const OUTBOUND_CAPACITY: usize = 256;
/// How long the writer may flush after the session closes
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let resolved = {
        // Text messages until the socket closes or errors
        let texts = (&mut receiver)
            .filter_map(|message| {
                future::ready(match message {
                    Ok(Message::Text(text)) => Some(Some(text)),
                    Ok(Message::Close(_)) | Err(_) => Some(None),
                    Ok(_) => None,
                })
            })
            .scan((), |_, text| future::ready(text));
        let mut texts = std::pin::pin!(texts);
        accept(&mut texts, &state).await
    };

    let stream_sid = match resolved {
        Ok(sid) => sid,
        Err(e) => {
            if matches!(e, ServerError::Handshake(_)) {
                crate::metrics::record_handshake_failure();
            }
            tracing::warn!(error = %e, "Rejecting call");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let input_rate = match sample_rate(state.settings.audio.input_sample_rate) {
        Ok(rate) => rate,
        Err(e) => {
            tracing::error!(error = %e, "Invalid audio configuration");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    let serializer = Arc::new(TwilioFrameSerializer::new(stream_sid.clone(), input_rate));
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    let sink = Arc::new(WebSocketSink::new(Arc::clone(&serializer), out_tx));

    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let session = match Session::new(stream_sid.clone(), &state.settings, &state.providers, sink)
        .and_then(|session| state.sessions.insert(Arc::clone(&session)).map(|_| session))
    {
        Ok(session) => session,
        Err(e) => {
            // Dropping the sink ends the writer, which closes the socket
            tracing::error!(stream_sid = %stream_sid, error = %e, "Failed to create session");
            return;
        }
    };
    crate::metrics::record_session_started();

    session.start();
    if let Err(e) = session.on_client_connected().await {
        tracing::warn!(stream_sid = %stream_sid, error = %e, "Failed to queue greeting");
    }

    media_loop(&session, &serializer, &mut receiver).await;

    session.on_client_disconnected().await;
    state.sessions.remove(&stream_sid);
    tracing::info!(
        stream_sid = %stream_sid,
        duration_ms = session.age().as_millis() as u64,
        transcript_entries = session.transcript().len(),
        "Call ended"
    );
    drop(session);

    // The writer exits once the pipeline's sink is dropped
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        abort.abort();
    }
}

/// Resolve the call's stream id, then check the session limit
async fn accept<S>(texts: &mut S, state: &AppState) -> Result<String, ServerError>
where
    S: Stream<Item = String> + Unpin,
{
    let stream_sid = resolve_stream_id(texts).await?;
    state.sessions.ensure_capacity()?;
    Ok(stream_sid)
}

async fn media_loop(
    session: &Session,
    serializer: &TwilioFrameSerializer,
    receiver: &mut futures::stream::SplitStream<WebSocket>,
) {
    let mut sequence: u64 = 0;
    loop {
        let message = tokio::select! {
            message = receiver.next() => message,
            outcome = session.finished() => {
                if outcome.is_err() {
                    tracing::warn!(stream_sid = %session.stream_sid(), "Ending call after pipeline failure");
                }
                return;
            }
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(stream_sid = %session.stream_sid(), error = %e, "Websocket receive failed");
                return;
            }
        };

        match serializer.deserialize(&text, sequence) {
            InboundEvent::Audio(frame) => {
                sequence += 1;
                if let Err(e) = session.push_audio(frame).await {
                    tracing::debug!(stream_sid = %session.stream_sid(), error = %e, "Dropping caller audio");
                    return;
                }
            }
            InboundEvent::Stop => return,
            InboundEvent::Ignored => {}
        }
    }
}
