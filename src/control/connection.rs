//! Per-client connection loop.
//!
//! Each WebSocket gets one [`Observer`]. The loop multiplexes inbound frames
//! with the observer's event channel and writes both to the socket, so a
//! slow client only ever backs up its own buffer. On exit the client is
//! detached from every session.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::control::protocol::{ClientMessage, ServerMessage};
use crate::orchestrator::fanout::Observer;
use crate::orchestrator::registry::SessionRegistry;
use crate::Result;

type SocketSink = SplitSink<WebSocket, Message>;

/// Serve one client until it disconnects or `ct` fires.
pub async fn handle_socket(
    socket: WebSocket,
    registry: SessionRegistry,
    client_buffer: usize,
    ct: CancellationToken,
) {
    let (observer, mut events) = Observer::channel(client_buffer);
    let client = observer.id();
    let span = info_span!("client", %client);

    async move {
        info!("client connected");
        let (mut sink, mut stream) = socket.split();

        loop {
            tokio::select! {
                () = ct.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }

                frame = stream.next() => match frame {
                    None => break,
                    Some(Err(err)) => {
                        warn!(%err, "websocket receive failed");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        let replies = dispatch(&registry, &observer, text.as_str()).await;
                        if write_all(&mut sink, &replies).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("client sent close frame");
                        break;
                    }
                    Some(Ok(_)) => {}
                },

                Some(event) = events.recv() => {
                    let message = ServerMessage::from(event);
                    if write_all(&mut sink, std::slice::from_ref(&message)).await.is_err() {
                        break;
                    }
                }
            }
        }

        registry.disconnect(client).await;
        info!("client disconnected");
    }
    .instrument(span)
    .await;
}

/// Handle one text frame and return the direct replies for the requester.
///
/// Events for subscribed sessions (including `init` for a successful
/// `create`) arrive through the observer channel instead.
pub async fn dispatch(
    registry: &SessionRegistry,
    observer: &Observer,
    text: &str,
) -> Vec<ServerMessage> {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(err) => {
            debug!(%err, "malformed client message");
            return vec![ServerMessage::rejection(&err)];
        }
    };

    match message {
        ClientMessage::Create(req) => {
            match registry.create(req.into(), observer.clone()).await {
                Ok(_) => Vec::new(),
                Err(err) => {
                    info!(%err, "create rejected");
                    vec![ServerMessage::rejection(&err)]
                }
            }
        }
        ClientMessage::Subscribe(target) => {
            registry.subscribe(&target.identity, observer.clone()).await;
            Vec::new()
        }
        ClientMessage::Unsubscribe(target) => {
            registry.unsubscribe(&target.identity, observer.id()).await;
            Vec::new()
        }
        ClientMessage::Send(req) => {
            registry.deliver_input(&req.identity, req.message).await;
            Vec::new()
        }
        ClientMessage::Log(target) => match registry.read_log(&target.identity).await {
            Ok(lines) => lines
                .into_iter()
                .map(|message| ServerMessage::Console {
                    identity: target.identity.clone(),
                    message,
                })
                .collect(),
            Err(err) => {
                debug!(%err, identity = target.identity.as_str(), "log read failed");
                vec![ServerMessage::rejection(&err)]
            }
        },
        ClientMessage::List {} => vec![ServerMessage::Sessions {
            sessions: registry.list().await,
        }],
    }
}

async fn write_all(sink: &mut SocketSink, messages: &[ServerMessage]) -> Result<()> {
    for message in messages {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(err) => {
                warn!(%err, "failed to serialize server message");
                continue;
            }
        };
        sink.send(Message::Text(json.into())).await.map_err(|err| {
            debug!(%err, "websocket send failed");
            crate::AppError::Io(format!("websocket send failed: {err}"))
        })?;
    }
    Ok(())
}
