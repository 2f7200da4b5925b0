//! WebSocket transport
//!
//! Translates protocol JSON frames into broker operations:
//! - accept TCP/WebSocket connections
//! - require a `register` frame naming the service before anything else
//! - map subscribe, unsubscribe and publish onto the delivery engine
//! - route `ack`/`nack` answers back to the delivery waiting on them
//!
//! When a socket goes away its registration is dropped, and deliveries it
//! never answered fail as closed so the engine can retry them elsewhere.

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Delivery, DeliveryEngine};
use crate::client::ServiceRegistry;
use crate::client::connection::send_frame;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::{BrokerError, DeliveryError};

/// Accepts connections on `listener` until it fails.
pub async fn start_websocket_server(
    listener: TcpListener,
    engine: DeliveryEngine,
    registry: ServiceRegistry,
) {
    match listener.local_addr() {
        Ok(addr) => info!("WebSocket server listening on ws://{addr}"),
        Err(e) => warn!(error = %e, "cannot read listener address"),
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "accept failed, server stopping");
                return;
            }
        };
        debug!(%peer, "connection accepted");
        spawn(handle_connection(stream, engine.clone(), registry.clone()));
    }
}

/// The service a socket registered as, once it has.
struct Registration {
    service: String,
    connection_id: String,
}

async fn handle_connection(stream: TcpStream, engine: DeliveryEngine, registry: ServiceRegistry) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake error");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                debug!(error = %e, "send loop failed");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut registration: Option<Registration> = None;

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(ClientMessage::Register { service }) => {
                if let Err(e) = BrokerError::require_name("service", &service) {
                    reply_error(&tx, &e.to_string());
                } else if let Some(current) = &registration {
                    reply_error(&tx, &format!("already registered as {}", current.service));
                } else {
                    let connection_id = registry.register(&service, tx.clone());
                    send_frame(&tx, &ServerMessage::Registered {
                        service: service.clone(),
                    });
                    registration = Some(Registration {
                        service,
                        connection_id,
                    });
                }
            }
            Ok(_) if registration.is_none() => {
                warn!("frame received before register");
                reply_error(&tx, "must register first");
            }
            Ok(frame) => {
                if let Some(current) = &registration {
                    handle_frame(frame, &current.service, &engine, &registry, &tx).await;
                }
            }
            Err(err) => {
                warn!(
                    error = %err,
                    frame = %text.chars().take(100).collect::<String>(),
                    "invalid client message"
                );
                reply_error(&tx, &format!("invalid message: {err}"));
            }
        }
    }

    match registration {
        Some(current) => {
            registry.unregister(&current.service, &current.connection_id);
            info!(service = %current.service, "service disconnected");
        }
        None => debug!("unregistered connection closed"),
    }
}

async fn handle_frame(
    frame: ClientMessage,
    service: &str,
    engine: &DeliveryEngine,
    registry: &ServiceRegistry,
    tx: &UnboundedSender<WsMessage>,
) {
    match frame {
        ClientMessage::Register { .. } => {}
        ClientMessage::Subscribe { channel } => match engine.subscribe(&channel, service).await {
            Ok(_) => {
                send_frame(tx, &ServerMessage::Subscribed { channel });
            }
            Err(e) => reply_error(tx, &e.to_string()),
        },
        ClientMessage::Unsubscribe { channel } => {
            match engine.unsubscribe(&channel, service).await {
                Ok(_) => {
                    send_frame(tx, &ServerMessage::Unsubscribed { channel });
                }
                Err(e) => reply_error(tx, &e.to_string()),
            }
        }
        ClientMessage::Publish {
            channel,
            payload,
            ttl,
            request_id,
        } => match engine.enqueue(&channel, payload, ttl).await {
            Ok(accepted) => {
                debug!(service, channel = %channel, accepted, "publish");
                send_frame(tx, &ServerMessage::Published {
                    request_id,
                    accepted,
                });
            }
            Err(e) => {
                error!(service, channel = %channel, error = %e, "publish failed");
                reply_error(tx, &e.to_string());
            }
        },
        ClientMessage::Ack {
            delivery_id,
            remove,
        } => {
            registry.resolve(service, &delivery_id, Ok(Delivery::from_ack(remove)));
        }
        ClientMessage::Nack {
            delivery_id,
            reason,
        } => {
            registry.resolve(service, &delivery_id, Err(DeliveryError::Rejected(reason)));
        }
    }
}

fn reply_error(tx: &UnboundedSender<WsMessage>, message: &str) {
    send_frame(tx, &ServerMessage::Error {
        message: message.to_string(),
    });
}
