use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::dispatch::CommandRegistry;
use crate::error::Result;
use crate::events::{Event, EventBus};

fn new_client_id(seq: u64) -> String {
    let rand_suffix: u32 = rand::thread_rng().gen();
    format!("client-{seq}-{rand_suffix:x}")
}

struct ClientHandle {
    sender: mpsc::UnboundedSender<Message>,
}

/// Wire transport: plain `ws://` or `wss://` over the connections this
/// listener accepts, dispatching frames through a `CommandRegistry` and
/// broadcasting side-channel events to every open client.
pub struct DispatchServer {
    registry: CommandRegistry,
    events: EventBus,
    clients: Mutex<HashMap<String, ClientHandle>>,
    next_seq: AtomicU64,
}

impl DispatchServer {
    pub fn new(registry: CommandRegistry, events: EventBus) -> Arc<Self> {
        Arc::new(Self { registry, events, clients: Mutex::new(HashMap::new()), next_seq: AtomicU64::new(1) })
    }

    /// Binds `bind_addr:port` and serves either plain `ws://` (when
    /// `tls_acceptor` is `None`) or `wss://` exclusively (when set) — the
    /// listener never speaks both on one port, so a TLS-enabled dispatcher
    /// can't be reached over a plaintext connection.
    pub async fn serve(self: &Arc<Self>, bind_addr: &str, port: u16, tls_acceptor: Option<TlsAcceptor>) -> Result<()> {
        let listener = TcpListener::bind((bind_addr, port)).await?;
        info!(bind_addr, port, tls = tls_acceptor.is_some(), "dispatch server listening");
        loop {
            let (stream, _) = listener.accept().await?;
            let server = Arc::clone(self);
            match tls_acceptor.clone() {
                Some(acceptor) => {
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                if let Err(e) = server.handle_connection(tls_stream).await {
                                    warn!(error = %e, "connection terminated with error");
                                }
                            }
                            Err(e) => warn!(error = %e, "tls handshake failed"),
                        }
                    });
                }
                None => {
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream).await {
                            warn!(error = %e, "connection terminated with error");
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection<S>(self: &Arc<Self>, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|_| crate::error::Error::TransportClosed)?;
        let (mut write, mut read) = ws.split();

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let client_id = new_client_id(seq);

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.clients.lock().await.insert(client_id.clone(), ClientHandle { sender: tx.clone() });

        let status = serde_json::json!({ "type": "status", "message": "connected", "clientId": client_id });
        let _ = tx.send(Message::Text(status.to_string()));

        let mut event_rx = self.events.subscribe();
        let forward_client_id = client_id.clone();
        let forward_tx = tx.clone();
        let forward_task = tokio::spawn(async move {
            while let Ok(event) = event_rx.recv().await {
                if let Ok(json) = serde_json::to_string(&event) {
                    if forward_tx.send(Message::Text(json)).is_err() {
                        break;
                    }
                }
            }
            let _ = forward_client_id;
        });

        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let response = self.registry.dispatch(&text).await;
                    if let Ok(json) = serde_json::to_string(&response) {
                        let _ = tx.send(Message::Text(json));
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }

        self.clients.lock().await.remove(&client_id);
        forward_task.abort();
        write_task.abort();
        Ok(())
    }

    /// Reaches every open client; a bus with no connected clients yet is
    /// not an error.
    pub fn broadcast(&self, event: Event) -> usize {
        self.events.publish(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_follow_the_wire_format() {
        let id = new_client_id(1);
        assert!(id.starts_with("client-1-"));
    }
}
