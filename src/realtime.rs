//! In-process fan-out of mailbox events to WebSocket clients.
//!
//! Each connected client owns an unbounded channel and a set of account ids
//! it cares about. Broadcasting is a linear scan over the clients; a client
//! whose channel has gone away is dropped on the spot. There is no replay:
//! a client that reconnects simply resubscribes.

use parking_lot::Mutex;
use rocket::State;
use rocket::futures::{SinkExt, StreamExt};
use rocket_ws::{Channel, Message, WebSocket};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Server to client notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    #[serde(rename_all = "camelCase")]
    NewMail {
        account_id: i64,
        count: usize,
        email_ids: Vec<i64>,
    },
    #[serde(rename_all = "camelCase")]
    SyncComplete {
        account_id: i64,
        inserted: usize,
        updated: usize,
    },
}

impl RealtimeEvent {
    pub fn account_id(&self) -> i64 {
        match self {
            RealtimeEvent::NewMail { account_id, .. }
            | RealtimeEvent::SyncComplete { account_id, .. } => *account_id,
        }
    }
}

/// Client to server message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Subscribe { account_ids: Vec<i64> },
}

struct Subscriber {
    accounts: HashSet<i64>,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
pub struct RealtimeHub {
    next_id: AtomicU64,
    clients: Mutex<HashMap<u64, Subscriber>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client with an empty subscription set.
    pub fn register(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.lock().insert(
            id,
            Subscriber {
                accounts: HashSet::new(),
                tx,
            },
        );
        log::debug!("realtime: client {} connected", id);
        (id, rx)
    }

    pub fn unregister(&self, client_id: u64) {
        if self.clients.lock().remove(&client_id).is_some() {
            log::debug!("realtime: client {} disconnected", client_id);
        }
    }

    /// Replace the account set a client listens to.
    pub fn subscribe(&self, client_id: u64, account_ids: impl IntoIterator<Item = i64>) {
        if let Some(client) = self.clients.lock().get_mut(&client_id) {
            client.accounts = account_ids.into_iter().collect();
        }
    }

    /// Apply a raw text frame from a client. Unknown or malformed frames are ignored.
    pub fn handle_client_message(&self, client_id: u64, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Subscribe { account_ids }) => {
                log::debug!("realtime: client {} subscribed to {:?}", client_id, account_ids);
                self.subscribe(client_id, account_ids);
            }
            Err(e) => log::debug!("realtime: ignoring frame from client {}: {}", client_id, e),
        }
    }

    /// Deliver to every client subscribed to the event's account.
    ///
    /// Returns how many clients the event was handed to.
    pub fn broadcast(&self, event: &RealtimeEvent) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("realtime: failed to encode event: {}", e);
                return 0;
            }
        };

        let account_id = event.account_id();
        let mut delivered = 0;
        self.clients.lock().retain(|_, client| {
            if !client.accounts.contains(&account_id) {
                return !client.tx.is_closed();
            }
            match client.tx.send(payload.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

/// Upgrade to a WebSocket bridged to the hub.
#[get("/ws")]
pub fn websocket(ws: WebSocket, hub: &State<Arc<RealtimeHub>>) -> Channel<'static> {
    let hub = Arc::clone(hub.inner());

    ws.channel(move |mut stream| {
        Box::pin(async move {
            let (client_id, mut outbound) = hub.register();

            loop {
                tokio::select! {
                    incoming = stream.next() => match incoming {
                        Some(Ok(Message::Text(text))) => hub.handle_client_message(client_id, &text),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::debug!("realtime: client {} read error: {}", client_id, e);
                            break;
                        }
                    },
                    Some(payload) = outbound.recv() => {
                        if stream.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                }
            }

            hub.unregister(client_id);
            Ok(())
        })
    })
}
