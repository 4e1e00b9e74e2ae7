//! Pooled, multiplexed WebSocket transport.
//!
//! Each slot holds one connection to `/connect`. The server's first frame on a
//! connection is its identifier. Outgoing requests get a composite key
//! (`timestamp.connection.sequence.key`) so replies arriving in any order,
//! on any slot, resolve the right pending call. The caller's key is restored
//! before the result reaches the caller.

use crate::config::ClientConfig;
use crate::proto::{Request, RpcResult};
use crate::{lock_unpoisoned, LerpcError, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// A call waiting for its reply, tagged with the connection it was sent on.
struct PendingCall {
    reply: oneshot::Sender<RpcResult>,
    created: Instant,
    slot: usize,
    generation: u64,
}

/// Pending calls keyed by composite id, shared by every slot.
#[derive(Default)]
struct PendingTable {
    calls: Mutex<HashMap<String, PendingCall>>,
}

impl PendingTable {
    fn register(&self, id: String, reply: oneshot::Sender<RpcResult>, slot: usize, generation: u64) {
        lock_unpoisoned(&self.calls).insert(
            id,
            PendingCall {
                reply,
                created: Instant::now(),
                slot,
                generation,
            },
        );
    }

    /// Drop every call sent on `slot` while it ran `generation`. Their reply
    /// senders go with them, so waiters wake with `ReplyDropped`.
    fn abandon_connection(&self, slot: usize, generation: u64) -> usize {
        let mut calls = lock_unpoisoned(&self.calls);
        let before = calls.len();
        calls.retain(|_, pending| pending.slot != slot || pending.generation != generation);
        before - calls.len()
    }

    fn remove(&self, id: &str) -> bool {
        lock_unpoisoned(&self.calls).remove(id).is_some()
    }

    /// Hand `result` to its pending call and sweep calls older than `horizon`.
    fn complete(&self, id: &str, result: RpcResult, horizon: std::time::Duration) -> bool {
        let call = {
            let mut calls = lock_unpoisoned(&self.calls);
            let call = calls.remove(id);
            let before = calls.len();
            calls.retain(|_, pending| pending.created.elapsed() < horizon);
            if calls.len() < before {
                debug!("Swept {} stale pending calls", before - calls.len());
            }
            call
        };

        match call {
            Some(call) => {
                // The caller may have timed out and gone away.
                let _ = call.reply.send(result);
                true
            }
            None => false,
        }
    }

    fn clear(&self) {
        lock_unpoisoned(&self.calls).clear();
    }

    fn len(&self) -> usize {
        lock_unpoisoned(&self.calls).len()
    }
}

#[derive(Default)]
struct SlotState {
    sink: Option<WsSink>,
    connection_id: String,
    sequence: u64,
    reader: Option<JoinHandle<()>>,
}

/// One pooled connection.
struct Slot {
    index: usize,
    /// Bumped on every (re)connect so a stale reader cannot mark a newer
    /// connection dead.
    generation: AtomicU64,
    connected: AtomicBool,
    redialing: AtomicBool,
    state: tokio::sync::Mutex<SlotState>,
}

impl Slot {
    fn new(index: usize) -> Self {
        Self {
            index,
            generation: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            redialing: AtomicBool::new(false),
            state: tokio::sync::Mutex::new(SlotState::default()),
        }
    }

    async fn mark_disconnected(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        state.sink = None;
        self.connected.store(false, Ordering::SeqCst);
        warn!(
            "WebSocket slot {} ({}) disconnected",
            self.index, state.connection_id
        );
    }
}

struct PoolShared {
    config: ClientConfig,
    url: String,
    slots: Vec<Arc<Slot>>,
    pending: PendingTable,
}

/// Pool of duplex connections with out-of-order reply correlation.
pub struct WsPool {
    shared: Arc<PoolShared>,
}

impl WsPool {
    /// Pool with `config.pool_size` slots, all disconnected until
    /// [`start`](Self::start).
    pub fn new(config: &ClientConfig) -> Self {
        let slots = (0..config.pool_size.max(1))
            .map(|index| Arc::new(Slot::new(index)))
            .collect();
        Self {
            shared: Arc::new(PoolShared {
                config: config.clone(),
                url: config.connect_url(),
                slots,
                pending: PendingTable::default(),
            }),
        }
    }

    /// Dial every slot. Fails on the first slot that cannot connect.
    pub async fn start(&self) -> Result<()> {
        for slot in &self.shared.slots {
            PoolShared::connect(&self.shared, slot).await?;
        }
        info!(
            "Connected {} WebSocket slot(s) to {}",
            self.shared.slots.len(),
            self.shared.url
        );
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.shared.slots.len()
    }

    /// Whether any slot currently holds a live connection.
    pub fn is_connected(&self) -> bool {
        self.shared
            .slots
            .iter()
            .any(|slot| slot.connected.load(Ordering::SeqCst))
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    /// Send `request` on a random slot and wait for its reply.
    ///
    /// A dead slot or a failed write fails the call immediately and starts a
    /// background redial of that slot. The call itself is not retried here.
    pub async fn execute(&self, mut request: Request) -> Result<RpcResult> {
        let shared = &self.shared;
        let index = if shared.slots.len() == 1 {
            0
        } else {
            rand::rng().random_range(0..shared.slots.len())
        };
        let slot = &shared.slots[index];
        let caller_key = request.key.take();
        let (reply_tx, reply_rx) = oneshot::channel();

        let id = {
            let mut guard = slot.state.lock().await;
            let state = &mut *guard;
            let Some(sink) = state.sink.as_mut() else {
                drop(guard);
                PoolShared::spawn_redial(shared, slot);
                return Err(LerpcError::NotConnected { slot: index });
            };

            state.sequence += 1;
            let id = composite_id(
                &state.connection_id,
                state.sequence,
                caller_key.as_deref(),
            );
            request.key = Some(id.clone());
            let payload = serde_json::to_string(&request)?;

            let generation = slot.generation.load(Ordering::SeqCst);
            shared.pending.register(id.clone(), reply_tx, index, generation);
            if let Err(e) = sink.send(Message::Text(payload)).await {
                shared.pending.remove(&id);
                state.sink = None;
                slot.connected.store(false, Ordering::SeqCst);
                drop(guard);
                warn!("Write on WebSocket slot {} failed: {}", index, e);
                PoolShared::spawn_redial(shared, slot);
                return Err(e.into());
            }
            id
        };

        match tokio::time::timeout(shared.config.reply_timeout, reply_rx).await {
            Ok(Ok(result)) => Ok(result.with_key(caller_key)),
            Ok(Err(_)) => Err(LerpcError::ReplyDropped { id }),
            Err(_) => {
                shared.pending.remove(&id);
                Err(LerpcError::Timeout(shared.config.reply_timeout))
            }
        }
    }

    /// Close every connection and drop all pending calls.
    pub async fn close(&self) {
        for slot in &self.shared.slots {
            let mut state = slot.state.lock().await;
            slot.generation.fetch_add(1, Ordering::SeqCst);
            slot.connected.store(false, Ordering::SeqCst);
            if let Some(reader) = state.reader.take() {
                reader.abort();
            }
            if let Some(mut sink) = state.sink.take() {
                if let Err(e) = sink.close().await {
                    debug!("Closing WebSocket slot {}: {}", slot.index, e);
                }
            }
        }
        self.shared.pending.clear();
    }
}

impl std::fmt::Debug for WsPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsPool")
            .field("url", &self.shared.url)
            .field("slots", &self.shared.slots.len())
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl Drop for WsPool {
    fn drop(&mut self) {
        for slot in &self.shared.slots {
            if let Ok(mut state) = slot.state.try_lock() {
                if let Some(reader) = state.reader.take() {
                    reader.abort();
                }
            }
        }
    }
}

impl PoolShared {
    async fn dial(&self) -> Result<(String, WsSink, WsSource)> {
        let connector = if self.config.secure && self.config.accept_invalid_certs {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|e| LerpcError::WebSocket {
                    message: format!("Failed to build TLS connector: {}", e),
                })?;
            Some(Connector::NativeTls(tls))
        } else {
            None
        };

        let (stream, _) = tokio::time::timeout(
            self.config.request_timeout,
            tokio_tungstenite::connect_async_tls_with_config(
                self.url.as_str(),
                None,
                false,
                connector,
            ),
        )
        .await
        .map_err(|_| LerpcError::Timeout(self.config.request_timeout))??;

        let (sink, mut source) = stream.split();

        // The server announces the connection id before anything else.
        let first = tokio::time::timeout(self.config.request_timeout, source.next())
            .await
            .map_err(|_| LerpcError::Timeout(self.config.request_timeout))?;
        let connection_id = match first {
            Some(Ok(Message::Text(id))) => id.to_string(),
            Some(Ok(other)) => {
                return Err(LerpcError::Protocol {
                    message: format!("Expected connection id frame, got {:?}", other),
                })
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(LerpcError::WebSocket {
                    message: "connection closed before id frame".to_string(),
                })
            }
        };

        Ok((connection_id, sink, source))
    }

    async fn connect(shared: &Arc<Self>, slot: &Arc<Slot>) -> Result<()> {
        let (connection_id, sink, source) = shared.dial().await?;

        let mut state = slot.state.lock().await;
        let generation = slot.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(old) = state.reader.take() {
            old.abort();
        }
        debug!(
            "WebSocket slot {} connected as {}",
            slot.index, connection_id
        );
        state.sink = Some(sink);
        state.connection_id = connection_id;
        state.sequence = 0;
        state.reader = Some(tokio::spawn(Self::read_loop(
            Arc::clone(shared),
            Arc::clone(slot),
            generation,
            source,
        )));
        slot.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn spawn_redial(shared: &Arc<Self>, slot: &Arc<Slot>) {
        if slot.redialing.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(shared);
        let slot = Arc::clone(slot);
        tokio::spawn(async move {
            match Self::connect(&shared, &slot).await {
                Ok(()) => info!("WebSocket slot {} reconnected", slot.index),
                Err(e) => warn!("Reconnect of WebSocket slot {} failed: {}", slot.index, e),
            }
            slot.redialing.store(false, Ordering::SeqCst);
        });
    }

    async fn read_loop(shared: Arc<Self>, slot: Arc<Slot>, generation: u64, mut source: WsSource) {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => shared.deliver(text.as_bytes()),
                Ok(Message::Binary(data)) => shared.deliver(&data),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket slot {} read failed: {}", slot.index, e);
                    break;
                }
            }
        }
        slot.mark_disconnected(generation).await;

        let abandoned = shared.pending.abandon_connection(slot.index, generation);
        if abandoned > 0 {
            warn!(
                "Failed {} pending call(s) on WebSocket slot {}",
                abandoned, slot.index
            );
        }
    }

    fn deliver(&self, payload: &[u8]) {
        let result: RpcResult = match serde_json::from_slice(payload) {
            Ok(result) => result,
            Err(e) => {
                warn!("Dropping undecodable WebSocket frame: {}", e);
                return;
            }
        };

        let Some(id) = result.key.clone() else {
            warn!("Dropping WebSocket result without key");
            return;
        };

        if !self
            .pending
            .complete(&id, result, self.config.pending_horizon)
        {
            warn!("Dropping WebSocket result for unknown call {}", id);
        }
    }
}

/// Key unique across the pool: send time, connection, per-connection
/// sequence, then the caller's own key.
fn composite_id(connection_id: &str, sequence: u64, caller: Option<&str>) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "{:x}.{}.{}.{}",
        nanos,
        connection_id,
        sequence,
        caller.unwrap_or_default()
    )
}
