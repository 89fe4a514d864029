//! Per-connection identity and the outbound registry used to push
//! notification frames to connections other than the one currently being
//! handled.
//!
//! Each connection owns exactly one writer: its accept-loop task. Other
//! components never touch a socket directly; they hand a connection id and
//! an encoded frame to the [`Registry`], which forwards it over an
//! unbounded channel into that connection's writer task. This keeps the
//! single-writer-per-connection discipline without any cross-task locking
//! of the socket itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::value::Value;

pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Encodes a `(channel, body)` pair the way every frame on the wire is
/// shaped, length-prefixed and ready to write to a socket.
pub fn encode_frame(channel: i64, body: Value) -> Vec<u8> {
    let record = Value::List(vec![Value::Int(channel), body]);
    let payload = record.to_bytes();
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

pub fn decode_frame(payload: &[u8]) -> crate::error::Result<(i64, Value)> {
    let value = Value::from_bytes_exact(payload)?;
    let items = value
        .as_list()
        .ok_or_else(|| crate::error::Error::protocol("frame payload is not a (channel, body) pair"))?;
    if items.len() != 2 {
        return Err(crate::error::Error::protocol("frame payload must have exactly 2 elements"));
    }
    let channel = items[0]
        .as_int()
        .ok_or_else(|| crate::error::Error::protocol("channel must be an integer"))?;
    Ok((channel, items[1].clone()))
}

pub struct Registry {
    senders: Mutex<HashMap<ConnId, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry { senders: Mutex::new(HashMap::new()) }
    }
}

impl Registry {
    pub fn register(&self, id: ConnId, sender: mpsc::UnboundedSender<Vec<u8>>) {
        self.senders.lock().unwrap().insert(id, sender);
    }

    pub fn unregister(&self, id: ConnId) {
        self.senders.lock().unwrap().remove(&id);
    }

    /// Best-effort push: if the connection has already gone away the
    /// channel send fails silently, matching the server-shutdown
    /// best-effort notification policy.
    pub fn push(&self, id: ConnId, channel: i64, body: Value) {
        let sender = self.senders.lock().unwrap().get(&id).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(encode_frame(channel, body));
        }
    }

    pub fn all_ids(&self) -> Vec<ConnId> {
        self.senders.lock().unwrap().keys().copied().collect()
    }

    /// Sends an already-framed buffer (as produced by [`encode_frame`])
    /// straight to the connection's writer task. Used for responses, which
    /// the mux has already encoded, as opposed to [`Registry::push`] which
    /// encodes a fresh notification.
    pub fn send_raw(&self, id: ConnId, frame: Vec<u8>) -> std::result::Result<(), ()> {
        let sender = self.senders.lock().unwrap().get(&id).cloned();
        match sender {
            Some(sender) => sender.send(frame).map_err(|_| ()),
            None => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::map;

    #[test]
    fn frame_round_trips_channel_and_body() {
        let body = map().set("status", "ok").build();
        let encoded = encode_frame(13, body.clone());
        let len = u32::from_le_bytes(encoded[0..4].try_into().unwrap()) as usize;
        let payload = &encoded[4..4 + len];
        let (channel, decoded) = decode_frame(payload).unwrap();
        assert_eq!(channel, 13);
        assert_eq!(decoded, body);
    }

    #[tokio::test]
    async fn push_delivers_to_registered_connection() {
        let registry = Registry::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(1, tx);
        registry.push(1, 13, Value::Int(5));
        let frame = rx.recv().await.unwrap();
        assert!(!frame.is_empty());
    }

    #[test]
    fn push_to_unknown_connection_is_silent() {
        let registry = Registry::default();
        registry.push(99, 13, Value::Null);
    }
}
