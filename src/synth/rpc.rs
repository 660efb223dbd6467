//! Datagram-channel call correlation registry.
//!
//! Requests go out as OSC messages on `/API/call` carrying
//! `[id, path, json-args]`. When the serialized argument payload exceeds
//! the fragment limit it is split into fixed-size pieces, each sent as a
//! separate datagram whose id is the compound form `index,count:id`; the
//! receiving side reassembles by compound id before correlating, so
//! fragments may arrive in any order. Replies are discriminated by
//! address: `/API/reply` resolves, `/API/error` and `/API/not_found`
//! reject.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RpcError, RpcResult};
use crate::osc::codec::{decode_packet, encode_message};
use crate::osc::value::{OscBundle, OscMessage, OscPacket, OscValue};

/// Address correlated calls are sent to.
pub const CALL_ADDRESS: &str = "/API/call";
/// Address successful replies arrive on.
pub const REPLY_ADDRESS: &str = "/API/reply";
/// Address error replies arrive on.
pub const ERROR_ADDRESS: &str = "/API/error";
/// Address replies for unknown paths arrive on.
pub const NOT_FOUND_ADDRESS: &str = "/API/not_found";

/// Tunables for the datagram channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Largest JSON argument payload sent as a single datagram; larger
    /// payloads are fragmented into pieces of this size
    pub fragment_payload_limit: usize,
    /// How long an incomplete inbound fragment group is kept before
    /// eviction
    pub fragment_ttl: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            fragment_payload_limit: 7168,
            fragment_ttl: Duration::from_secs(30),
        }
    }
}

struct FragmentGroup {
    total: usize,
    parts: HashMap<usize, String>,
    created: Instant,
}

/// Correlation registry for calls to the synthesis server.
///
/// Datagrams are unordered and unreliable; replies may arrive in any
/// order relative to requests, and the registry tolerates both unknown
/// correlation ids and fragments that never complete.
pub struct RpcClient {
    config: RpcConfig,
    outbound: mpsc::UnboundedSender<Bytes>,
    pending: Mutex<HashMap<String, oneshot::Sender<RpcResult<Value>>>>,
    fragments: Mutex<HashMap<String, FragmentGroup>>,
}

impl RpcClient {
    /// Create a client sending encoded datagrams through `outbound`; the
    /// transport collaborator owns the socket on the other end and feeds
    /// received datagrams back through [`ingest_datagram`](Self::ingest_datagram).
    pub fn new(config: RpcConfig, outbound: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            config,
            outbound,
            pending: Mutex::new(HashMap::new()),
            fragments: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a correlated call and return the pending future immediately.
    pub fn call(&self, path: &str, args: &Value) -> RpcResult<oneshot::Receiver<RpcResult<Value>>> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        if let Err(err) = self.send_call(&id, path, args) {
            self.pending.lock().remove(&id);
            return Err(err);
        }
        Ok(rx)
    }

    fn send_call(&self, id: &str, path: &str, args: &Value) -> RpcResult<()> {
        let json = args.to_string();
        if json.len() <= self.config.fragment_payload_limit {
            return self.send_request(id, path, &json);
        }

        let pieces: Vec<&str> = chunk_str(&json, self.config.fragment_payload_limit);
        let count = pieces.len();
        debug!(%id, count, "fragmenting oversized call payload");
        for (index, piece) in pieces.into_iter().enumerate() {
            let compound = format!("{index},{count}:{id}");
            self.send_request(&compound, path, piece)?;
        }
        Ok(())
    }

    fn send_request(&self, id: &str, path: &str, payload: &str) -> RpcResult<()> {
        let message = OscMessage::new(
            CALL_ADDRESS,
            vec![
                OscValue::Str(id.to_string()),
                OscValue::Str(path.to_string()),
                OscValue::Str(payload.to_string()),
            ],
        )?;
        let encoded = encode_message(&message)?;
        self.outbound
            .send(encoded)
            .map_err(|_| RpcError::ChannelClosed)
    }

    /// Send a one-way message with no correlation.
    pub fn send(&self, message: &OscMessage) -> RpcResult<()> {
        let encoded = encode_message(message)?;
        self.outbound
            .send(encoded)
            .map_err(|_| RpcError::ChannelClosed)
    }

    /// Number of calls still awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Feed one received datagram through the codec and correlate it.
    ///
    /// Malformed datagrams are logged and dropped; they never disturb
    /// other pending calls.
    pub fn ingest_datagram(&self, datagram: &[u8]) {
        match decode_packet(datagram) {
            Ok(OscPacket::Message(message)) => self.dispatch(message),
            Ok(OscPacket::Bundle(bundle)) => self.dispatch_bundle(bundle),
            Err(err) => warn!(%err, "dropping malformed datagram"),
        }
    }

    // Reply bundles are unwrapped recursively; their time tags carry no
    // meaning on the client side.
    fn dispatch_bundle(&self, bundle: OscBundle) {
        for element in bundle.elements {
            match element {
                OscPacket::Message(message) => self.dispatch(message),
                OscPacket::Bundle(inner) => self.dispatch_bundle(inner),
            }
        }
    }

    fn dispatch(&self, message: OscMessage) {
        match message.address.as_str() {
            REPLY_ADDRESS => self.handle_reply(&message),
            ERROR_ADDRESS | NOT_FOUND_ADDRESS => self.handle_error(&message),
            other => debug!(address = other, "ignoring unhandled message"),
        }
    }

    fn handle_reply(&self, message: &OscMessage) {
        let Some(id) = message.args.first().and_then(OscValue::as_str) else {
            warn!("reply without an id argument");
            return;
        };
        let body = message
            .args
            .get(1)
            .and_then(OscValue::as_str)
            .unwrap_or_default()
            .to_string();

        match parse_compound(id) {
            Some((index, count, base_id)) => {
                if let Some(full) = self.absorb_fragment(base_id, index, count, body) {
                    self.resolve(base_id, full);
                }
            }
            None => self.resolve(id, body),
        }
    }

    /// Buffer one fragment; returns the concatenated body once every
    /// fragment for the id is present.
    fn absorb_fragment(
        &self,
        id: &str,
        index: usize,
        count: usize,
        body: String,
    ) -> Option<String> {
        let mut fragments = self.fragments.lock();
        let now = Instant::now();
        let ttl = self.config.fragment_ttl;
        fragments.retain(|stale_id, group| {
            let keep = now.duration_since(group.created) < ttl;
            if !keep {
                warn!(id = %stale_id, "evicting incomplete fragment group");
            }
            keep
        });

        let group = fragments.entry(id.to_string()).or_insert_with(|| FragmentGroup {
            total: count,
            parts: HashMap::new(),
            created: now,
        });
        group.parts.insert(index, body);
        if group.parts.len() < group.total {
            return None;
        }

        let group = fragments.remove(id).expect("group inserted above");
        let mut full = String::new();
        for index in 0..group.total {
            full.push_str(group.parts.get(&index).map(String::as_str).unwrap_or(""));
        }
        Some(full)
    }

    fn resolve(&self, id: &str, body: String) {
        let Some(tx) = self.pending.lock().remove(id) else {
            warn!(%id, "reply for unknown correlation id");
            return;
        };
        // unparseable reply bodies degrade to a raw string result
        let value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => {
                warn!(%id, %err, "reply body is not valid JSON, degrading to string");
                Value::String(body)
            }
        };
        let _ = tx.send(Ok(value));
    }

    fn handle_error(&self, message: &OscMessage) {
        let Some(id) = message.args.first().and_then(OscValue::as_str) else {
            warn!(address = %message.address, "error reply without an id argument");
            return;
        };
        let detail = message
            .args
            .get(1)
            .and_then(OscValue::as_str)
            .unwrap_or("unspecified server error")
            .to_string();

        let Some(tx) = self.pending.lock().remove(id) else {
            warn!(%id, "error reply for unknown correlation id");
            return;
        };
        let _ = tx.send(Err(RpcError::ErrorReply {
            address: message.address.clone(),
            message: detail,
        }));
    }

    /// Reject every pending call and drop buffered fragments; used on
    /// session teardown.
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        if !drained.is_empty() {
            warn!(count = drained.len(), "rejecting pending server calls");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(RpcError::Shutdown));
        }
        self.fragments.lock().clear();
    }
}

/// Parse the compound fragment identifier `index,count:id`.
fn parse_compound(id: &str) -> Option<(usize, usize, &str)> {
    let (prefix, base) = id.split_once(':')?;
    let (index, count) = prefix.split_once(',')?;
    Some((index.parse().ok()?, count.parse().ok()?, base))
}

/// Split a string into pieces of at most `size` bytes, respecting UTF-8
/// boundaries.
fn chunk_str(s: &str, size: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let mut cut = size.min(rest.len());
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (piece, tail) = rest.split_at(cut);
        pieces.push(piece);
        rest = tail;
    }
    pieces
}
