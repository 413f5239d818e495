// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control bus: a cooperative, single-threaded poller carrying attach,
//! keepalive, HELLO/CONFIG, QOS, progress, and revocation traffic
//! (spec 5, "Bus interactions").
//!
//! `Bus` is the transport seam. Production deployments would back it
//! with UDP or a shared-memory ring of control fragments; tests and the
//! two binaries' wiring use `ChannelBus`, an in-process
//! `crossbeam_channel`-backed implementation.

use crossbeam::channel::{Receiver, Sender, TryRecvError};

use crate::error::Result;
use crate::messages::Message;

/// Maximum payload a single fragment may carry before it must be split
/// across multiple fragments (spec 5).
pub const MAX_FRAGMENT_BYTES: usize = 1400;

/// One wire fragment of a (possibly multi-fragment) message.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub message_id: u64,
    pub fragment_index: u16,
    pub fragment_count: u16,
    pub data: Vec<u8>,
}

/// A control-plane transport. `do_work` callers poll a fixed fragment
/// limit per call and feed results through a `FragmentReassembler`
/// (spec 5, "cooperative, single-threaded poller").
pub trait Bus: Send {
    fn publish_fragment(&self, fragment: Fragment) -> Result<()>;

    /// Poll up to `limit` fragments. Returns fewer than `limit` (possibly
    /// zero) when the transport has nothing more buffered right now.
    fn poll_fragments(&self, limit: usize) -> Vec<Fragment>;
}

/// Reassembles fragments back into whole encoded messages, keyed by
/// `message_id`. A message with `fragment_count == 1` completes
/// immediately.
#[derive(Default)]
pub struct FragmentReassembler {
    pending: std::collections::HashMap<u64, PartialMessage>,
}

struct PartialMessage {
    fragment_count: u16,
    received: Vec<Option<Vec<u8>>>,
}

impl FragmentReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment in. Returns the reassembled message bytes once
    /// every fragment for its `message_id` has arrived.
    pub fn feed(&mut self, fragment: Fragment) -> Option<Vec<u8>> {
        if fragment.fragment_count == 1 {
            return Some(fragment.data);
        }

        let entry = self.pending.entry(fragment.message_id).or_insert_with(|| PartialMessage {
            fragment_count: fragment.fragment_count,
            received: vec![None; fragment.fragment_count as usize],
        });
        if let Some(slot) = entry.received.get_mut(fragment.fragment_index as usize) {
            *slot = Some(fragment.data);
        }

        if entry.received.iter().all(Option::is_some) {
            let entry = self.pending.remove(&fragment.message_id).unwrap();
            let mut out = Vec::new();
            for piece in entry.received.into_iter().flatten() {
                out.extend_from_slice(&piece);
            }
            Some(out)
        } else {
            None
        }
    }

    /// Split an encoded message into fragments no larger than
    /// `MAX_FRAGMENT_BYTES`.
    pub fn split(message_id: u64, encoded: &[u8]) -> Vec<Fragment> {
        if encoded.is_empty() {
            return vec![Fragment {
                message_id,
                fragment_index: 0,
                fragment_count: 1,
                data: Vec::new(),
            }];
        }
        let chunks: Vec<&[u8]> = encoded.chunks(MAX_FRAGMENT_BYTES).collect();
        let fragment_count = chunks.len() as u16;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| Fragment {
                message_id,
                fragment_index: i as u16,
                fragment_count,
                data: chunk.to_vec(),
            })
            .collect()
    }
}

/// Encode and fragment a [`Message`] for `publish_fragment`.
pub fn publish_message(bus: &dyn Bus, message_id: u64, message: &Message) -> Result<()> {
    let encoded = message.encode();
    for fragment in FragmentReassembler::split(message_id, &encoded) {
        bus.publish_fragment(fragment)?;
    }
    Ok(())
}

/// In-process bus backed by an unbounded channel, used by tests and by
/// the driver/supervisor binaries when wired together in the same
/// process.
pub struct ChannelBus {
    tx: Sender<Fragment>,
    rx: Receiver<Fragment>,
}

impl ChannelBus {
    pub fn new_pair() -> (Self, Self) {
        let (tx_a, rx_a) = crossbeam::channel::unbounded();
        let (tx_b, rx_b) = crossbeam::channel::unbounded();
        (Self { tx: tx_a, rx: rx_b }, Self { tx: tx_b, rx: rx_a })
    }
}

impl Bus for ChannelBus {
    fn publish_fragment(&self, fragment: Fragment) -> Result<()> {
        self.tx
            .send(fragment)
            .map_err(|e| crate::error::Error::Internal(format!("bus send failed: {e}")))
    }

    fn poll_fragments(&self, limit: usize) -> Vec<Fragment> {
        let mut out = Vec::with_capacity(limit.min(16));
        for _ in 0..limit {
            match self.rx.try_recv() {
                Ok(fragment) => out.push(fragment),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{AttachRole, ConsumerHello};

    #[test]
    fn single_fragment_message_reassembles_immediately() {
        let message = Message::ConsumerHello(ConsumerHello {
            stream_id: 10000,
            consumer_id: 42,
        });
        let encoded = message.encode();
        let fragments = FragmentReassembler::split(1, &encoded);
        assert_eq!(fragments.len(), 1);

        let mut reassembler = FragmentReassembler::new();
        let out = reassembler.feed(fragments.into_iter().next().unwrap()).unwrap();
        assert_eq!(Message::decode(&out).unwrap(), message);
    }

    #[test]
    fn multi_fragment_message_reassembles_only_once_complete() {
        let big = vec![0xABu8; MAX_FRAGMENT_BYTES * 2 + 10];
        let fragments = FragmentReassembler::split(7, &big);
        assert_eq!(fragments.len(), 3);

        let mut reassembler = FragmentReassembler::new();
        assert!(reassembler.feed(fragments[0].clone()).is_none());
        assert!(reassembler.feed(fragments[2].clone()).is_none());
        let out = reassembler.feed(fragments[1].clone()).unwrap();
        assert_eq!(out, big);
    }

    #[test]
    fn channel_bus_pair_delivers_published_fragments() {
        let (a, b) = ChannelBus::new_pair();
        let message = Message::AttachRequest(crate::messages::AttachRequest {
            correlation_id: 1,
            stream_id: 1000,
            client_id: 1,
            role: AttachRole::Producer,
            expected_layout_version: 1,
            publish_mode: crate::messages::PublishMode::ExistingOrCreate,
            require_hugepages: false,
            desired_node_id: 0,
        });
        publish_message(&a, 1, &message).unwrap();

        let fragments = b.poll_fragments(16);
        assert_eq!(fragments.len(), 1);
        let mut reassembler = FragmentReassembler::new();
        let out = reassembler.feed(fragments.into_iter().next().unwrap()).unwrap();
        assert_eq!(Message::decode(&out).unwrap(), message);
    }
}
