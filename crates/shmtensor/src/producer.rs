// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Producer-side claim/commit protocol (spec 4.1, "Producer publish
//! sequence"; spec 4.3, "Pool selection").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::pool::PayloadPool;
use crate::ring::{HeaderRing, SlotMetadata};
use crate::tensor_header::TensorHeader;

/// Pool selection policy (spec 4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPolicy {
    /// Pick the smallest pool whose stride fits the requested length.
    SmallestFit,
    /// Always use the given pool id; fail if the length does not fit.
    Fixed(u16),
}

/// An in-flight claim on a payload slot, returned by `try_claim` and
/// consumed by `commit`, `abort`, or `queue_claim`.
#[derive(Debug)]
pub struct Claim {
    seq: u64,
    pool_id: u16,
    payload_slot: u32,
    len: u32,
    policy: PoolPolicy,
}

impl Claim {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn len(&self) -> u32 {
        self.len
    }
}

/// Producer-side state: the header ring plus the set of payload pools it
/// may publish into. Pools are borrowed rather than owned: a ring index
/// doubles as the payload slot for whole-frame publications (spec 3,
/// spec 4.4, spec 9), so no per-pool cursor bookkeeping is needed beyond
/// the ring's own `index_for_seq`.
pub struct ProducerCore<'a> {
    ring: HeaderRing,
    pools: &'a HashMap<u16, PayloadPool>,
    next_seq: AtomicU64,
    queued: Vec<Claim>,
}

impl<'a> ProducerCore<'a> {
    pub fn new(ring: HeaderRing, pools: &'a HashMap<u16, PayloadPool>) -> Self {
        // Sequence numbers start at 1; 0 is reserved to mean "never
        // written" so a freshly mapped, all-zero ring is unambiguously
        // distinguishable from a committed seq 0 (spec 3, "Commit
        // sequence").
        Self {
            ring,
            pools,
            next_seq: AtomicU64::new(1),
            queued: Vec::new(),
        }
    }

    fn select_pool(&self, len: u32, policy: PoolPolicy) -> Result<u16> {
        match policy {
            PoolPolicy::Fixed(pool_id) => {
                let pool = self
                    .pools
                    .get(&pool_id)
                    .ok_or_else(|| Error::InvalidArgument(format!("no such pool {pool_id}")))?;
                if pool.stride_bytes() < len {
                    return Err(Error::OutOfRange(format!(
                        "pool {pool_id} stride {} too small for length {len}",
                        pool.stride_bytes()
                    )));
                }
                Ok(pool_id)
            }
            PoolPolicy::SmallestFit => self
                .pools
                .values()
                .filter(|p| p.stride_bytes() >= len)
                .min_by_key(|p| p.stride_bytes())
                .map(|p| p.pool_id())
                .ok_or_else(|| {
                    Error::ResourceExhausted(format!("no pool large enough for length {len}"))
                }),
        }
    }

    /// Claim the next ring slot and the payload slot at the same index
    /// (spec 3, spec 4.4: "`payload_slot` must equal the header index for
    /// whole-frame publications"). On success, the caller writes into
    /// `claim_payload_mut` and then calls `commit`.
    pub fn try_claim(&self, len: u32, policy: PoolPolicy) -> Result<Claim> {
        let pool_id = self.select_pool(len, policy)?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let index = self.ring.index_for_seq(seq);

        let pool = self.pools.get(&pool_id).expect("selected pool exists");
        if index >= pool.nslots() {
            return Err(Error::InvalidArgument(format!(
                "pool {pool_id} has {} slots, too few for ring index {index}",
                pool.nslots()
            )));
        }

        self.ring.slot(index).mark_writing(seq);

        Ok(Claim {
            seq,
            pool_id,
            payload_slot: index,
            len,
            policy,
        })
    }

    /// Borrow the claimed payload bytes for writing.
    pub fn claim_payload_mut(&self, claim: &Claim) -> Result<&mut [u8]> {
        let pool = self
            .pools
            .get(&claim.pool_id)
            .ok_or_else(|| Error::Internal(format!("unknown pool {}", claim.pool_id)))?;
        pool.write_slice(claim.payload_slot, 0, claim.len)
    }

    /// Publish a claim: validate its tensor header, write the slot's
    /// metadata and header, then release-commit the ring slot so
    /// consumers can observe it. An invalid header leaves the slot
    /// in-progress rather than publishing garbage (spec 4.3, scenario 4).
    pub fn commit(&self, claim: Claim, header: &TensorHeader, timestamp_ns: u64) -> Result<()> {
        let header = header.clone().validate()?;
        let index = self.ring.index_for_seq(claim.seq);
        let slot = self.ring.slot(index);
        let meta = SlotMetadata {
            values_len_bytes: claim.len,
            payload_slot: claim.payload_slot,
            pool_id: claim.pool_id,
            payload_offset: 0,
            timestamp_ns,
            meta_version: 1,
        };
        slot.write_body(&meta, &header)?;
        slot.commit(claim.seq);
        Ok(())
    }

    /// Abandon a claim without publishing it. The ring slot is left
    /// in-progress forever from the readers' point of view until the next
    /// producer cycles back to its index and re-marks it, which is the
    /// same outcome a crashed producer would leave behind (spec 4.4,
    /// NOT_READY on in-progress slots).
    pub fn abort(&self, _claim: Claim) {}

    /// Defer a claim instead of publishing it immediately, returning its
    /// position in the queue (spec 4.3, the `QUEUED` claim state).
    /// Queuing only applies to pinned-pool claims: a `SmallestFit` claim
    /// has no stable pool to replay the queued write against once other
    /// claims have advanced the ring past it.
    pub fn queue_claim(&mut self, claim: Claim) -> Result<u64> {
        match claim.policy {
            PoolPolicy::Fixed(_) => {
                self.queued.push(claim);
                Ok(self.queued.len() as u64 - 1)
            }
            PoolPolicy::SmallestFit => Err(Error::InvalidArgument(
                "queue_claim requires a claim made under a Fixed pool policy".into(),
            )),
        }
    }

    /// Number of claims currently queued, awaiting a later commit/abort.
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Remove and return the oldest queued claim, if any.
    pub fn pop_queued(&mut self) -> Option<Claim> {
        if self.queued.is_empty() {
            None
        } else {
            Some(self.queued.remove(0))
        }
    }

    pub fn ring(&self) -> &HeaderRing {
        &self.ring
    }
}
