// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer-side seqlock read protocol (spec 4.4, "Consumer read
//! sequence").

use std::collections::HashMap;

use crate::error::{Error, ReadOutcome, Result};
use crate::pool::PayloadPool;
use crate::ring::{HeaderRing, SlotView};
use crate::tensor_header::ProgressUnit;

/// A successfully read, internally-consistent frame: the decoded slot
/// view plus a borrow of its payload bytes.
pub struct FrameView<'a> {
    pub view: SlotView,
    pub payload: &'a [u8],
}

/// Read-only consumer handle over a header ring and the payload pools it
/// references.
pub struct ConsumerReader<'a> {
    ring: &'a HeaderRing,
    pools: &'a HashMap<u16, PayloadPool>,
}

impl<'a> ConsumerReader<'a> {
    pub fn new(ring: &'a HeaderRing, pools: &'a HashMap<u16, PayloadPool>) -> Self {
        Self { ring, pools }
    }

    /// Attempt to read the frame published at `seq`. Implements the
    /// four-step seqlock retry: snapshot the commit word, decode the
    /// body, re-check the commit word, and only then trust the decode
    /// (spec 4.4).
    ///
    /// Returns `ReadOutcome::NotReady` when the slot has not yet reached
    /// `seq`, does not live at `header_index`, was overwritten by a
    /// faster producer before the read could complete (an overrun, per
    /// spec 4.4's "slower reader" case), or fails any whole-frame
    /// publication invariant; any other failure is a genuine error.
    ///
    /// `header_index` is the ring index the caller expects `seq` to map
    /// to. For whole-frame publications the payload slot must equal the
    /// header index (spec 3, spec 4.4); passing it in lets this check run
    /// without trusting the ring's own index arithmetic to agree with
    /// whatever the caller last observed.
    pub fn read_frame(&self, seq: u64, header_index: u32) -> Result<ReadOutcome<FrameView<'a>>> {
        let index = self.ring.index_for_seq(seq);
        if index != header_index {
            return Ok(ReadOutcome::NotReady);
        }
        let slot = self.ring.slot(index);

        let before = slot.get_seq();
        if !commit_matches(before, seq) {
            return Ok(ReadOutcome::NotReady);
        }

        let view = match slot.read_body() {
            Ok(v) => v,
            Err(Error::CodecError(_)) | Err(Error::Integrity(_)) => {
                // A torn read during a racing overwrite decodes as
                // garbage; the commit-word recheck below is what
                // distinguishes this from real corruption.
                return Ok(ReadOutcome::NotReady);
            }
            Err(e) => return Err(e),
        };

        let after = slot.get_seq();
        if before != after || !commit_matches(after, seq) {
            return Ok(ReadOutcome::NotReady);
        }

        if view.meta.payload_slot != header_index {
            return Ok(ReadOutcome::NotReady);
        }
        if view.meta.payload_offset != 0 {
            return Ok(ReadOutcome::NotReady);
        }

        let pool = match self.pools.get(&view.meta.pool_id) {
            Some(p) => p,
            None => return Ok(ReadOutcome::NotReady),
        };
        let payload = match pool.read_slice(
            view.meta.payload_slot,
            view.meta.payload_offset,
            view.meta.values_len_bytes,
        ) {
            Ok(p) => p,
            Err(Error::OutOfRange(_)) => return Ok(ReadOutcome::NotReady),
            Err(e) => return Err(e),
        };

        Ok(ReadOutcome::Ready(FrameView { view, payload }))
    }

    /// Highest sequence number a consumer could plausibly poll for right
    /// now: the newest committed slot in the ring, or `None` if nothing
    /// has ever been published.
    pub fn latest_seq(&self) -> Option<u64> {
        let mut best: Option<u64> = None;
        for i in 0..self.ring.nslots() {
            let word = self.ring.slot(i).get_seq();
            if word == 0 {
                continue;
            }
            let seq = crate::ring::commit::seq_value(word);
            if crate::ring::commit::seq_is_committed(word) && best.map_or(true, |b| seq > b) {
                best = Some(seq);
            }
        }
        best
    }
}

fn commit_matches(word: u64, expected_seq: u64) -> bool {
    crate::ring::commit::seq_is_committed(word) && crate::ring::commit::seq_value(word) == expected_seq
}

/// Validate a reported streaming-progress value against the tensor
/// header's declared progress axis (spec 6, "FRAME_PROGRESS"). `units`
/// must be non-decreasing across calls for the same frame; that
/// monotonicity is the caller's responsibility to track.
pub fn validate_progress(view: &SlotView, units: u32) -> Result<()> {
    match view.header.progress_unit {
        ProgressUnit::None => Err(Error::InvalidArgument(
            "frame has no progress axis".to_string(),
        )),
        ProgressUnit::Rows => {
            let total = view.header.dims[0];
            if units > total {
                return Err(Error::OutOfRange(format!(
                    "progress {units} exceeds row count {total}"
                )));
            }
            Ok(())
        }
        ProgressUnit::Columns => {
            let total = view.header.dims[1];
            if units > total {
                return Err(Error::OutOfRange(format!(
                    "progress {units} exceeds column count {total}"
                )));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{pool_region_size, PayloadPool};
    use crate::producer::{PoolPolicy, ProducerCore};
    use crate::region::Region;
    use crate::ring::ring_region_size;
    use crate::tensor_header::{DType, MajorOrder, TensorHeader, MAX_DIMS};

    fn sample_header(len: u32) -> TensorHeader {
        let mut dims = [0u32; MAX_DIMS];
        dims[0] = len / 4;
        TensorHeader {
            dtype: DType::Float32,
            major_order: MajorOrder::Row,
            ndims: 1,
            progress_unit: ProgressUnit::None,
            progress_stride_bytes: 0,
            dims,
            strides: [0; MAX_DIMS],
        }
        .validate()
        .unwrap()
    }

    fn setup(name: &str) -> (HeaderRing, HashMap<u16, PayloadPool>) {
        let nslots = 8;
        let ring_region =
            Region::create_anon(&format!("/consumer_test_ring_{name}"), ring_region_size(nslots));
        let ring = HeaderRing::create(ring_region, 1, 1, 42, nslots, 100, 0).unwrap();

        let pool_region = Region::create_anon(
            &format!("/consumer_test_pool_{name}"),
            pool_region_size(nslots, 64),
        );
        let pool = PayloadPool::create(pool_region, 1, 1, 42, 0, nslots, 64, 100, 0).unwrap();

        let mut pools = HashMap::new();
        pools.insert(0u16, pool);
        (ring, pools)
    }

    #[test]
    fn not_ready_before_any_publish() {
        let (ring, pools) = setup("a");
        let reader = ConsumerReader::new(&ring, &pools);
        let outcome = reader.read_frame(1, 0).unwrap();
        assert!(!outcome.is_ready());
    }

    #[test]
    fn successful_claim_commit_read_round_trips() {
        let (ring, pools) = setup("b");
        let producer = ProducerCore::new(ring, &pools);
        let claim = producer.try_claim(4, PoolPolicy::SmallestFit).unwrap();
        let seq = claim.seq();
        producer
            .claim_payload_mut(&claim)
            .unwrap()
            .copy_from_slice(&[9, 9, 9, 9]);
        producer.commit(claim, &sample_header(4), 42).unwrap();

        let reader = ConsumerReader::new(producer.ring(), &pools);
        let index = producer.ring().index_for_seq(seq);
        let outcome = reader.read_frame(seq, index).unwrap();
        match outcome {
            ReadOutcome::Ready(frame) => {
                assert_eq!(frame.payload, &[9, 9, 9, 9]);
                assert_eq!(frame.view.meta.payload_slot, index);
                assert_eq!(frame.view.meta.timestamp_ns, 42);
            }
            ReadOutcome::NotReady => panic!("expected Ready"),
        }
    }

    #[test]
    fn claimed_but_uncommitted_slot_is_not_ready() {
        let (ring, pools) = setup("e");
        let producer = ProducerCore::new(ring, &pools);
        let claim = producer.try_claim(4, PoolPolicy::SmallestFit).unwrap();
        let seq = claim.seq();
        let index = producer.ring().index_for_seq(seq);
        // Claimed but never committed: the slot stays marked in-progress.

        let reader = ConsumerReader::new(producer.ring(), &pools);
        let outcome = reader.read_frame(seq, index).unwrap();
        assert!(!outcome.is_ready());
    }

    #[test]
    fn aborted_claim_leaves_a_permanent_hole() {
        let (ring, pools) = setup("f");
        let producer = ProducerCore::new(ring, &pools);

        let first = producer.try_claim(16, PoolPolicy::SmallestFit).unwrap();
        let first_seq = first.seq();
        let first_index = producer.ring().index_for_seq(first_seq);
        producer.abort(first);

        let second = producer.try_claim(16, PoolPolicy::SmallestFit).unwrap();
        let second_seq = second.seq();
        let second_index = producer.ring().index_for_seq(second_seq);
        producer
            .claim_payload_mut(&second)
            .unwrap()
            .copy_from_slice(&[1; 16]);
        producer.commit(second, &sample_header(16), 0).unwrap();

        let reader = ConsumerReader::new(producer.ring(), &pools);
        assert!(!reader.read_frame(first_seq, first_index).unwrap().is_ready());
        match reader.read_frame(second_seq, second_index).unwrap() {
            ReadOutcome::Ready(frame) => {
                assert_eq!(frame.view.meta.values_len_bytes, 16);
            }
            ReadOutcome::NotReady => panic!("expected Ready"),
        }
    }

    #[test]
    fn invalid_header_commit_leaves_reader_permanently_not_ready() {
        let (ring, pools) = setup("g");
        let producer = ProducerCore::new(ring, &pools);
        let mut dims = [0u32; MAX_DIMS];
        dims[0] = 2;
        let invalid = TensorHeader {
            dtype: DType::Float32,
            major_order: MajorOrder::Row,
            ndims: 0,
            progress_unit: ProgressUnit::None,
            progress_stride_bytes: 0,
            dims,
            strides: [0; MAX_DIMS],
        };
        let claim = producer.try_claim(16, PoolPolicy::SmallestFit).unwrap();
        let seq = claim.seq();
        let index = producer.ring().index_for_seq(seq);
        assert!(producer.commit(claim, &invalid, 0).is_err());

        let reader = ConsumerReader::new(producer.ring(), &pools);
        assert!(!reader.read_frame(seq, index).unwrap().is_ready());
    }

    #[test]
    fn wrong_header_index_is_not_ready() {
        let (ring, pools) = setup("c");
        let producer = ProducerCore::new(ring, &pools);
        let claim = producer.try_claim(4, PoolPolicy::SmallestFit).unwrap();
        let seq = claim.seq();
        producer.commit(claim, &sample_header(4), 0).unwrap();

        let reader = ConsumerReader::new(producer.ring(), &pools);
        let wrong_index = producer.ring().index_for_seq(seq) + 1;
        let outcome = reader.read_frame(seq, wrong_index % producer.ring().nslots()).unwrap();
        assert!(!outcome.is_ready());
    }

    #[test]
    fn unknown_pool_id_is_not_ready_not_error() {
        let (ring, pools) = setup("d");
        let producer = ProducerCore::new(ring, &pools);
        let claim = producer.try_claim(4, PoolPolicy::SmallestFit).unwrap();
        let seq = claim.seq();
        let index = producer.ring().index_for_seq(seq);
        producer.commit(claim, &sample_header(4), 0).unwrap();

        // A reader that doesn't know about pool 0 at all must treat the
        // frame as not-ready rather than erroring out.
        let empty_pools = HashMap::new();
        let reader = ConsumerReader::new(producer.ring(), &empty_pools);
        let outcome = reader.read_frame(seq, index).unwrap();
        assert!(!outcome.is_ready());
    }

    #[test]
    fn validate_progress_rejects_none_axis() {
        let header = sample_header(16);
        let view = SlotView {
            meta: crate::ring::SlotMetadata {
                values_len_bytes: 16,
                payload_slot: 0,
                pool_id: 0,
                payload_offset: 0,
                timestamp_ns: 0,
                meta_version: 1,
            },
            header,
        };
        assert!(validate_progress(&view, 1).is_err());
    }
}
