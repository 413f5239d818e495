// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-size header slot record (spec 3, "Slot"; spec 6, "Slot record").
//!
//! Layout, all little-endian:
//!
//! ```text
//! offset 0   seq_commit        u64   (AtomicU64, seqlock commit word)
//! offset 8   slot meta frame   8B    schema_id,template_id,block_length,version
//! offset 16  slot meta block   52B   values_len_bytes,payload_slot,pool_id,
//!                                    payload_offset,timestamp_ns,meta_version,
//!                                    _reserved[26]
//! offset 68  header_bytes      ...   u32 length prefix + encoded tensor header
//! ```
//!
//! Total record is `HEADER_SLOT_BYTES`; bytes beyond the header_bytes
//! region are zero padding.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::tensor_header::{TensorHeader, TENSOR_HEADER_WIRE_LEN};

use super::commit::{seq_committed, seq_in_progress, seq_is_committed, seq_value};

/// Whole-slot size, ring-configured; the spec's "typical value 256".
pub const HEADER_SLOT_BYTES: usize = 256;

const META_FRAME_BYTES: usize = 8;
const META_BLOCK_BYTES: usize = 52;
const META_RESERVED_BYTES: usize = 26;
const SLOT_META_SCHEMA_ID: u16 = 0x5402;
const SLOT_META_TEMPLATE_ID: u16 = 1;
const SLOT_META_VERSION: u16 = 1;
const SLOT_META_BLOCK_LENGTH: u16 = META_BLOCK_BYTES as u16;

const BODY_BYTES: usize = HEADER_SLOT_BYTES - 8;
const HEADER_BYTES_OFFSET_IN_BODY: usize = META_FRAME_BYTES + META_BLOCK_BYTES;

/// Slot-local metadata accompanying the tensor header (spec 3, "Slot").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotMetadata {
    pub values_len_bytes: u32,
    pub payload_slot: u32,
    pub pool_id: u16,
    pub payload_offset: u32,
    pub timestamp_ns: u64,
    pub meta_version: u32,
}

/// A committed (or in-progress) slot's fully decoded view, returned by a
/// successful consumer read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    pub meta: SlotMetadata,
    pub header: TensorHeader,
}

/// Raw on-disk slot record. Cache-line aligned to avoid false sharing
/// between adjacent ring entries.
#[repr(C, align(64))]
pub struct RawSlot {
    seq_commit: AtomicU64,
    body: UnsafeCell<[u8; BODY_BYTES]>,
}

// SAFETY: RawSlot is designed for concurrent cross-process access; the
// seq_commit field is the sole synchronization edge, per spec 5.
unsafe impl Send for RawSlot {}
unsafe impl Sync for RawSlot {}

impl RawSlot {
    #[inline]
    pub fn get_seq(&self) -> u64 {
        self.seq_commit.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_ready(&self, expected_seq: u64) -> bool {
        let w = self.get_seq();
        seq_is_committed(w) && seq_value(w) == expected_seq
    }

    /// Stage 1 of the producer protocol: mark the slot in-progress with a
    /// full store barrier, before any other slot bytes are written.
    #[inline]
    pub fn mark_writing(&self, seq: u64) {
        self.seq_commit.store(seq_in_progress(seq), Ordering::SeqCst);
    }

    /// Stage 3 of the producer protocol: release-store the committed
    /// sequence. All writes to the slot body before this call happen
    /// before any reader's acquire-load sees this value.
    #[inline]
    pub fn commit(&self, seq: u64) {
        self.seq_commit.store(seq_committed(seq), Ordering::Release);
    }

    fn body_mut(&self) -> &mut [u8; BODY_BYTES] {
        // SAFETY: single-writer discipline (spec 5) guarantees no other
        // thread/process writes the body concurrently; readers only read
        // it after observing a committed seq via acquire-load.
        unsafe { &mut *self.body.get() }
    }

    fn body(&self) -> &[u8; BODY_BYTES] {
        // SAFETY: UnsafeCell's payload is read here under the seqlock
        // discipline documented on `super::reader::read_raw`.
        unsafe { &*self.body.get() }
    }

    /// Write slot metadata and tensor header into the body. Caller must
    /// already have called `mark_writing` for this `seq` and must call
    /// `commit` afterward to publish.
    pub fn write_body(&self, meta: &SlotMetadata, header: &TensorHeader) -> Result<()> {
        let body = self.body_mut();

        let frame = &mut body[..META_FRAME_BYTES];
        frame[0..2].copy_from_slice(&SLOT_META_SCHEMA_ID.to_le_bytes());
        frame[2..4].copy_from_slice(&SLOT_META_TEMPLATE_ID.to_le_bytes());
        frame[4..6].copy_from_slice(&SLOT_META_BLOCK_LENGTH.to_le_bytes());
        frame[6..8].copy_from_slice(&SLOT_META_VERSION.to_le_bytes());

        let mblock = &mut body[META_FRAME_BYTES..META_FRAME_BYTES + META_BLOCK_BYTES];
        mblock[0..4].copy_from_slice(&meta.values_len_bytes.to_le_bytes());
        mblock[4..8].copy_from_slice(&meta.payload_slot.to_le_bytes());
        mblock[8..10].copy_from_slice(&meta.pool_id.to_le_bytes());
        mblock[10..14].copy_from_slice(&meta.payload_offset.to_le_bytes());
        mblock[14..22].copy_from_slice(&meta.timestamp_ns.to_le_bytes());
        mblock[22..26].copy_from_slice(&meta.meta_version.to_le_bytes());
        for b in mblock[26..26 + META_RESERVED_BYTES].iter_mut() {
            *b = 0;
        }

        let header_region = &mut body[HEADER_BYTES_OFFSET_IN_BODY..];
        if header_region.len() < 4 + TENSOR_HEADER_WIRE_LEN {
            return Err(Error::Internal("slot too small for tensor header".into()));
        }
        header_region[..4].copy_from_slice(&(TENSOR_HEADER_WIRE_LEN as u32).to_le_bytes());
        header.encode(&mut header_region[4..4 + TENSOR_HEADER_WIRE_LEN])?;
        for b in header_region[4 + TENSOR_HEADER_WIRE_LEN..].iter_mut() {
            *b = 0;
        }
        Ok(())
    }

    /// Decode slot metadata and tensor header out of the body. Does not
    /// itself establish a happens-before edge; callers must perform the
    /// seqlock acquire/verify dance around this call (spec 4.1).
    pub fn read_body(&self) -> Result<SlotView> {
        let body = self.body();

        let frame = &body[..META_FRAME_BYTES];
        let schema_id = u16::from_le_bytes([frame[0], frame[1]]);
        let template_id = u16::from_le_bytes([frame[2], frame[3]]);
        let block_length = u16::from_le_bytes([frame[4], frame[5]]);
        if schema_id != SLOT_META_SCHEMA_ID || template_id != SLOT_META_TEMPLATE_ID {
            return Err(Error::CodecError("slot meta schema/template mismatch".into()));
        }
        if block_length != SLOT_META_BLOCK_LENGTH {
            return Err(Error::CodecError("slot meta block_length mismatch".into()));
        }

        let mblock = &body[META_FRAME_BYTES..META_FRAME_BYTES + META_BLOCK_BYTES];
        let values_len_bytes = u32::from_le_bytes(mblock[0..4].try_into().unwrap());
        let payload_slot = u32::from_le_bytes(mblock[4..8].try_into().unwrap());
        let pool_id = u16::from_le_bytes(mblock[8..10].try_into().unwrap());
        let payload_offset = u32::from_le_bytes(mblock[10..14].try_into().unwrap());
        let timestamp_ns = u64::from_le_bytes(mblock[14..22].try_into().unwrap());
        let meta_version = u32::from_le_bytes(mblock[22..26].try_into().unwrap());

        let header_region = &body[HEADER_BYTES_OFFSET_IN_BODY..];
        let header_len = u32::from_le_bytes(header_region[0..4].try_into().unwrap()) as usize;
        if header_len != TENSOR_HEADER_WIRE_LEN {
            return Err(Error::CodecError("header_bytes length mismatch".into()));
        }
        if header_region.len() < 4 + header_len {
            return Err(Error::CodecError("header_bytes region truncated".into()));
        }
        let header = TensorHeader::decode(&header_region[4..4 + header_len])?.validate()?;

        Ok(SlotView {
            meta: SlotMetadata {
                values_len_bytes,
                payload_slot,
                pool_id,
                payload_offset,
                timestamp_ns,
                meta_version,
            },
            header,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor_header::{DType, MajorOrder, ProgressUnit, MAX_DIMS};

    fn sample_header() -> TensorHeader {
        let mut dims = [0u32; MAX_DIMS];
        dims[0] = 8;
        let mut strides = [0i32; MAX_DIMS];
        strides[0] = 4;
        TensorHeader {
            dtype: DType::Float32,
            major_order: MajorOrder::Row,
            ndims: 1,
            progress_unit: ProgressUnit::None,
            progress_stride_bytes: 0,
            dims,
            strides,
        }
    }

    #[test]
    fn write_then_read_body_roundtrips() {
        let slot = RawSlot {
            seq_commit: AtomicU64::new(0),
            body: UnsafeCell::new([0u8; BODY_BYTES]),
        };
        let meta = SlotMetadata {
            values_len_bytes: 32,
            payload_slot: 1,
            pool_id: 1,
            payload_offset: 0,
            timestamp_ns: 55,
            meta_version: 2,
        };
        let header = sample_header();
        slot.write_body(&meta, &header).unwrap();

        let view = slot.read_body().unwrap();
        assert_eq!(view.meta, meta);
        assert_eq!(view.header, header);
    }

    #[test]
    fn mark_writing_then_commit_flips_readiness() {
        let slot = RawSlot {
            seq_commit: AtomicU64::new(0),
            body: UnsafeCell::new([0u8; BODY_BYTES]),
        };
        slot.mark_writing(5);
        assert!(!slot.is_ready(5));
        slot.commit(5);
        assert!(slot.is_ready(5));
        assert!(!slot.is_ready(4));
        assert!(!slot.is_ready(6));
    }

    #[test]
    fn header_slot_bytes_is_cache_line_multiple() {
        assert_eq!(std::mem::size_of::<RawSlot>() % 64, 0);
        assert_eq!(std::mem::align_of::<RawSlot>(), 64);
    }
}
