// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Superblock: the fixed descriptor at offset 0 of every region.
//!
//! Every client validates a mapped region's superblock against the
//! attach reply's descriptor set before trusting any other byte in the
//! region (spec 3, "Region").

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Bytes reserved for the superblock at the start of every region. One
/// page, cache-line aligned.
pub const SUPERBLOCK_BYTES: usize = 4096;

/// Magic constant identifying a valid superblock.
pub const SUPERBLOCK_MAGIC: u64 = 0x5348_4D54_4E53_5231; // "SHMTNSR1"

/// Region kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RegionKind {
    HeaderRing = 1,
    PayloadPool = 2,
}

impl RegionKind {
    fn from_u32(v: u32) -> Result<Self> {
        match v {
            1 => Ok(Self::HeaderRing),
            2 => Ok(Self::PayloadPool),
            other => Err(Error::CodecError(format!("unknown region_kind {other}"))),
        }
    }
}

/// The descriptor set a client validates a mapped region against, as
/// delivered in the attach reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedRegion {
    pub layout_version: u32,
    pub epoch: u64,
    pub stream_id: u32,
    pub region_kind: u32,
    pub pool_id: u16,
    pub nslots: u32,
    pub slot_bytes: u32,
    pub stride_bytes: u32,
}

/// On-disk superblock layout, written at offset 0 of every region. The
/// struct itself carries only the live fields; the region reserves a full
/// `SUPERBLOCK_BYTES` page regardless of `size_of::<Superblock>()`.
#[repr(C)]
pub struct Superblock {
    magic: AtomicU64,
    layout_version: AtomicU64,
    epoch: AtomicU64,
    stream_id: AtomicU64,
    region_kind: AtomicU64,
    pool_id: AtomicU64,
    nslots: AtomicU64,
    slot_bytes: AtomicU64,
    stride_bytes: AtomicU64,
    pid: AtomicU64,
    start_timestamp_ns: AtomicU64,
    activity_timestamp_ns: AtomicU64,
}

impl Superblock {
    /// Initialize a freshly created region's superblock in place.
    ///
    /// # Safety
    /// `ptr` must point to at least `SUPERBLOCK_BYTES` bytes of writable,
    /// 8-byte-aligned memory exclusively owned by the caller.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn init(
        ptr: *mut u8,
        layout_version: u32,
        epoch: u64,
        stream_id: u32,
        region_kind: RegionKind,
        pool_id: u16,
        nslots: u32,
        slot_bytes: u32,
        stride_bytes: u32,
        pid: u32,
        now_ns: u64,
    ) {
        let sb = &mut *(ptr as *mut Superblock);
        sb.layout_version.store(layout_version as u64, Ordering::Relaxed);
        sb.epoch.store(epoch, Ordering::Relaxed);
        sb.stream_id.store(stream_id as u64, Ordering::Relaxed);
        sb.region_kind.store(region_kind as u64, Ordering::Relaxed);
        sb.pool_id.store(pool_id as u64, Ordering::Relaxed);
        sb.nslots.store(nslots as u64, Ordering::Relaxed);
        sb.slot_bytes.store(slot_bytes as u64, Ordering::Relaxed);
        sb.stride_bytes.store(stride_bytes as u64, Ordering::Relaxed);
        sb.pid.store(pid as u64, Ordering::Relaxed);
        sb.start_timestamp_ns.store(now_ns, Ordering::Relaxed);
        sb.activity_timestamp_ns.store(now_ns, Ordering::Relaxed);
        // Publish last: a reader that observes a non-zero magic observes
        // every field above it.
        sb.magic.store(SUPERBLOCK_MAGIC, Ordering::Release);
    }

    /// Borrow an already-initialized superblock out of a mapped region.
    ///
    /// # Safety
    /// `ptr` must point to at least `SUPERBLOCK_BYTES` bytes that were
    /// previously initialized by `init` (possibly in another process).
    pub unsafe fn at<'a>(ptr: *const u8) -> &'a Superblock {
        &*(ptr as *const Superblock)
    }

    pub fn magic(&self) -> u64 {
        self.magic.load(Ordering::Acquire)
    }

    pub fn touch(&self, now_ns: u64) {
        self.activity_timestamp_ns.store(now_ns, Ordering::Relaxed);
    }

    pub fn layout_version(&self) -> u32 {
        self.layout_version.load(Ordering::Relaxed) as u32
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id.load(Ordering::Relaxed) as u32
    }

    pub fn region_kind_raw(&self) -> u32 {
        self.region_kind.load(Ordering::Relaxed) as u32
    }

    pub fn pool_id(&self) -> u16 {
        self.pool_id.load(Ordering::Relaxed) as u16
    }

    pub fn nslots(&self) -> u32 {
        self.nslots.load(Ordering::Relaxed) as u32
    }

    pub fn slot_bytes(&self) -> u32 {
        self.slot_bytes.load(Ordering::Relaxed) as u32
    }

    pub fn stride_bytes(&self) -> u32 {
        self.stride_bytes.load(Ordering::Relaxed) as u32
    }

    /// Validate this superblock against the attach reply's descriptor
    /// set. `stride_bytes` is compared only for `PAYLOAD_POOL` regions;
    /// `slot_bytes` only for `HEADER_RING` (spec 8, "Superblock").
    pub fn validate(&self, expected: &ExpectedRegion) -> Result<()> {
        if self.magic() != SUPERBLOCK_MAGIC {
            return Err(Error::Integrity("bad superblock magic".into()));
        }
        let kind = RegionKind::from_u32(self.region_kind_raw())?;
        let expected_kind = RegionKind::from_u32(expected.region_kind)?;
        if kind != expected_kind {
            return Err(Error::LayoutMismatch("region_kind mismatch".into()));
        }
        if self.layout_version() != expected.layout_version {
            return Err(Error::LayoutMismatch("layout_version mismatch".into()));
        }
        if self.epoch() != expected.epoch {
            return Err(Error::EpochMismatch {
                expected: expected.epoch,
                found: self.epoch(),
            });
        }
        if self.stream_id() != expected.stream_id {
            return Err(Error::LayoutMismatch("stream_id mismatch".into()));
        }
        if self.pool_id() != expected.pool_id {
            return Err(Error::LayoutMismatch("pool_id mismatch".into()));
        }
        if self.nslots() != expected.nslots {
            return Err(Error::LayoutMismatch("nslots mismatch".into()));
        }
        match kind {
            RegionKind::HeaderRing => {
                if self.slot_bytes() != expected.slot_bytes {
                    return Err(Error::LayoutMismatch("slot_bytes mismatch".into()));
                }
            }
            RegionKind::PayloadPool => {
                if self.stride_bytes() != expected.stride_bytes {
                    return Err(Error::LayoutMismatch("stride_bytes mismatch".into()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_ring(buf: &mut [u8]) {
        // SAFETY: buf is at least SUPERBLOCK_BYTES, owned exclusively here.
        unsafe {
            Superblock::init(
                buf.as_mut_ptr(),
                1,
                7,
                1000,
                RegionKind::HeaderRing,
                0,
                256,
                256,
                0,
                std::process::id(),
                42,
            );
        }
    }

    #[test]
    fn validate_accepts_matching_descriptor() {
        let mut buf = vec![0u8; SUPERBLOCK_BYTES];
        init_ring(&mut buf);
        // SAFETY: buf was just initialized above.
        let sb = unsafe { Superblock::at(buf.as_ptr()) };
        let expected = ExpectedRegion {
            layout_version: 1,
            epoch: 7,
            stream_id: 1000,
            region_kind: RegionKind::HeaderRing as u32,
            pool_id: 0,
            nslots: 256,
            slot_bytes: 256,
            stride_bytes: 0,
        };
        assert!(sb.validate(&expected).is_ok());
    }

    #[test]
    fn validate_rejects_epoch_mismatch() {
        let mut buf = vec![0u8; SUPERBLOCK_BYTES];
        init_ring(&mut buf);
        // SAFETY: buf was just initialized above.
        let sb = unsafe { Superblock::at(buf.as_ptr()) };
        let expected = ExpectedRegion {
            layout_version: 1,
            epoch: 8,
            stream_id: 1000,
            region_kind: RegionKind::HeaderRing as u32,
            pool_id: 0,
            nslots: 256,
            slot_bytes: 256,
            stride_bytes: 0,
        };
        assert!(matches!(sb.validate(&expected), Err(Error::EpochMismatch { .. })));
    }

    #[test]
    fn validate_rejects_bad_magic() {
        let buf = vec![0u8; SUPERBLOCK_BYTES];
        // SAFETY: buf is zeroed, never initialized; magic() reads 0.
        let sb = unsafe { Superblock::at(buf.as_ptr()) };
        let expected = ExpectedRegion {
            layout_version: 1,
            epoch: 0,
            stream_id: 0,
            region_kind: RegionKind::HeaderRing as u32,
            pool_id: 0,
            nslots: 0,
            slot_bytes: 0,
            stride_bytes: 0,
        };
        assert!(matches!(sb.validate(&expected), Err(Error::Integrity(_))));
    }
}
