// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Header ring: a fixed-capacity circular array of `RawSlot`s backed by a
//! single region (spec 3, "Header ring"; spec 4, "Producer/consumer
//! protocol").

pub mod commit;
pub mod slot;

use crate::error::{Error, Result};
use crate::region::Region;
use crate::superblock::{ExpectedRegion, RegionKind, Superblock, SUPERBLOCK_BYTES};

pub use slot::{RawSlot, SlotMetadata, SlotView, HEADER_SLOT_BYTES};

/// Total byte size of a header ring region for `nslots` slots, including
/// the superblock page (spec 6, "Region sizing").
pub fn ring_region_size(nslots: u32) -> usize {
    SUPERBLOCK_BYTES + nslots as usize * HEADER_SLOT_BYTES
}

/// A mapped header ring: the superblock plus `nslots` fixed-size slots.
pub struct HeaderRing {
    region: Region,
    nslots: u32,
}

impl HeaderRing {
    /// Create a fresh header ring region and initialize its superblock.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        region: Region,
        layout_version: u32,
        epoch: u64,
        stream_id: u32,
        nslots: u32,
        pid: u32,
        now_ns: u64,
    ) -> Result<Self> {
        let expected_size = ring_region_size(nslots);
        if region.size() < expected_size {
            return Err(Error::InvalidArgument(format!(
                "region too small for {nslots} slots: have {}, need {expected_size}",
                region.size()
            )));
        }
        // SAFETY: region.as_ptr() is valid for region.size() bytes, which
        // we just checked is >= SUPERBLOCK_BYTES; region is freshly
        // created and not yet shared with any other reference.
        unsafe {
            Superblock::init(
                region.as_ptr(),
                layout_version,
                epoch,
                stream_id,
                RegionKind::HeaderRing,
                0,
                nslots,
                HEADER_SLOT_BYTES as u32,
                0,
                pid,
                now_ns,
            );
        }
        Ok(Self { region, nslots })
    }

    /// Map an existing header ring region and validate it against the
    /// descriptor the client was handed at attach time.
    pub fn open(region: Region, expected: &ExpectedRegion) -> Result<Self> {
        // SAFETY: region.as_ptr() points to a region created by `create`
        // (possibly in another process), at least SUPERBLOCK_BYTES long.
        let sb = unsafe { Superblock::at(region.as_ptr()) };
        sb.validate(expected)?;
        let nslots = sb.nslots();
        let expected_size = ring_region_size(nslots);
        if region.size() < expected_size {
            return Err(Error::LayoutMismatch(format!(
                "mapped region too small: have {}, need {expected_size}",
                region.size()
            )));
        }
        Ok(Self { region, nslots })
    }

    pub fn nslots(&self) -> u32 {
        self.nslots
    }

    /// Borrow the ring's superblock.
    pub fn superblock(&self) -> &Superblock {
        // SAFETY: the region was created or opened (and validated) above.
        unsafe { Superblock::at(self.region.as_ptr()) }
    }

    /// Borrow the slot for a given ring index, `0..nslots`.
    pub fn slot(&self, index: u32) -> &RawSlot {
        assert!(index < self.nslots, "slot index out of range");
        let offset = SUPERBLOCK_BYTES + index as usize * HEADER_SLOT_BYTES;
        // SAFETY: offset + size_of::<RawSlot>() <= region.size() by the
        // bounds check performed in `create`/`open`; RawSlot's layout
        // (AtomicU64 + byte array) has no padding-sensitive invariants
        // beyond alignment, which `ring_region_size`'s superblock-page
        // prefix satisfies.
        unsafe { &*(self.region.as_ptr().add(offset) as *const RawSlot) }
    }

    /// Ring index for a monotonically increasing producer sequence
    /// number.
    pub fn index_for_seq(&self, seq: u64) -> u32 {
        (seq % self.nslots as u64) as u32
    }
}
