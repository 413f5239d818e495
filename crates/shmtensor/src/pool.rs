// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload pool: a region of fixed-stride byte slots holding tensor
//! values, addressed by the `(pool_id, payload_slot, payload_offset)`
//! triple carried in a committed header slot (spec 3, "Payload pool").

use crate::error::{Error, Result};
use crate::region::Region;
use crate::superblock::{ExpectedRegion, RegionKind, Superblock, SUPERBLOCK_BYTES};

/// Total byte size of a payload pool region for `nslots` slots of
/// `stride_bytes` each, including the superblock page.
pub fn pool_region_size(nslots: u32, stride_bytes: u32) -> usize {
    SUPERBLOCK_BYTES + nslots as usize * stride_bytes as usize
}

/// A mapped payload pool.
pub struct PayloadPool {
    region: Region,
    pool_id: u16,
    nslots: u32,
    stride_bytes: u32,
}

impl PayloadPool {
    /// Create a fresh payload pool region and initialize its superblock.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        region: Region,
        layout_version: u32,
        epoch: u64,
        stream_id: u32,
        pool_id: u16,
        nslots: u32,
        stride_bytes: u32,
        pid: u32,
        now_ns: u64,
    ) -> Result<Self> {
        let expected_size = pool_region_size(nslots, stride_bytes);
        if region.size() < expected_size {
            return Err(Error::InvalidArgument(format!(
                "region too small for pool: have {}, need {expected_size}",
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
                RegionKind::PayloadPool,
                pool_id,
                nslots,
                0,
                stride_bytes,
                pid,
                now_ns,
            );
        }
        Ok(Self {
            region,
            pool_id,
            nslots,
            stride_bytes,
        })
    }

    /// Map an existing payload pool region and validate it.
    pub fn open(region: Region, expected: &ExpectedRegion) -> Result<Self> {
        // SAFETY: region.as_ptr() points to a region created by `create`
        // (possibly in another process), at least SUPERBLOCK_BYTES long.
        let sb = unsafe { Superblock::at(region.as_ptr()) };
        sb.validate(expected)?;
        let nslots = sb.nslots();
        let stride_bytes = sb.stride_bytes();
        let pool_id = sb.pool_id();
        let expected_size = pool_region_size(nslots, stride_bytes);
        if region.size() < expected_size {
            return Err(Error::LayoutMismatch(format!(
                "mapped pool region too small: have {}, need {expected_size}",
                region.size()
            )));
        }
        Ok(Self {
            region,
            pool_id,
            nslots,
            stride_bytes,
        })
    }

    pub fn pool_id(&self) -> u16 {
        self.pool_id
    }

    pub fn nslots(&self) -> u32 {
        self.nslots
    }

    pub fn stride_bytes(&self) -> u32 {
        self.stride_bytes
    }

    pub fn superblock(&self) -> &Superblock {
        // SAFETY: the region was created or opened (and validated) above.
        unsafe { Superblock::at(self.region.as_ptr()) }
    }

    fn slot_offset(&self, slot: u32) -> Result<usize> {
        if slot >= self.nslots {
            return Err(Error::OutOfRange(format!(
                "payload slot {slot} out of range (nslots={})",
                self.nslots
            )));
        }
        Ok(SUPERBLOCK_BYTES + slot as usize * self.stride_bytes as usize)
    }

    /// Borrow a payload slot for writing, starting at `offset` within the
    /// slot and spanning `len` bytes.
    pub fn write_slice(&self, slot: u32, offset: u32, len: u32) -> Result<&mut [u8]> {
        let base = self.slot_offset(slot)?;
        let offset = offset as usize;
        let len = len as usize;
        if offset + len > self.stride_bytes as usize {
            return Err(Error::OutOfRange(format!(
                "payload write [{offset}, {}) exceeds stride {}",
                offset + len,
                self.stride_bytes
            )));
        }
        // SAFETY: base + offset + len <= region.size() by the bounds
        // checks above; single-writer discipline (spec 5) guarantees no
        // concurrent writer for this slot while the producer holds it.
        unsafe {
            let ptr = self.region.as_ptr().add(base + offset);
            Ok(std::slice::from_raw_parts_mut(ptr, len))
        }
    }

    /// Borrow a payload slot for reading, starting at `offset` within the
    /// slot and spanning `len` bytes.
    pub fn read_slice(&self, slot: u32, offset: u32, len: u32) -> Result<&[u8]> {
        let base = self.slot_offset(slot)?;
        let offset = offset as usize;
        let len = len as usize;
        if offset + len > self.stride_bytes as usize {
            return Err(Error::OutOfRange(format!(
                "payload read [{offset}, {}) exceeds stride {}",
                offset + len,
                self.stride_bytes
            )));
        }
        // SAFETY: base + offset + len <= region.size() by the bounds
        // checks above; callers only trust these bytes after the
        // accompanying header slot's seqlock commit has been verified
        // (spec 4.1), matching the read-then-verify protocol.
        unsafe {
            let ptr = self.region.as_ptr().add(base + offset);
            Ok(std::slice::from_raw_parts(ptr, len))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_write_read_roundtrips() {
        let nslots = 4;
        let stride = 64;
        let size = pool_region_size(nslots, stride);
        let region = Region::create_anon("/pool_test_a", size);
        let pool = PayloadPool::create(region, 1, 1, 7, 0, nslots, stride, 100, 0).unwrap();

        let w = pool.write_slice(1, 0, 4).unwrap();
        w.copy_from_slice(&[1, 2, 3, 4]);

        let r = pool.read_slice(1, 0, 4).unwrap();
        assert_eq!(r, &[1, 2, 3, 4]);
    }

    #[test]
    fn out_of_range_slot_rejected() {
        let nslots = 2;
        let stride = 32;
        let size = pool_region_size(nslots, stride);
        let region = Region::create_anon("/pool_test_b", size);
        let pool = PayloadPool::create(region, 1, 1, 7, 0, nslots, stride, 100, 0).unwrap();
        assert!(pool.write_slice(2, 0, 1).is_err());
    }

    #[test]
    fn offset_overrun_rejected() {
        let nslots = 2;
        let stride = 32;
        let size = pool_region_size(nslots, stride);
        let region = Region::create_anon("/pool_test_c", size);
        let pool = PayloadPool::create(region, 1, 1, 7, 0, nslots, stride, 100, 0).unwrap();
        assert!(pool.write_slice(0, 30, 4).is_err());
    }
}
