// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX shared-memory region management.
//!
//! A `Region` owns a single `mmap`ed area backing either a header ring or a
//! payload pool (spec 3, "Region"). The driver creates regions; clients
//! only ever map or unmap them.
//!
//! # Naming convention
//!
//! Region names must start with `/` and contain no other `/`, matching
//! POSIX `shm_open` naming rules.

use std::ffi::CString;
use std::io;
use std::ptr;

use crate::error::{Error, Result};

/// Backing storage for a `Region`. Production code always uses
/// `PosixShm`; tests can swap in `AnonHeap` so the seqlock and codec logic
/// is exercised without requiring `/dev/shm` in the sandbox.
trait RegionBackend: Send + Sync {
    fn as_ptr(&self) -> *mut u8;
    fn size(&self) -> usize;
}

struct PosixShm {
    ptr: *mut u8,
    size: usize,
    name: String,
}

// SAFETY: the mapped region is shared memory intended for concurrent,
// cross-process access; all structures placed in it use atomics for
// synchronization.
unsafe impl Send for PosixShm {}
unsafe impl Sync for PosixShm {}

impl RegionBackend for PosixShm {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }
    fn size(&self) -> usize {
        self.size
    }
}

impl Drop for PosixShm {
    fn drop(&mut self) {
        // SAFETY: self.ptr/self.size come from a successful mmap of exactly
        // this size; Drop runs at most once.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

struct AnonHeap {
    ptr: *mut u8,
    size: usize,
    layout: std::alloc::Layout,
}

// SAFETY: the allocation is exclusively owned by this `AnonHeap` and never
// aliased outside of it except through the `Region`/`RawSlot` access
// patterns that are themselves `Send + Sync` by design (spec 5).
unsafe impl Send for AnonHeap {}
unsafe impl Sync for AnonHeap {}

impl RegionBackend for AnonHeap {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }
    fn size(&self) -> usize {
        self.size
    }
}

impl Drop for AnonHeap {
    fn drop(&mut self) {
        // SAFETY: `self.ptr`/`self.layout` are exactly as returned by the
        // matching `alloc_zeroed` call in `Region::create_anon`.
        unsafe {
            std::alloc::dealloc(self.ptr, self.layout);
        }
    }
}

/// A single mapped shared-memory region.
pub struct Region {
    backend: Box<dyn RegionBackend>,
    name: String,
}

impl Region {
    /// Create a new POSIX shared-memory region, replacing any existing
    /// segment with the same name.
    pub fn create_posix(name: &str, size: usize) -> Result<Self> {
        validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| Error::InvalidArgument(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; shm_unlink is
        // safe to call on a name that does not exist (error ignored);
        // O_CREAT|O_RDWR|O_EXCL either creates a fresh segment or fails.
        let fd = unsafe {
            libc::shm_unlink(c_name.as_ptr());
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };
        if fd < 0 {
            return Err(Error::Internal(format!(
                "shm_open create {name}: {}",
                io::Error::last_os_error()
            )));
        }

        // SAFETY: fd is a valid, just-opened descriptor.
        let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Internal(format!("ftruncate {name}: {err}")));
        }

        let ptr = map_fd(fd, size)?;
        // SAFETY: fd is valid; the mapping now holds its own reference.
        unsafe { libc::close(fd) };

        // SAFETY: ptr/size come from a successful mmap above; no other
        // reference to this freshly created segment exists yet.
        unsafe {
            ptr::write_bytes(ptr, 0, size);
        }

        Ok(Self {
            backend: Box::new(PosixShm {
                ptr,
                size,
                name: name.to_string(),
            }),
            name: name.to_string(),
        })
    }

    /// Open an existing POSIX shared-memory region.
    pub fn open_posix(name: &str, size: usize) -> Result<Self> {
        validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| Error::InvalidArgument(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; O_RDWR opens an
        // existing segment without creating one.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(Error::InvalidArgument(format!("region not found: {name}")));
            }
            return Err(Error::Internal(format!("shm_open open {name}: {err}")));
        }

        let ptr = map_fd(fd, size)?;
        // SAFETY: fd is valid; the mapping now holds its own reference.
        unsafe { libc::close(fd) };

        Ok(Self {
            backend: Box::new(PosixShm {
                ptr,
                size,
                name: name.to_string(),
            }),
            name: name.to_string(),
        })
    }

    /// Create an anonymous, process-local region for tests. Never visible
    /// across processes; exists purely so seqlock/codec tests do not need
    /// `/dev/shm`.
    pub fn create_anon(name: &str, size: usize) -> Self {
        // 64-byte aligned so that `RawSlot`'s `#[repr(C, align(64))]`
        // records (and the superblock) land on valid addresses, matching
        // the alignment `mmap`-backed `PosixShm` regions always provide.
        let layout = std::alloc::Layout::from_size_align(size.max(1), 64)
            .expect("region size does not overflow isize");
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        Self {
            backend: Box::new(AnonHeap { ptr, size, layout }),
            name: name.to_string(),
        }
    }

    /// Unlink (delete) a named POSIX region. Idempotent: unlinking a
    /// nonexistent name is not an error.
    pub fn unlink_posix(name: &str) -> Result<()> {
        let c_name = CString::new(name).map_err(|_| Error::InvalidArgument(name.to_string()))?;
        // SAFETY: c_name is valid; shm_unlink only touches the shm
        // namespace entry, not any live mapping.
        let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(Error::Internal(format!("shm_unlink {name}: {err}")));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.backend.as_ptr()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.backend.size()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn map_fd(fd: libc::c_int, size: usize) -> Result<*mut u8> {
    // SAFETY: fd is a valid descriptor sized to at least `size` bytes by
    // the caller; PROT_READ|PROT_WRITE/MAP_SHARED is the standard
    // cross-process read-write mapping.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        unsafe { libc::close(fd) };
        return Err(Error::Internal(format!("mmap: {}", io::Error::last_os_error())));
    }
    Ok(ptr as *mut u8)
}

fn validate_name(name: &str) -> Result<()> {
    if !name.starts_with('/') {
        return Err(Error::InvalidArgument(format!(
            "region name must start with '/': {name}"
        )));
    }
    if name.len() > 1 && name[1..].contains('/') {
        return Err(Error::InvalidArgument(format!(
            "region name may not contain '/' after the prefix: {name}"
        )));
    }
    if name.len() > 255 {
        return Err(Error::InvalidArgument(format!(
            "region name too long (max 255): {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_rules() {
        assert!(validate_name("/foo").is_ok());
        assert!(validate_name("foo").is_err());
        assert!(validate_name("/foo/bar").is_err());
    }

    #[test]
    fn anon_region_is_zeroed_and_writable() {
        let region = Region::create_anon("/test_anon", 4096);
        assert_eq!(region.size(), 4096);
        // SAFETY: region is 4096 bytes, offset 0 is in bounds.
        unsafe {
            assert_eq!(*region.as_ptr(), 0);
            *region.as_ptr() = 0x42;
            assert_eq!(*region.as_ptr(), 0x42);
        }
    }

    #[test]
    fn posix_create_open_roundtrip() {
        let name = format!("/shmtensor_test_{}", std::process::id());
        let a = Region::create_posix(&name, 4096).expect("create");
        // SAFETY: 4096-byte mapping, offset 0 valid.
        unsafe {
            *a.as_ptr() = 7;
        }
        let b = Region::open_posix(&name, 4096).expect("open");
        // SAFETY: same mapping, offset 0 valid.
        unsafe {
            assert_eq!(*b.as_ptr(), 7);
        }
        drop(a);
        drop(b);
        Region::unlink_posix(&name).ok();
    }
}
