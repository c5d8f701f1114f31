//! Host-addressable arena memory
//!
//! A [`HostRegion`] is shared by the control thread, the I/O workers and the
//! host backend without a lock. Exclusive access to any byte range is
//! guaranteed by the executor's fence protocol, which is why the accessors
//! are `unsafe`.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{PipelineError, Result};

/// Page-aligned, zero-initialised host memory owned by one arena
pub struct HostRegion {
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
}

// SAFETY: the region is plain bytes; concurrent access to disjoint ranges is
// sound, and overlapping access is ruled out by the fence protocol.
unsafe impl Send for HostRegion {}
unsafe impl Sync for HostRegion {}

impl HostRegion {
    const ALIGN: usize = 4096;

    /// Allocate `len` zeroed bytes
    pub fn new(len: u64) -> Result<Arc<Self>> {
        let len = usize::try_from(len)
            .map_err(|_| PipelineError::Allocation(format!("host region of {} bytes exceeds address space", len)))?;
        let layout = Layout::from_size_align(len.max(1), Self::ALIGN)
            .map_err(|e| PipelineError::Allocation(format!("invalid host region layout: {}", e)))?;

        // SAFETY: layout has non-zero size
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| PipelineError::Allocation(format!("out of host memory allocating {} bytes", len)))?;

        Ok(Arc::new(Self { ptr, layout, len }))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, offset: u64, len: u64) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len as u64),
            "host span {}..{} outside region of {} bytes",
            offset,
            offset.saturating_add(len),
            self.len
        );
    }

    /// Shared view of `offset..offset + len`
    ///
    /// # Safety
    ///
    /// No other thread may write the range while the slice is alive.
    pub unsafe fn slice(&self, offset: u64, len: u64) -> &[u8] {
        self.check(offset, len);
        std::slice::from_raw_parts(self.ptr.as_ptr().add(offset as usize), len as usize)
    }

    /// Exclusive view of `offset..offset + len`
    ///
    /// # Safety
    ///
    /// No other thread may read or write the range while the slice is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, offset: u64, len: u64) -> &mut [u8] {
        self.check(offset, len);
        std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset as usize), len as usize)
    }
}

impl Drop for HostRegion {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for HostRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRegion").field("len", &self.len).finish()
    }
}

/// A byte range of a host region, cheap to clone and send to I/O workers
#[derive(Debug, Clone)]
pub struct HostSpan {
    region: Arc<HostRegion>,
    offset: u64,
    len: u64,
}

impl HostSpan {
    /// Span over `offset..offset + len`; panics if it leaves the region
    pub fn new(region: Arc<HostRegion>, offset: u64, len: u64) -> Self {
        region.check(offset, len);
        Self { region, offset, len }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    ///
    /// See [`HostRegion::slice`].
    pub unsafe fn as_slice(&self) -> &[u8] {
        self.region.slice(self.offset, self.len)
    }

    /// # Safety
    ///
    /// See [`HostRegion::slice_mut`].
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        self.region.slice_mut(self.offset, self.len)
    }

    /// Copy the span out
    ///
    /// # Safety
    ///
    /// No in-flight I/O or device work may write the span.
    pub unsafe fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}
