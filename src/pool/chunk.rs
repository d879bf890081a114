use super::constants::ALIGNMENT;
use crate::error::AllocError;
use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

/// A single allocation from the system allocator. Either carved up into
/// small blocks or holding one big object.
pub struct Chunk {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for Chunk {}

impl Chunk {
    pub fn layout_for(size: usize) -> Result<Layout, AllocError> {
        Layout::from_size_align(size, ALIGNMENT).map_err(|_| AllocError::BadRequest)
    }

    pub fn new(layout: Layout) -> Result<Chunk, AllocError> {
        Ok(Chunk {
            ptr: Self::alloc_chunk(layout)?,
            layout,
        })
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn get_size(&self) -> usize {
        self.layout.size()
    }

    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.ptr.as_ptr() as usize;
        let addr = ptr as usize;

        start <= addr && addr < start + self.layout.size()
    }

    fn alloc_chunk(layout: Layout) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(layout.size() > 0);

        unsafe { NonNull::new(alloc(layout)).ok_or(AllocError::OOM) }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
