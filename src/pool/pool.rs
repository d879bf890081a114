use super::constants::ALIGNMENT;
use super::free_list::FreeList;
use super::heap::{Heap, Region};
use super::size_class::SizeClass;
use crate::error::AllocError;
use std::ptr::NonNull;
use std::sync::Arc;

/// Size classed free lists plus the region new blocks are carved out of.
///
/// A pool is either owned by a single thread (see [`LocalPool`]) or is the
/// heap's global pool, which is only touched under the heap's lock.
pub struct Pool {
    free_lists: Vec<FreeList>,
    // signed, a block allocated by one pool may be freed into another
    in_use: Vec<isize>,
    space: Option<NonNull<u8>>,
    free: usize,
}

unsafe impl Send for Pool {}

impl Pool {
    pub fn new(alloc_fast: usize) -> Self {
        let classes = SizeClass::class_count(alloc_fast);

        Self {
            free_lists: (0..classes).map(|_| FreeList::new()).collect(),
            in_use: vec![0; classes],
            space: None,
            free: 0,
        }
    }

    pub fn free_count(&self, class: usize) -> usize {
        self.free_lists[class].len()
    }

    pub fn in_use(&self, class: usize) -> isize {
        self.in_use[class]
    }

    pub fn space_left(&self) -> usize {
        self.free
    }

    pub(crate) fn alloc_class(
        &mut self,
        heap: &Heap,
        class: usize,
        is_global: bool,
    ) -> Result<NonNull<u8>, AllocError> {
        let size = SizeClass::block_size(class);
        let block = match self.free_lists[class].pop() {
            Some(block) => block,
            None => match self.carve(size) {
                Some(block) => block,
                None => self.refill(heap, class, is_global)?,
            },
        };

        self.in_use[class] += 1;

        Ok(block)
    }

    /// # Safety
    /// `block` must have come from a pool of the same heap with this class
    /// and must not be used again.
    pub(crate) unsafe fn free_class(&mut self, block: NonNull<u8>, class: usize) {
        self.free_lists[class].push(block);
        self.in_use[class] -= 1;
    }

    pub(crate) fn split_free(&mut self, class: usize, n: usize) -> FreeList {
        self.free_lists[class].split_off(n)
    }

    pub(crate) fn append_free(&mut self, class: usize, list: FreeList) {
        self.free_lists[class].append(list);
    }

    // moves every free block and outstanding count into `other`
    pub(crate) fn drain_into(&mut self, other: &mut Pool) {
        for class in 0..self.free_lists.len() {
            let list = std::mem::take(&mut self.free_lists[class]);

            other.free_lists[class].append(list);
            other.in_use[class] += self.in_use[class];
            self.in_use[class] = 0;
        }
    }

    pub(crate) fn take_space(&mut self) -> Option<Region> {
        let ptr = self.space.take()?;
        let len = std::mem::take(&mut self.free);

        if len == 0 {
            return None;
        }

        Some(Region { ptr, len })
    }

    pub(crate) fn reset(&mut self) {
        for list in self.free_lists.iter_mut() {
            *list = FreeList::new();
        }

        self.in_use.iter_mut().for_each(|count| *count = 0);
        self.space = None;
        self.free = 0;
    }

    fn carve(&mut self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.space?;

        if self.free < size {
            return None;
        }

        unsafe {
            self.space = Some(NonNull::new_unchecked(ptr.as_ptr().add(size)));
        }
        self.free -= size;

        Some(ptr)
    }

    fn refill(
        &mut self,
        heap: &Heap,
        class: usize,
        is_global: bool,
    ) -> Result<NonNull<u8>, AllocError> {
        let size = SizeClass::block_size(class);

        if !is_global {
            let mut batch = heap.take_global_blocks(class);

            if let Some(block) = batch.pop() {
                self.free_lists[class].append(batch);

                return Ok(block);
            }
        }

        if let Some(remainder) = self.retire_space(heap.alloc_fast()) {
            heap.give_left_over(remainder);
        }

        let region = heap.new_space(size)?;

        self.space = Some(region.ptr);
        self.free = region.len;

        self.carve(size).ok_or(AllocError::OOM)
    }

    // A remainder small enough to be a block of its own goes onto that
    // class's free list. Anything bigger is handed back to the caller. A
    // tail shorter than ALIGNMENT is never handed out.
    fn retire_space(&mut self, alloc_fast: usize) -> Option<Region> {
        let mut remainder = self.take_space()?;

        remainder.len -= remainder.len % ALIGNMENT;

        if remainder.len == 0 {
            return None;
        }

        if remainder.len <= alloc_fast {
            match SizeClass::get_for_size(remainder.len, alloc_fast) {
                Ok(SizeClass::Fast(class)) => {
                    unsafe { self.free_lists[class].push(remainder.ptr) };

                    return None;
                }
                _ => return Some(remainder),
            }
        }

        Some(remainder)
    }
}

/// A thread owned pool. Allocation and free touch no lock unless the pool
/// has to refill from, or spill into, the heap's global pool. Dropping a
/// local pool merges everything it holds into the global pool.
pub struct LocalPool {
    pool: Pool,
    heap: Arc<Heap>,
}

impl Drop for LocalPool {
    fn drop(&mut self) {
        self.heap.merge(&mut self.pool);
    }
}

impl LocalPool {
    pub fn new(heap: Arc<Heap>) -> Self {
        Self {
            pool: Pool::new(heap.alloc_fast()),
            heap,
        }
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        match SizeClass::get_for_size(size, self.heap.alloc_fast())? {
            SizeClass::Fast(class) => {
                let block = self.pool.alloc_class(&self.heap, class, false)?;

                self.heap.note_alloc(SizeClass::block_size(class));

                Ok(block)
            }
            SizeClass::Big => self.heap.alloc_big(size),
        }
    }

    /// # Safety
    /// `ptr` must have been returned by an allocation of `size` bytes from a
    /// pool of the same heap and must not be used afterwards.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>, size: usize) {
        match SizeClass::get_for_size(size, self.heap.alloc_fast()) {
            Ok(SizeClass::Fast(class)) => {
                debug_assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);

                self.pool.free_class(ptr, class);
                self.heap.note_free(SizeClass::block_size(class));

                let len = self.pool.free_count(class);

                if len > self.heap.local_free_max() {
                    let spill = self.pool.split_free(class, len / 2);

                    self.heap.give_global_blocks(class, spill);
                }
            }
            Ok(SizeClass::Big) => self.heap.free_big(ptr, size),
            Err(_) => debug_assert!(false, "freed a block with an invalid size"),
        }
    }
}
