use super::chunk::Chunk;
use super::chunk_store::ChunkStore;
use super::constants::REFILL_BATCH;
use super::free_list::FreeList;
use super::pool::{LocalPool, Pool};
use super::size_class::SizeClass;
use super::constants::ALIGNMENT;
use crate::config::Config;
use crate::error::{AllocError, ConfigError};
use std::alloc::{handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error};

pub type OutOfMemoryHook = Box<dyn Fn(Layout) + Send + Sync>;

/// An unused stretch of a carving chunk.
pub struct Region {
    pub ptr: NonNull<u8>,
    pub len: usize,
}

unsafe impl Send for Region {}

/// The state shared by every pool: the global pool, the regions left over
/// when pools retire their bump space, and the list of every chunk taken
/// from the system allocator.
pub struct Heap {
    global: Mutex<Pool>,
    left_over: Mutex<Vec<Region>>,
    chunks: ChunkStore,
    in_use: AtomicUsize,
    out_of_memory: RwLock<Option<OutOfMemoryHook>>,

    // config vars
    alloc_fast: usize,
    chunk_size: usize,
    local_free_max: usize,
}

impl Heap {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self::build(config))
    }

    // `config` must already be validated
    pub(crate) fn build(config: &Config) -> Self {
        Self {
            global: Mutex::new(Pool::new(config.alloc_fast)),
            left_over: Mutex::new(vec![]),
            chunks: ChunkStore::new(),
            in_use: AtomicUsize::new(0),
            out_of_memory: RwLock::new(None),
            alloc_fast: config.alloc_fast,
            chunk_size: config.chunk_size,
            local_free_max: config.local_free_max,
        }
    }

    /// Creates a pool for the calling thread. Dropping it merges its free
    /// blocks back into the global pool.
    pub fn local_pool(self: &Arc<Self>) -> LocalPool {
        LocalPool::new(self.clone())
    }

    /// Allocates from the global pool. Threads that allocate often should
    /// use a [`LocalPool`] instead, which only takes this lock to refill.
    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        match SizeClass::get_for_size(size, self.alloc_fast)? {
            SizeClass::Fast(class) => {
                let block = self.global.lock().unwrap().alloc_class(self, class, true)?;

                self.note_alloc(SizeClass::block_size(class));

                Ok(block)
            }
            SizeClass::Big => self.alloc_big(size),
        }
    }

    /// # Safety
    /// `ptr` must have been returned by an allocation of `size` bytes from
    /// this heap and must not be used afterwards.
    pub unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        match SizeClass::get_for_size(size, self.alloc_fast) {
            Ok(SizeClass::Fast(class)) => {
                debug_assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);

                self.global.lock().unwrap().free_class(ptr, class);
                self.note_free(SizeClass::block_size(class));
            }
            Ok(SizeClass::Big) => self.free_big(ptr, size),
            Err(_) => debug_assert!(false, "freed a block with an invalid size"),
        }
    }

    /// Replaces the hook run when the system allocator cannot back a new
    /// chunk. If the hook returns, the allocation fails with
    /// [`AllocError::OOM`]. Without a hook the process aborts.
    pub fn set_out_of_memory_hook<F>(&self, hook: F)
    where
        F: Fn(Layout) + Send + Sync + 'static,
    {
        *self.out_of_memory.write().unwrap() = Some(Box::new(hook));
    }

    pub fn alloc_fast(&self) -> usize {
        self.alloc_fast
    }

    pub fn local_free_max(&self) -> usize {
        self.local_free_max
    }

    /// Bytes currently handed out, rounded up to their size class.
    pub fn bytes_in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Bytes held in chunks taken from the system allocator.
    pub fn reserved_bytes(&self) -> usize {
        self.chunks.reserved()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.chunk_count()
    }

    pub fn global_free_count(&self, class: usize) -> usize {
        self.global.lock().unwrap().free_count(class)
    }

    pub fn owns(&self, ptr: *const u8) -> bool {
        self.chunks.owns(ptr)
    }

    /// Releases every chunk regardless of what is still allocated in it.
    ///
    /// # Safety
    /// No pointer handed out by this heap may be used afterwards, and no
    /// [`LocalPool`] of this heap may allocate or free again.
    pub unsafe fn destroy_all(&self) {
        self.global.lock().unwrap().reset();
        self.left_over.lock().unwrap().clear();
        self.chunks.release_all();
        self.in_use.store(0, Ordering::Relaxed);

        debug!("released every chunk of the heap");
    }

    pub(crate) fn note_alloc(&self, size: usize) {
        self.in_use.fetch_add(size, Ordering::Relaxed);
    }

    pub(crate) fn note_free(&self, size: usize) {
        self.in_use.fetch_sub(size, Ordering::Relaxed);
    }

    pub(crate) fn alloc_big(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let rounded = SizeClass::round(size)?;
        let layout = Chunk::layout_for(rounded)?;
        let ptr = match self.chunks.create_big(layout) {
            Ok(ptr) => ptr,
            Err(AllocError::OOM) => return Err(self.out_of_memory(layout)),
            Err(e) => return Err(e),
        };

        self.note_alloc(rounded);

        Ok(ptr)
    }

    pub(crate) fn free_big(&self, ptr: NonNull<u8>, size: usize) {
        match self.chunks.release_big(ptr) {
            Some(released) => {
                debug_assert_eq!(SizeClass::round(size), Ok(released));

                self.note_free(released);
            }
            None => debug_assert!(false, "freed a big object this heap does not own"),
        }
    }

    pub(crate) fn take_global_blocks(&self, class: usize) -> FreeList {
        self.global.lock().unwrap().split_free(class, REFILL_BATCH)
    }

    pub(crate) fn give_global_blocks(&self, class: usize, blocks: FreeList) {
        debug!(class, blocks = blocks.len(), "spilling free blocks to the global pool");

        self.global.lock().unwrap().append_free(class, blocks);
    }

    pub(crate) fn give_left_over(&self, region: Region) {
        self.left_over.lock().unwrap().push(region);
    }

    // a region of at least `min` bytes, reusing a left over region if one is
    // big enough
    pub(crate) fn new_space(&self, min: usize) -> Result<Region, AllocError> {
        {
            let mut left_over = self.left_over.lock().unwrap();

            if let Some(i) = left_over.iter().position(|region| region.len >= min) {
                return Ok(left_over.swap_remove(i));
            }
        }

        let layout = Chunk::layout_for(self.chunk_size.max(min))?;

        match self.chunks.create_carving(layout) {
            Ok(ptr) => {
                debug!(size = layout.size(), "new carving chunk");

                Ok(Region {
                    ptr,
                    len: layout.size(),
                })
            }
            Err(AllocError::OOM) => Err(self.out_of_memory(layout)),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn merge(&self, pool: &mut Pool) {
        let remainder = pool.take_space();

        pool.drain_into(&mut self.global.lock().unwrap());

        if let Some(region) = remainder {
            self.give_left_over(region);
        }
    }

    fn out_of_memory(&self, layout: Layout) -> AllocError {
        match self.out_of_memory.read().unwrap().as_ref() {
            Some(hook) => hook(layout),
            None => {
                error!(size = layout.size(), "system allocator could not back a new chunk");
                handle_alloc_error(layout)
            }
        }

        AllocError::OOM
    }
}
