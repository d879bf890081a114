use super::chunk::Chunk;
use crate::error::AllocError;
use rustc_hash::FxHashMap;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Every chunk the heap has taken from the system allocator. Carving chunks
/// are only released all at once. Big chunks are keyed by their address so a
/// single one can be unlinked when its object is freed.
pub struct ChunkStore {
    carving: Mutex<Vec<Chunk>>,
    big: Mutex<FxHashMap<usize, Chunk>>,
    reserved: AtomicUsize,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self {
            carving: Mutex::new(vec![]),
            big: Mutex::new(FxHashMap::default()),
            reserved: AtomicUsize::new(0),
        }
    }

    pub fn create_carving(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let chunk = Chunk::new(layout)?;
        let ptr = chunk.as_ptr();

        self.reserved.fetch_add(chunk.get_size(), Ordering::Relaxed);
        self.carving.lock().unwrap().push(chunk);

        Ok(ptr)
    }

    pub fn create_big(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let chunk = Chunk::new(layout)?;
        let ptr = chunk.as_ptr();

        self.reserved.fetch_add(chunk.get_size(), Ordering::Relaxed);
        self.big
            .lock()
            .unwrap()
            .insert(ptr.as_ptr() as usize, chunk);

        Ok(ptr)
    }

    // returns the size of the chunk that was released
    pub fn release_big(&self, ptr: NonNull<u8>) -> Option<usize> {
        let chunk = self.big.lock().unwrap().remove(&(ptr.as_ptr() as usize))?;
        let size = chunk.get_size();

        self.reserved.fetch_sub(size, Ordering::Relaxed);

        Some(size)
    }

    pub fn owns(&self, ptr: *const u8) -> bool {
        if self.big.lock().unwrap().contains_key(&(ptr as usize)) {
            return true;
        }

        self.carving
            .lock()
            .unwrap()
            .iter()
            .any(|chunk| chunk.contains(ptr))
    }

    pub fn chunk_count(&self) -> usize {
        self.carving.lock().unwrap().len() + self.big.lock().unwrap().len()
    }

    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Relaxed)
    }

    pub fn release_all(&self) {
        let carving = std::mem::take(&mut *self.carving.lock().unwrap());
        let big = std::mem::take(&mut *self.big.lock().unwrap());

        self.reserved.store(0, Ordering::Relaxed);

        drop(carving);
        drop(big);
    }
}
