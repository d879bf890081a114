use std::mem::size_of;

// every block handed out is aligned to, and a multiple of, two machine words
pub const ALIGNMENT: usize = 2 * size_of::<usize>();

pub const MAX_ALLOC_SIZE: usize = isize::MAX as usize - (ALIGNMENT - 1);

// the most blocks a thread pulls off a global free list in one go
pub const REFILL_BATCH: usize = 64;
