use super::constants::{ALIGNMENT, MAX_ALLOC_SIZE};
use crate::error::AllocError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SizeClass {
    /// Served from the free list at this index. The index times the
    /// alignment is the block size.
    Fast(usize),
    Big,
}

impl SizeClass {
    pub fn round(size: usize) -> Result<usize, AllocError> {
        match size {
            1..=MAX_ALLOC_SIZE => Ok((size + ALIGNMENT - 1) & !(ALIGNMENT - 1)),
            _ => Err(AllocError::BadRequest),
        }
    }

    pub fn get_for_size(size: usize, alloc_fast: usize) -> Result<SizeClass, AllocError> {
        let rounded = Self::round(size)?;

        if rounded <= alloc_fast {
            Ok(SizeClass::Fast(rounded / ALIGNMENT))
        } else {
            Ok(SizeClass::Big)
        }
    }

    pub fn block_size(index: usize) -> usize {
        index * ALIGNMENT
    }

    pub fn class_count(alloc_fast: usize) -> usize {
        alloc_fast / ALIGNMENT + 1
    }
}
