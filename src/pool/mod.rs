mod chunk;
mod chunk_store;
mod constants;
mod free_list;
mod heap;
mod pool;
mod size_class;


pub use constants::{ALIGNMENT, MAX_ALLOC_SIZE};
pub use heap::{Heap, OutOfMemoryHook};
pub use pool::{LocalPool, Pool};
pub use size_class::SizeClass;
