use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Zero sized, or too large to ever be represented as a layout.
    #[error("bad allocation request")]
    BadRequest,
    /// The system allocator refused to back a new chunk and the out of memory
    /// hook returned instead of aborting.
    #[error("out of memory")]
    OOM,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AtomError {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error("no atom exists at that index")]
    UnknownAtom,
    #[error("atom handle refers to a collected atom")]
    Stale,
    #[error("atom reference count underflow")]
    Underflow,
    #[error("blob type `{0}` does not copy its data and needs static bytes")]
    NoCopyNotStatic(String),
    #[error("blob type `{0}` is already registered")]
    BlobExists(String),
    #[error("blob type is not registered")]
    UnknownBlob,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("alloc_fast must be a non zero multiple of {0}")]
    AllocFast(usize),
    #[error("chunk_size must be a multiple of {0} and at least alloc_fast")]
    ChunkSize(usize),
    #[error("atom_buckets must be a power of two")]
    Buckets,
    #[error("local_free_max must be at least 2")]
    LocalFreeMax,
}
