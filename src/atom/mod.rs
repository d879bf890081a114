mod blob;
mod handle;
mod hash;
mod table;

pub use blob::{AcquireHook, BlobFlags, BlobId, BlobRegistry, BlobType, ReleaseHook};
pub use handle::Atom;
pub use hash::{bucket_index, hash_bytes};
pub use table::AtomTable;
