//! A pooled heap and an interned atom table with its own concurrent
//! garbage collector.
//!
//! A Runtime owns a heap of size classed pools carved out of large chunks,
//! and an atom table that maps byte strings and typed blobs to small, stable
//! identities. Atoms are kept alive by reference counts taken by foreign
//! code and by the roots each attached thread reports when the collector
//! asks for them.
//! ```rust
//! use tarpit::{Runtime, RootStack, CollectOutcome};
//!
//! let runtime = Runtime::new();
//! let roots = RootStack::new();
//! let mutator = runtime.attach(roots.clone());
//!
//! let hello = mutator.intern_str("hello").unwrap();
//! assert_eq!(mutator.intern_str("hello").unwrap(), hello);
//! assert_eq!(mutator.lookup_str(hello).unwrap(), "hello");
//!
//! // interning hands out a reference, give both back
//! mutator.unregister_atom(hello).unwrap();
//! mutator.unregister_atom(hello).unwrap();
//!
//! // the thread's roots still reach the atom
//! roots.push(hello);
//! assert_eq!(mutator.collect(), CollectOutcome::Collected(0));
//!
//! roots.clear();
//! assert_eq!(mutator.collect(), CollectOutcome::Collected(1));
//! ```
//!
//! Memory can also be taken from the heap directly. The caller passes the
//! size back when freeing, blocks carry no header.
//! ```rust
//! use tarpit::{Runtime, RootStack};
//!
//! let runtime = Runtime::new();
//! let mutator = runtime.attach(RootStack::new());
//! let ptr = mutator.alloc(24).unwrap();
//!
//! unsafe { mutator.free(ptr, 24) };
//! ```

pub mod atom;
pub mod pool;

mod collector;
mod config;
mod error;
mod metrics;
mod monitor;
mod mutator;
mod runtime;

pub use atom::{Atom, AtomTable, BlobFlags, BlobId, BlobType};
pub use collector::{
    Collect, CollectOutcome, Collector, GcState, Marker, RootSet, RootStack, TermGcGuard,
};
pub use config::Config;
pub use error::{AllocError, AtomError, ConfigError};
pub use metrics::Metrics;
pub use monitor::Monitor;
pub use mutator::Mutator;
pub use pool::{Heap, LocalPool};
pub use runtime::Runtime;
