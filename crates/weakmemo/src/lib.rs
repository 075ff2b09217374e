//! Memoization of pure functions keyed on their full argument list.
//!
//! Each call walks an argument trie, one [`IdentityKeyStore`] per argument
//! position, to a terminal node that holds the memoized result. Arguments that
//! live on the heap (anything passed as an `Arc`) are compared by identity and
//! held weakly: once the caller drops its last handle, the branch reached
//! through that argument becomes reclaimable. Everything else is compared by
//! value and held strongly.
//!
//! Results are held strongly. A result that owns one of its heap-identity
//! arguments keeps that argument, and so its branch, alive until the entry is
//! dropped with [`Memoized::forget`] or [`SharedMemoized::forget`], or the
//! whole cache is cleared.
//!
//! - [`memoize`] / [`try_memoize`]: one private trie per wrapped function
//! - [`SharedCache`] / [`memoize_shared`]: a cache shared between functions,
//!   branching first on the function itself

pub mod config;
pub mod error;
pub mod key;
pub mod memoize;
mod node;
pub mod shared;
pub mod stats;
pub mod store;

pub use config::MemoConfig;
pub use error::{MemoError, Result};
pub use key::{ArgList, AsKey, FloatKey, HeapRef, Key, KeyKind, Symbol};
pub use memoize::{memoize, memoize_with_config, try_memoize, try_memoize_with_config, Memoized};
pub use shared::{
    clear_cache, clear_global_cache, memoize_shared, try_memoize_shared, SharedCache,
    SharedMemoized,
};
pub use stats::{MemoStats, StatsSnapshot};
pub use store::IdentityKeyStore;
