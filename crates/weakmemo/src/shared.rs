//! Process-wide memo cache keyed first on the wrapped function.
//!
//! A [`SharedCache`] holds one branch per wrapped function. The branch is keyed
//! on the identity of the function's `Arc`, weakly, so once every owner of the
//! function is gone its whole branch becomes reclaimable. Under the function
//! key, branches are split by result type, so wrappers of one function with
//! different result types (say `memoize_arc` and `try_memoize_arc`) never evict
//! each other. [`SharedCache::global`]
//! is created lazily on first use; the free functions in this module operate on
//! it.

use crate::key::{ArgList, Key};
use crate::memoize::evaluate;
use crate::node::CacheNode;
use crate::stats::{MemoStats, StatsSnapshot};
use crate::store::IdentityKeyStore;
use crate::MemoConfig;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

type Branch = Arc<dyn Any + Send + Sync>;

/// Branches of one function, one per result type
type TypedBranches = FxHashMap<TypeId, Branch>;

struct SharedRoot {
    branches: Mutex<IdentityKeyStore<TypedBranches>>,
    config: MemoConfig,
}

static GLOBAL: Lazy<SharedCache> = Lazy::new(|| {
    let config = MemoConfig::from_env().unwrap_or_else(|err| {
        warn!(error = %err, "ignoring memo configuration from environment");
        MemoConfig::default()
    });
    debug!(?config, "initialized global memo cache");
    SharedCache::new(config)
});

/// Handle to a shared memo cache. Clones refer to the same cache.
#[derive(Clone)]
pub struct SharedCache {
    root: Arc<SharedRoot>,
}

impl SharedCache {
    pub fn new(config: MemoConfig) -> Self {
        let branches = IdentityKeyStore::with_sweep_threshold(config.sweep_threshold);
        Self {
            root: Arc::new(SharedRoot {
                branches: Mutex::new(branches),
                config,
            }),
        }
    }

    /// The process-wide cache
    pub fn global() -> SharedCache {
        GLOBAL.clone()
    }

    pub fn config(&self) -> &MemoConfig {
        &self.root.config
    }

    pub fn memoize<A, R, F>(&self, func: F) -> SharedMemoized<A, R, F>
    where
        A: ArgList,
        R: Clone + Send + Sync + 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.memoize_arc(Arc::new(func))
    }

    /// Wrap an already shared function. Wrappers built from the same `Arc`
    /// share one branch, and therefore one set of results.
    pub fn memoize_arc<A, R, F>(&self, func: Arc<F>) -> SharedMemoized<A, R, F>
    where
        A: ArgList,
        R: Clone + Send + Sync + 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        SharedMemoized::new(self.clone(), func)
    }

    pub fn try_memoize<A, T, E, F>(&self, func: F) -> SharedMemoized<A, T, F>
    where
        A: ArgList,
        T: Clone + Send + Sync + 'static,
        F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
    {
        self.try_memoize_arc(Arc::new(func))
    }

    pub fn try_memoize_arc<A, T, E, F>(&self, func: Arc<F>) -> SharedMemoized<A, T, F>
    where
        A: ArgList,
        T: Clone + Send + Sync + 'static,
        F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
    {
        SharedMemoized::new(self.clone(), func)
    }

    /// Drop every result memoized for `func`. Returns false if `func` has no branch.
    pub fn clear_cache<F: Any + Send + Sync>(&self, func: &Arc<F>) -> bool {
        let removed = self.root.branches.lock().delete(&Key::function(func));
        debug!(removed, "cleared memo branch");
        removed
    }

    /// Drop every branch for every function.
    pub fn clear_all(&self) {
        self.root.branches.lock().clear();
        debug!("cleared shared memo cache");
    }

    /// Remove branches of functions that no longer have an owner.
    pub fn purge(&self) -> usize {
        let removed = self.root.branches.lock().purge_stale();
        debug!(removed, "purged shared memo cache");
        removed
    }

    /// Number of functions with a live branch
    pub fn function_count(&self) -> usize {
        self.root.branches.lock().live_len()
    }

    fn branch<R: Send + Sync + 'static>(&self, func_key: &Key) -> Arc<CacheNode<R>> {
        let threshold = self.root.config.sweep_threshold;
        let mut branches = self.root.branches.lock();
        let typed = branches.get_or_insert_with(func_key, TypedBranches::default);
        let erased = typed
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Arc::new(CacheNode::<R>::new(threshold)) as Branch);
        match Arc::clone(erased).downcast::<CacheNode<R>>() {
            Ok(node) => node,
            Err(_) => {
                warn!("replacing memo branch with mismatched result type");
                let node = Arc::new(CacheNode::<R>::new(threshold));
                let fresh: Branch = node.clone();
                *erased = fresh;
                node
            }
        }
    }

    fn find_branch<R: Send + Sync + 'static>(&self, func_key: &Key) -> Option<Arc<CacheNode<R>>> {
        let branches = self.root.branches.lock();
        let existing = branches.get(func_key)?.get(&TypeId::of::<R>())?;
        Arc::clone(existing).downcast::<CacheNode<R>>().ok()
    }
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new(MemoConfig::default())
    }
}

impl fmt::Debug for SharedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCache")
            .field("config", &self.root.config)
            .field("branches", &*self.root.branches.lock())
            .finish()
    }
}

/// A function memoized in a [`SharedCache`]
pub struct SharedMemoized<A, R, F> {
    func: Arc<F>,
    func_key: Key,
    cache: SharedCache,
    stats: MemoStats,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R, F> SharedMemoized<A, R, F>
where
    A: ArgList,
    R: Clone + Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    fn new(cache: SharedCache, func: Arc<F>) -> Self {
        Self {
            func_key: Key::function(&func),
            func,
            cache,
            stats: MemoStats::default(),
            _marker: PhantomData,
        }
    }

    pub fn function(&self) -> &Arc<F> {
        &self.func
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn is_cached(&self, args: &A) -> bool {
        self.cache
            .find_branch::<R>(&self.func_key)
            .and_then(|branch| branch.find(&args.to_keys()))
            .is_some_and(|node| node.is_evaluated())
    }

    /// Drop this function's branch. Same as `cache().clear_cache(function())`.
    pub fn clear(&self) -> bool {
        self.cache.clear_cache(&self.func)
    }

    /// Remove entries of this function whose heap-identity keys are gone.
    pub fn purge(&self) -> usize {
        self.cache
            .find_branch::<R>(&self.func_key)
            .map_or(0, |branch| branch.purge())
    }

    /// Drop the result stored for exactly this argument list.
    pub fn forget(&self, args: &A) -> bool {
        self.cache
            .find_branch::<R>(&self.func_key)
            .is_some_and(|branch| branch.forget(&args.to_keys()))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn stats_sink(&self) -> Option<&MemoStats> {
        self.cache.config().enable_stats.then_some(&self.stats)
    }
}

impl<A, R, F> SharedMemoized<A, R, F>
where
    A: ArgList,
    R: Clone + Send + Sync + 'static,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    pub fn call(&self, args: A) -> R {
        let branch = self.cache.branch::<R>(&self.func_key);
        let func = &self.func;
        match evaluate(&branch, args, self.stats_sink(), |args| {
            Ok::<R, Infallible>(func(args))
        }) {
            Ok(result) => result,
            Err(never) => match never {},
        }
    }

    pub fn as_fn(&self) -> impl Fn(A) -> R + '_ {
        move |args| self.call(args)
    }
}

impl<A, T, E, F> SharedMemoized<A, T, F>
where
    A: ArgList,
    T: Clone + Send + Sync + 'static,
    F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
{
    pub fn try_call(&self, args: A) -> Result<T, E> {
        let branch = self.cache.branch::<T>(&self.func_key);
        let func = &self.func;
        evaluate(&branch, args, self.stats_sink(), |args| func(args))
    }

    pub fn as_try_fn(&self) -> impl Fn(A) -> Result<T, E> + '_ {
        move |args| self.try_call(args)
    }
}

impl<A, R, F> fmt::Debug for SharedMemoized<A, R, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemoized")
            .field("function", &self.func_key)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

/// Memoize `func` in the global cache.
pub fn memoize_shared<A, R, F>(func: F) -> SharedMemoized<A, R, F>
where
    A: ArgList,
    R: Clone + Send + Sync + 'static,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    GLOBAL.memoize(func)
}

pub fn try_memoize_shared<A, T, E, F>(func: F) -> SharedMemoized<A, T, F>
where
    A: ArgList,
    T: Clone + Send + Sync + 'static,
    F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
{
    GLOBAL.try_memoize(func)
}

/// Drop every result the global cache holds for `func`.
pub fn clear_cache<F: Any + Send + Sync>(func: &Arc<F>) -> bool {
    GLOBAL.clear_cache(func)
}

/// Discard the global cache's entire contents. Private caches are unaffected.
pub fn clear_global_cache() {
    GLOBAL.clear_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_add(calls: Arc<AtomicUsize>) -> impl Fn((i32, i32)) -> i32 + Send + Sync + 'static {
        move |(x, y)| {
            calls.fetch_add(1, Ordering::SeqCst);
            x + y
        }
    }

    #[test]
    fn test_shared_wrappers_share_branch() {
        let cache = SharedCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let add = Arc::new(counted_add(calls.clone()));

        let first = cache.memoize_arc(add.clone());
        let second = cache.memoize_arc(add.clone());

        assert_eq!(first.call((1, 2)), 3);
        assert_eq!(second.call((1, 2)), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(second.is_cached(&(1, 2)));
        assert_eq!(cache.function_count(), 1);
    }

    #[test]
    fn test_distinct_functions_have_distinct_branches() {
        let cache = SharedCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let first = cache.memoize(counted_add(calls.clone()));
        let second = cache.memoize(counted_add(calls.clone()));

        first.call((1, 2));
        second.call((1, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.function_count(), 2);
    }

    #[test]
    fn test_clear_cache_reports_presence() {
        let cache = SharedCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let add = cache.memoize(counted_add(calls.clone()));

        // Wrapping alone does not create a branch.
        assert!(!cache.clear_cache(add.function()));

        add.call((2, 2));
        assert!(add.clear());
        assert!(!add.clear());

        add.call((2, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear_all() {
        let cache = SharedCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let add = cache.memoize(counted_add(calls.clone()));

        add.call((1, 1));
        cache.clear_all();
        assert!(!add.is_cached(&(1, 1)));
        add.call((1, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_branch_reclaimed_with_function() {
        let cache = SharedCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let add = cache.memoize(counted_add(calls.clone()));
        add.call((5, 5));
        assert_eq!(cache.function_count(), 1);

        drop(add);
        assert_eq!(cache.function_count(), 0);
        assert_eq!(cache.purge(), 1);
    }

    #[test]
    fn test_fallible_in_shared_cache() {
        let cache = SharedCache::default();
        let parse = cache.try_memoize(|(text,): (String,)| text.parse::<i32>());

        assert!(parse.try_call(("x".to_string(),)).is_err());
        assert!(!parse.is_cached(&("x".to_string(),)));
        assert_eq!(parse.try_call(("42".to_string(),)), Ok(42));
        assert!(parse.is_cached(&("42".to_string(),)));
        assert_eq!(parse.stats().failures, 1);
    }

    #[test]
    fn test_result_types_keep_separate_branches() {
        let cache = SharedCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let func = Arc::new(move |(n,): (u32,)| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<u32, String>(n + 1)
        });

        let plain = cache.memoize_arc(func.clone());
        let fallible = cache.try_memoize_arc(func.clone());

        assert_eq!(plain.call((1,)), Ok(2));
        assert_eq!(fallible.try_call((1,)), Ok(2));
        assert!(plain.is_cached(&(1,)));
        assert!(fallible.is_cached(&(1,)));

        assert_eq!(plain.call((1,)), Ok(2));
        assert_eq!(fallible.try_call((1,)), Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.function_count(), 1);

        assert!(cache.clear_cache(&func));
        assert!(!plain.is_cached(&(1,)));
        assert!(!fallible.is_cached(&(1,)));
    }

    #[test]
    fn test_purge_reclaims_dead_object_key() {
        let cache = SharedCache::default();
        let len = cache.memoize(|(text,): (Arc<String>,)| text.len());

        let text = Arc::new(String::from("shared"));
        assert_eq!(len.call((text.clone(),)), 6);
        assert!(len.is_cached(&(text.clone(),)));

        drop(text);
        assert_eq!(len.purge(), 1);
        assert_eq!(len.purge(), 0);
    }

    #[test]
    fn test_forget_and_as_fn() {
        let cache = SharedCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let add = cache.memoize(counted_add(calls.clone()));

        let sums: Vec<i32> = [(1, 1), (2, 2), (1, 1)]
            .into_iter()
            .map(add.as_fn())
            .collect();
        assert_eq!(sums, vec![2, 4, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(add.forget(&(1, 1)));
        assert!(!add.is_cached(&(1, 1)));
        assert!(add.is_cached(&(2, 2)));
        assert!(!add.forget(&(9, 9)));
    }

    #[test]
    fn test_nested_memoized_calls() {
        let cache = SharedCache::default();
        let double = Arc::new(cache.memoize(|(n,): (u64,)| n * 2));
        let inner = double.clone();
        let quadruple = cache.memoize(move |(n,): (u64,)| inner.call((n,)) * 2);

        assert_eq!(quadruple.call((3,)), 12);
        assert!(double.is_cached(&(3,)));
        assert_eq!(cache.function_count(), 2);
    }
}
