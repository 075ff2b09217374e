use crate::key::ArgList;
use crate::node::CacheNode;
use crate::stats::{MemoStats, StatsSnapshot};
use crate::MemoConfig;
use parking_lot::RwLock;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, trace};

/// A function wrapped with a private argument trie.
///
/// `A` is the argument list (a tuple, or a `Vec` for variadic calls), `R` the
/// cached value and `F` the wrapped function. The function must be pure: for a
/// given argument tuple it is run at most once per cache lifetime, except when
/// concurrent first calls race, in which case each racer runs it and the last
/// result stored wins.
///
/// Heap-identity arguments are held weakly, but the result is held strongly.
/// A result that owns one of its own arguments (`|(p,)| p`, or any value
/// holding a clone of `p`) keeps that argument alive, and [`purge`](Self::purge)
/// cannot reclaim the entry. Drop such entries with [`forget`](Self::forget).
pub struct Memoized<A, R, F> {
    func: F,
    root: RwLock<Arc<CacheNode<R>>>,
    config: MemoConfig,
    stats: MemoStats,
    _args: PhantomData<fn(A)>,
}

/// Wrap `func` so repeated calls with identical arguments reuse the first result.
pub fn memoize<A, R, F>(func: F) -> Memoized<A, R, F>
where
    A: ArgList,
    R: Clone,
    F: Fn(A) -> R,
{
    memoize_with_config(func, MemoConfig::default())
}

pub fn memoize_with_config<A, R, F>(func: F, config: MemoConfig) -> Memoized<A, R, F>
where
    A: ArgList,
    R: Clone,
    F: Fn(A) -> R,
{
    Memoized::new(func, config)
}

/// Wrap a fallible `func`. Only `Ok` values are cached; errors reach the caller
/// unchanged and the next call with the same arguments runs `func` again.
pub fn try_memoize<A, T, E, F>(func: F) -> Memoized<A, T, F>
where
    A: ArgList,
    T: Clone,
    F: Fn(A) -> Result<T, E>,
{
    try_memoize_with_config(func, MemoConfig::default())
}

pub fn try_memoize_with_config<A, T, E, F>(func: F, config: MemoConfig) -> Memoized<A, T, F>
where
    A: ArgList,
    T: Clone,
    F: Fn(A) -> Result<T, E>,
{
    Memoized::new(func, config)
}

impl<A, R, F> Memoized<A, R, F> {
    fn new(func: F, config: MemoConfig) -> Self {
        let root = Arc::new(CacheNode::new(config.sweep_threshold));
        Self {
            func,
            root: RwLock::new(root),
            config,
            stats: MemoStats::default(),
            _args: PhantomData,
        }
    }

    /// Drop every memoized result.
    pub fn clear(&self) {
        *self.root.write() = Arc::new(CacheNode::new(self.config.sweep_threshold));
        debug!("cleared private memo cache");
    }

    /// Remove entries whose heap-identity keys are gone, releasing their branches.
    pub fn purge(&self) -> usize {
        let root = self.root.read().clone();
        let removed = root.purge();
        debug!(removed, "purged private memo cache");
        removed
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &MemoConfig {
        &self.config
    }

    pub fn function(&self) -> &F {
        &self.func
    }
}

impl<A: ArgList, R, F> Memoized<A, R, F> {
    /// Whether a result is stored for exactly this argument list. Does not run `func`.
    pub fn is_cached(&self, args: &A) -> bool {
        let root = self.root.read().clone();
        root.find(&args.to_keys())
            .is_some_and(|node| node.is_evaluated())
    }

    /// Drop the result stored for exactly this argument list.
    pub fn forget(&self, args: &A) -> bool {
        let root = self.root.read().clone();
        let forgotten = root.forget(&args.to_keys());
        debug!(forgotten, "forgot private memo entry");
        forgotten
    }
}

impl<A, R, F> Memoized<A, R, F>
where
    A: ArgList,
    R: Clone,
    F: Fn(A) -> R,
{
    pub fn call(&self, args: A) -> R {
        let root = self.root.read().clone();
        let stats = self.config.enable_stats.then_some(&self.stats);
        match evaluate(&root, args, stats, |args| Ok::<R, Infallible>((self.func)(args))) {
            Ok(result) => result,
            Err(never) => match never {},
        }
    }

    /// Borrow the wrapper as a plain closure, for APIs that take `impl Fn(A) -> R`.
    pub fn as_fn(&self) -> impl Fn(A) -> R + '_ {
        move |args| self.call(args)
    }
}

impl<A, T, E, F> Memoized<A, T, F>
where
    A: ArgList,
    T: Clone,
    F: Fn(A) -> Result<T, E>,
{
    pub fn try_call(&self, args: A) -> Result<T, E> {
        let root = self.root.read().clone();
        let stats = self.config.enable_stats.then_some(&self.stats);
        evaluate(&root, args, stats, |args| (self.func)(args))
    }

    pub fn as_try_fn(&self) -> impl Fn(A) -> Result<T, E> + '_ {
        move |args| self.try_call(args)
    }
}

impl<A, R, F> fmt::Debug for Memoized<A, R, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

/// Walk `root` along the keys of `args` and answer from the terminal node,
/// running `eval` only when that node is unevaluated.
///
/// No lock is held while `eval` runs. An `Err` (or a panic) leaves the node
/// unevaluated.
pub(crate) fn evaluate<A, T, E>(
    root: &Arc<CacheNode<T>>,
    args: A,
    stats: Option<&MemoStats>,
    eval: impl FnOnce(A) -> Result<T, E>,
) -> Result<T, E>
where
    A: ArgList,
    T: Clone,
{
    let keys = args.to_keys();
    let node = root.descend(&keys);

    if let Some(hit) = node.cached() {
        trace!(arity = keys.len(), "memo hit");
        if let Some(stats) = stats {
            stats.record_hit();
        }
        return Ok(hit);
    }

    trace!(arity = keys.len(), "memo miss");
    if let Some(stats) = stats {
        stats.record_miss();
    }

    match eval(args) {
        Ok(result) => {
            node.store(result.clone());
            if let Some(stats) = stats {
                stats.record_evaluation();
            }
            Ok(result)
        }
        Err(err) => {
            debug!(arity = keys.len(), "evaluation failed, result not cached");
            if let Some(stats) = stats {
                stats.record_failure();
            }
            Err(err)
        }
    }
}
