use crate::key::Key;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::sync::Weak;
use tracing::trace;

pub(crate) const DEFAULT_SWEEP_THRESHOLD: usize = 64;

/// Entry in the weak partition. Holding `key` pins the allocation, so its
/// address cannot be handed out to another value while the slot exists.
struct WeakSlot<V> {
    key: Weak<dyn Any + Send + Sync>,
    value: V,
}

impl<V> WeakSlot<V> {
    fn is_live(&self) -> bool {
        self.key.strong_count() > 0
    }
}

/// Keyed store accepting any [`Key`].
///
/// Heap-identity keys go to a weak partition keyed by allocation address; an
/// entry there stops being visible as soon as the last strong owner of its key
/// is dropped, and is physically removed by the next sweep. Value-identity keys
/// go to a strong partition and live until deleted. Each partition is allocated
/// on first use.
pub struct IdentityKeyStore<V> {
    weak: Option<FxHashMap<usize, WeakSlot<V>>>,
    strong: Option<FxHashMap<Key, V>>,
    sweep_threshold: usize,
    next_sweep_at: usize,
}

impl<V> IdentityKeyStore<V> {
    pub fn new() -> Self {
        Self::with_sweep_threshold(DEFAULT_SWEEP_THRESHOLD)
    }

    pub fn with_sweep_threshold(sweep_threshold: usize) -> Self {
        let sweep_threshold = sweep_threshold.max(1);
        Self {
            weak: None,
            strong: None,
            sweep_threshold,
            next_sweep_at: sweep_threshold,
        }
    }

    /// Insert or overwrite the entry for `key`.
    pub fn set(&mut self, key: Key, value: V) -> &mut Self {
        match key {
            Key::Object(heap) | Key::Function(heap) => {
                self.maybe_sweep();
                let slot = WeakSlot {
                    key: heap.downgrade(),
                    value,
                };
                self.weak
                    .get_or_insert_with(FxHashMap::default)
                    .insert(heap.addr(), slot);
            }
            value_key => {
                self.strong
                    .get_or_insert_with(FxHashMap::default)
                    .insert(value_key, value);
            }
        }
        self
    }

    pub fn get(&self, key: &Key) -> Option<&V> {
        match key.heap_ref() {
            Some(heap) => self
                .weak
                .as_ref()?
                .get(&heap.addr())
                .filter(|slot| slot.is_live())
                .map(|slot| &slot.value),
            None => self.strong.as_ref()?.get(key),
        }
    }

    pub fn get_mut(&mut self, key: &Key) -> Option<&mut V> {
        match key.heap_ref() {
            Some(heap) => self
                .weak
                .as_mut()?
                .get_mut(&heap.addr())
                .filter(|slot| slot.is_live())
                .map(|slot| &mut slot.value),
            None => self.strong.as_mut()?.get_mut(key),
        }
    }

    /// Upsert: return the entry for `key`, inserting `make()` first if absent.
    pub fn get_or_insert_with(&mut self, key: &Key, make: impl FnOnce() -> V) -> &mut V {
        match key.heap_ref() {
            Some(heap) => {
                let addr = heap.addr();
                let present = self
                    .weak
                    .as_ref()
                    .and_then(|weak| weak.get(&addr))
                    .is_some_and(WeakSlot::is_live);
                if !present {
                    self.maybe_sweep();
                }
                let slot = self
                    .weak
                    .get_or_insert_with(FxHashMap::default)
                    .entry(addr)
                    .or_insert_with(|| WeakSlot {
                        key: heap.downgrade(),
                        value: make(),
                    });
                &mut slot.value
            }
            None => self
                .strong
                .get_or_insert_with(FxHashMap::default)
                .entry(key.clone())
                .or_insert_with(make),
        }
    }

    pub fn has(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    /// Remove the entry for `key`; true iff a live entry existed.
    pub fn delete(&mut self, key: &Key) -> bool {
        match key.heap_ref() {
            Some(heap) => self
                .weak
                .as_mut()
                .and_then(|weak| weak.remove(&heap.addr()))
                .is_some_and(|slot| slot.is_live()),
            None => self
                .strong
                .as_mut()
                .and_then(|strong| strong.remove(key))
                .is_some(),
        }
    }

    /// Drop every weak entry whose key has no strong owner left.
    ///
    /// Returns the number of entries removed. Dropping an entry drops its value,
    /// which for trie nodes releases the whole branch beneath it.
    pub fn purge_stale(&mut self) -> usize {
        let Some(weak) = self.weak.as_mut() else {
            return 0;
        };
        let before = weak.len();
        weak.retain(|_, slot| slot.is_live());
        let removed = before - weak.len();
        self.next_sweep_at = self.sweep_threshold.max(weak.len() * 2);
        if removed > 0 {
            trace!(removed, remaining = weak.len(), "purged stale weak entries");
        }
        removed
    }

    fn maybe_sweep(&mut self) {
        let len = self.weak.as_ref().map_or(0, FxHashMap::len);
        if len >= self.next_sweep_at {
            self.purge_stale();
        }
    }

    /// Number of entries whose key is still reachable
    pub fn live_len(&self) -> usize {
        let weak = self
            .weak
            .as_ref()
            .map_or(0, |weak| weak.values().filter(|slot| slot.is_live()).count());
        weak + self.strong.as_ref().map_or(0, FxHashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.live_len() == 0
    }

    /// Values of live entries, weak partition first
    pub fn values(&self) -> impl Iterator<Item = &V> {
        let weak = self
            .weak
            .iter()
            .flat_map(|weak| weak.values())
            .filter(|slot| slot.is_live())
            .map(|slot| &slot.value);
        let strong = self.strong.iter().flat_map(|strong| strong.values());
        weak.chain(strong)
    }

    /// Drop every entry and release both partitions.
    pub fn clear(&mut self) {
        self.weak = None;
        self.strong = None;
        self.next_sweep_at = self.sweep_threshold;
    }

    pub fn has_weak_partition(&self) -> bool {
        self.weak.is_some()
    }

    pub fn has_strong_partition(&self) -> bool {
        self.strong.is_some()
    }
}

impl<V> Default for IdentityKeyStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FromIterator<(Key, V)> for IdentityKeyStore<V> {
    fn from_iter<I: IntoIterator<Item = (Key, V)>>(iter: I) -> Self {
        let mut store = Self::new();
        store.extend(iter);
        store
    }
}

impl<V> Extend<(Key, V)> for IdentityKeyStore<V> {
    fn extend<I: IntoIterator<Item = (Key, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}

impl<V> fmt::Debug for IdentityKeyStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyStore")
            .field("weak", &self.weak.as_ref().map(FxHashMap::len))
            .field("strong", &self.strong.as_ref().map(FxHashMap::len))
            .finish()
    }
}
