//! Argument keys and their identity classification.
//!
//! Every argument that reaches a memo trie is lowered to a [`Key`]. The
//! variant decides how the key is stored:
//!
//! - **Value identity** (`Undefined`, `Null`, `Bool`, `Int`, `Float`, `Text`,
//!   `Symbol`): equal when their values are equal. Held strongly.
//! - **Heap identity** (`Object`, `Function`): equal only when they point at the
//!   same allocation. Held weakly, so a cache entry never keeps its key alive.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// How a key participates in equality, and therefore which partition stores it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    HeapIdentity,
    ValueIdentity,
}

/// A single positional argument, as seen by the cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Undefined,
    Null,
    Bool(bool),
    Int(i128),
    Float(FloatKey),
    Text(Arc<str>),
    Symbol(Symbol),
    Object(HeapRef),
    Function(HeapRef),
}

impl Key {
    pub fn kind(&self) -> KeyKind {
        match self {
            Key::Object(_) | Key::Function(_) => KeyKind::HeapIdentity,
            Key::Undefined
            | Key::Null
            | Key::Bool(_)
            | Key::Int(_)
            | Key::Float(_)
            | Key::Text(_)
            | Key::Symbol(_) => KeyKind::ValueIdentity,
        }
    }

    /// Heap reference behind an `Object` or `Function` key
    pub fn heap_ref(&self) -> Option<&HeapRef> {
        match self {
            Key::Object(heap) | Key::Function(heap) => Some(heap),
            _ => None,
        }
    }

    pub fn object<T: Any + Send + Sync>(value: &Arc<T>) -> Self {
        Key::Object(HeapRef::new(value))
    }

    pub fn function<F: Any + Send + Sync>(func: &Arc<F>) -> Self {
        Key::Function(HeapRef::new(func))
    }

    pub fn text(value: impl AsRef<str>) -> Self {
        Key::Text(Arc::from(value.as_ref()))
    }
}

/// Float key with SameValueZero equality: all NaNs are one key and `-0.0 == 0.0`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatKey(u64);

impl FloatKey {
    pub fn new(value: f64) -> Self {
        let normalized = if value.is_nan() {
            f64::NAN
        } else if value == 0.0 {
            0.0
        } else {
            value
        };
        Self(normalized.to_bits())
    }

    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl fmt::Debug for FloatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.value())
    }
}

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

/// Unique token: every call to [`Symbol::new`] yields a key equal only to its own clones.
#[derive(Clone)]
pub struct Symbol {
    id: u64,
    description: Option<Arc<str>>,
}

impl Symbol {
    pub fn new(description: impl AsRef<str>) -> Self {
        Self {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            description: Some(Arc::from(description.as_ref())),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            description: None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(desc) => write!(f, "Symbol({desc})"),
            None => write!(f, "Symbol()"),
        }
    }
}

/// Type-erased strong handle to a shared allocation, compared by address.
#[derive(Clone)]
pub struct HeapRef(Arc<dyn Any + Send + Sync>);

impl HeapRef {
    pub fn new<T: Any + Send + Sync>(value: &Arc<T>) -> Self {
        let erased: Arc<dyn Any + Send + Sync> = value.clone();
        Self(erased)
    }

    pub fn from_erased(value: Arc<dyn Any + Send + Sync>) -> Self {
        Self(value)
    }

    /// Address of the allocation. Stable for as long as any `Arc` or `Weak` to it exists.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn downgrade(&self) -> Weak<dyn Any + Send + Sync> {
        Arc::downgrade(&self.0)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl PartialEq for HeapRef {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for HeapRef {}

impl Hash for HeapRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapRef({:#x})", self.addr())
    }
}

/// Conversion from an argument value to its cache key
pub trait AsKey {
    fn as_key(&self) -> Key;
}

impl<T: AsKey + ?Sized> AsKey for &T {
    fn as_key(&self) -> Key {
        (**self).as_key()
    }
}

impl AsKey for Key {
    fn as_key(&self) -> Key {
        self.clone()
    }
}

impl AsKey for HeapRef {
    fn as_key(&self) -> Key {
        Key::Object(self.clone())
    }
}

impl AsKey for Symbol {
    fn as_key(&self) -> Key {
        Key::Symbol(self.clone())
    }
}

impl AsKey for () {
    fn as_key(&self) -> Key {
        Key::Undefined
    }
}

impl AsKey for bool {
    fn as_key(&self) -> Key {
        Key::Bool(*self)
    }
}

impl AsKey for str {
    fn as_key(&self) -> Key {
        Key::text(self)
    }
}

impl AsKey for String {
    fn as_key(&self) -> Key {
        Key::text(self)
    }
}

impl AsKey for char {
    fn as_key(&self) -> Key {
        let mut buf = [0u8; 4];
        Key::text(self.encode_utf8(&mut buf))
    }
}

impl<T: AsKey> AsKey for Option<T> {
    fn as_key(&self) -> Key {
        match self {
            Some(value) => value.as_key(),
            None => Key::Null,
        }
    }
}

/// Shared values are keyed by allocation, never by content.
impl<T: Any + Send + Sync> AsKey for Arc<T> {
    fn as_key(&self) -> Key {
        Key::object(self)
    }
}

macro_rules! int_as_key {
    ($($ty:ty),*) => {
        $(
            impl AsKey for $ty {
                fn as_key(&self) -> Key {
                    Key::Int(i128::from(*self))
                }
            }
        )*
    };
}

int_as_key!(i8, i16, i32, i64, u8, u16, u32, u64);

impl AsKey for isize {
    fn as_key(&self) -> Key {
        Key::Int(*self as i128)
    }
}

impl AsKey for usize {
    fn as_key(&self) -> Key {
        Key::Int(*self as i128)
    }
}

impl AsKey for f64 {
    fn as_key(&self) -> Key {
        Key::Float(FloatKey::new(*self))
    }
}

impl AsKey for f32 {
    fn as_key(&self) -> Key {
        Key::Float(FloatKey::new(f64::from(*self)))
    }
}

/// An argument list, lowered to the ordered key path used to descend a trie.
///
/// Tuples give fixed-arity calls; `Vec<T>` gives variadic calls whose depth is
/// the number of elements actually passed.
pub trait ArgList {
    fn to_keys(&self) -> Vec<Key>;
}

impl ArgList for () {
    fn to_keys(&self) -> Vec<Key> {
        Vec::new()
    }
}

impl<T: AsKey> ArgList for Vec<T> {
    fn to_keys(&self) -> Vec<Key> {
        self.iter().map(AsKey::as_key).collect()
    }
}

impl<T: AsKey, const N: usize> ArgList for [T; N] {
    fn to_keys(&self) -> Vec<Key> {
        self.iter().map(AsKey::as_key).collect()
    }
}

macro_rules! tuple_arg_list {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: AsKey),+> ArgList for ($($name,)+) {
            fn to_keys(&self) -> Vec<Key> {
                vec![$(self.$idx.as_key()),+]
            }
        }
    };
}

tuple_arg_list!(A: 0);
tuple_arg_list!(A: 0, B: 1);
tuple_arg_list!(A: 0, B: 1, C: 2);
tuple_arg_list!(A: 0, B: 1, C: 2, D: 3);
tuple_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
tuple_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
tuple_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
