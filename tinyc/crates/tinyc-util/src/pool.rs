//! The interned string pool.
//!
//! Every source-visible string in a Tiny state flows through one of these
//! pools: identifiers, string literals, type and field names, module names.
//! Interning gives two properties the rest of the system depends on:
//!
//! 1. **Identity**: two pooled strings with equal bytes have equal [`Str`]
//!    handles, so name comparison everywhere else is a u32 compare and
//!    string equality at runtime (`equ_string`) is sound on handles alone.
//! 2. **Lifetime**: entries carry a reference count. Compile-time strings are
//!    inserted with a count of zero and live until the pool is dropped; the
//!    VM retains a string whenever it creates a heap object wrapping it and
//!    releases it when the collector sweeps that object. An entry whose count
//!    returns to zero after having been retained is removed and its storage
//!    freed.
//!
//! The pool is deliberately single-threaded. Multiple VMs may share one pool
//! only if their execution is externally serialized; the pool type is not
//! `Sync` once wrapped in the state's `RefCell`, which encodes exactly that
//! contract.

use rustc_hash::FxHashMap;

use crate::define_idx;
use crate::Idx;

define_idx!(
    /// Handle to an interned string. Equal handles mean equal bytes.
    Str
);

/// One pooled string: its hash, reference count, and bytes.
#[derive(Debug)]
struct Entry {
    hash: u64,
    refs: u32,
    /// True once `retain` has been called at least once; such an entry is
    /// removed when its count returns to zero.
    retained: bool,
    text: Box<str>,
}

/// Interned string pool.
///
/// # Example
///
/// ```
/// use tinyc_util::StringPool;
///
/// let mut pool = StringPool::new();
/// let a = pool.insert("hello");
/// let b = pool.insert("hello");
/// assert_eq!(a, b);
/// assert_eq!(pool.get(a), "hello");
/// ```
#[derive(Debug, Default)]
pub struct StringPool {
    /// Slot table; `None` slots are on the free list.
    entries: Vec<Option<Entry>>,

    /// Recycled slots.
    free: Vec<u32>,

    /// Hash to handles. Buckets are vectors so strings whose 64-bit hashes
    /// collide remain distinct.
    buckets: FxHashMap<u64, Vec<Str>>,

    /// Number of live entries.
    len: usize,
}

impl StringPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live pooled strings.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the pool holds no strings.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Intern `text`, returning its stable handle.
    ///
    /// Returns the existing handle if the exact bytes are already pooled;
    /// otherwise allocates a new entry with a reference count of zero.
    pub fn insert(&mut self, text: &str) -> Str {
        let hash = hash_bytes(text.as_bytes());

        if let Some(bucket) = self.buckets.get(&hash) {
            for &handle in bucket {
                if self.entry(handle).text.as_ref() == text {
                    return handle;
                }
            }
        }

        let entry = Entry {
            hash,
            refs: 0,
            retained: false,
            text: text.into(),
        };

        let handle = match self.free.pop() {
            Some(slot) => {
                self.entries[slot as usize] = Some(entry);
                Str(slot)
            }
            None => {
                self.entries.push(Some(entry));
                Str::from_usize(self.entries.len() - 1)
            }
        };

        self.buckets.entry(hash).or_default().push(handle);
        self.len += 1;

        handle
    }

    /// The bytes behind a handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not refer to a live entry (a stale handle
    /// held past its release).
    pub fn get(&self, handle: Str) -> &str {
        &self.entry(handle).text
    }

    /// Look up a string without interning it.
    pub fn find(&self, text: &str) -> Option<Str> {
        let hash = hash_bytes(text.as_bytes());
        let bucket = self.buckets.get(&hash)?;
        bucket
            .iter()
            .copied()
            .find(|&h| self.entry(h).text.as_ref() == text)
    }

    /// Increment the reference count of a pooled string.
    pub fn retain(&mut self, handle: Str) {
        let entry = self.entry_mut(handle);
        entry.refs += 1;
        entry.retained = true;
    }

    /// Decrement the reference count; frees the entry when a previously
    /// retained string's count returns to zero.
    pub fn release(&mut self, handle: Str) {
        let entry = self.entry_mut(handle);
        debug_assert!(entry.refs > 0, "release of string that was never retained");
        entry.refs = entry.refs.saturating_sub(1);

        if entry.refs == 0 && entry.retained {
            self.remove(handle);
        }
    }

    /// Current reference count (test and introspection hook).
    pub fn ref_count(&self, handle: Str) -> u32 {
        self.entry(handle).refs
    }

    fn remove(&mut self, handle: Str) {
        let entry = self.entries[handle.index()]
            .take()
            .expect("remove of dead pool entry");

        let bucket = self
            .buckets
            .get_mut(&entry.hash)
            .expect("pool bucket missing for live entry");
        bucket.retain(|&h| h != handle);
        if bucket.is_empty() {
            self.buckets.remove(&entry.hash);
        }

        self.free.push(handle.0);
        self.len -= 1;
    }

    fn entry(&self, handle: Str) -> &Entry {
        self.entries[handle.index()]
            .as_ref()
            .expect("stale string pool handle")
    }

    fn entry_mut(&mut self, handle: Str) -> &mut Entry {
        self.entries[handle.index()]
            .as_mut()
            .expect("stale string pool handle")
    }
}

/// FNV-1a over the bytes, with the extra per-byte fold the original hash
/// function applies.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut x: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        x ^= b as u64;
        x = x.wrapping_mul(0x100000001b3);
        x ^= x >> 32;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_same_string_is_identity() {
        let mut pool = StringPool::new();
        let a = pool.insert("hello");
        let b = pool.insert("hello");
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_insert_different_strings() {
        let mut pool = StringPool::new();
        let a = pool.insert("hello");
        let b = pool.insert("world");
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_insert_many_times_does_not_grow() {
        let mut pool = StringPool::new();
        let first = pool.insert("repeated");
        for _ in 0..100 {
            assert_eq!(pool.insert("repeated"), first);
        }
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_get_roundtrip() {
        let mut pool = StringPool::new();
        let h = pool.insert("some text");
        assert_eq!(pool.get(h), "some text");
    }

    #[test]
    fn test_empty_string() {
        let mut pool = StringPool::new();
        let h = pool.insert("");
        assert_eq!(pool.get(h), "");
        assert_eq!(pool.insert(""), h);
    }

    #[test]
    fn test_retain_release_frees_entry() {
        let mut pool = StringPool::new();
        let h = pool.insert("transient");
        pool.retain(h);
        pool.retain(h);
        assert_eq!(pool.ref_count(h), 2);

        pool.release(h);
        assert_eq!(pool.len(), 1);

        pool.release(h);
        assert_eq!(pool.len(), 0);
        assert!(pool.find("transient").is_none());
    }

    #[test]
    fn test_unretained_entry_survives() {
        let mut pool = StringPool::new();
        let h = pool.insert("keyword");
        // Never retained: a compile-time string that lives until the pool
        // is dropped.
        assert_eq!(pool.ref_count(h), 0);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(h), "keyword");
    }

    #[test]
    fn test_slot_reuse_after_free() {
        let mut pool = StringPool::new();
        let h = pool.insert("gone");
        pool.retain(h);
        pool.release(h);

        let h2 = pool.insert("new");
        // The freed slot is recycled.
        assert_eq!(h2.0, h.0);
        assert_eq!(pool.get(h2), "new");
    }

    #[test]
    fn test_reinsert_after_free_gets_fresh_entry() {
        let mut pool = StringPool::new();
        let h = pool.insert("phoenix");
        pool.retain(h);
        pool.release(h);
        assert!(pool.find("phoenix").is_none());

        let h2 = pool.insert("phoenix");
        assert_eq!(pool.get(h2), "phoenix");
    }

    #[test]
    fn test_find() {
        let mut pool = StringPool::new();
        assert!(pool.find("missing").is_none());
        let h = pool.insert("present");
        assert_eq!(pool.find("present"), Some(h));
    }

    #[test]
    fn test_hash_bytes_deterministic() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
    }
}
