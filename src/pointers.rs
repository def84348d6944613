//! Opaque handles for host objects passed across the boundary by reference.
//!
//! Every `new_pointer` must be paired with exactly one `release_pointer`,
//! and `lookup` must not be used after that release. The table strategy
//! turns violations into `None`; the direct strategy cannot detect them,
//! which is why its release and lookup are `unsafe`.

use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::ConfigError;

/// Arena of slots behind a single lock; handles are slot index + 1.
///
/// Slots are reused without generations, so a stale handle may resolve to
/// a newer object. Handle `0` is never issued.
pub struct HandleMap<T> {
    slots: Mutex<Slots<T>>,
}

struct Slots<T> {
    entries: Vec<Option<T>>,
    free: Vec<usize>,
    live: usize,
}

impl<T> HandleMap<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    fn with_slots<R>(&self, f: impl FnOnce(&mut Slots<T>) -> R) -> R {
        let mut guard = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn new_pointer(&self, value: T) -> u64 {
        self.with_slots(|slots| {
            let index = match slots.free.pop() {
                Some(index) => {
                    slots.entries[index] = Some(value);
                    index
                }
                None => {
                    slots.entries.push(Some(value));
                    slots.entries.len() - 1
                }
            };
            slots.live += 1;
            index as u64 + 1
        })
    }

    pub fn release_pointer(&self, handle: u64) -> Option<T> {
        let index = Self::index(handle)?;
        self.with_slots(|slots| {
            let value = slots.entries.get_mut(index)?.take()?;
            slots.free.push(index);
            slots.live -= 1;
            Some(value)
        })
    }

    /// Runs `f` on the object behind `handle` without changing ownership.
    pub fn with<R>(&self, handle: u64, f: impl FnOnce(&T) -> R) -> Option<R> {
        let index = Self::index(handle)?;
        self.with_slots(|slots| slots.entries.get(index)?.as_ref().map(f))
    }

    pub fn lookup(&self, handle: u64) -> Option<T>
    where
        T: Clone,
    {
        self.with(handle, T::clone)
    }

    pub fn len(&self) -> usize {
        self.with_slots(|slots| slots.live)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index(handle: u64) -> Option<usize> {
        usize::try_from(handle.checked_sub(1)?).ok()
    }
}

impl<T> Default for HandleMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles that are the object's address, backed by `Arc` reference counts.
pub struct DirectPointers<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> DirectPointers<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Retains `value` and returns its address.
    pub fn new_pointer(&self, value: Arc<T>) -> u64 {
        Arc::into_raw(value) as usize as u64
    }

    /// Drops the retain taken by `new_pointer` and returns the object.
    ///
    /// # Safety
    ///
    /// `handle` must come from `new_pointer` on a manager for the same `T`
    /// and must not have been released already.
    pub unsafe fn release_pointer(&self, handle: u64) -> Arc<T> {
        // Safety: guaranteed by the caller.
        unsafe { Arc::from_raw(handle as usize as *const T) }
    }

    /// # Safety
    ///
    /// Same as `release_pointer`; the handle stays valid afterwards.
    pub unsafe fn lookup(&self, handle: u64) -> Arc<T> {
        let ptr = handle as usize as *const T;
        // Safety: guaranteed by the caller; the extra count is owned by the result.
        unsafe {
            Arc::increment_strong_count(ptr);
            Arc::from_raw(ptr)
        }
    }
}

impl<T> Default for DirectPointers<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PointerStrategy {
    /// Object addresses with manual retain/release.
    Direct,
    /// Locked handle table; portable and checks stale handles.
    #[default]
    Table,
}

impl FromStr for PointerStrategy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "table" => Ok(Self::Table),
            _ => Err(ConfigError::InvalidValue {
                key: "WIRECALL_POINTER_STRATEGY",
                value: value.to_string(),
                expected: "direct, table",
            }),
        }
    }
}

/// Either strategy behind one interface.
pub enum PointerManager<T> {
    Direct(DirectPointers<T>),
    Table(HandleMap<Arc<T>>),
}

impl<T> PointerManager<T> {
    pub fn new(strategy: PointerStrategy) -> Self {
        log::debug!(target: "wirecall::pointers", "using {strategy:?} pointer manager");
        match strategy {
            PointerStrategy::Direct => Self::Direct(DirectPointers::new()),
            PointerStrategy::Table => Self::Table(HandleMap::new()),
        }
    }

    pub fn strategy(&self) -> PointerStrategy {
        match self {
            Self::Direct(_) => PointerStrategy::Direct,
            Self::Table(_) => PointerStrategy::Table,
        }
    }

    pub fn new_pointer(&self, value: Arc<T>) -> u64 {
        match self {
            Self::Direct(pointers) => pointers.new_pointer(value),
            Self::Table(map) => map.new_pointer(value),
        }
    }

    /// # Safety
    ///
    /// `handle` must have been issued by this manager and not yet released.
    pub unsafe fn release_pointer(&self, handle: u64) -> Option<Arc<T>> {
        match self {
            // Safety: forwarded from the caller.
            Self::Direct(pointers) => Some(unsafe { pointers.release_pointer(handle) }),
            Self::Table(map) => map.release_pointer(handle),
        }
    }

    /// # Safety
    ///
    /// `handle` must have been issued by this manager and not yet released.
    pub unsafe fn lookup(&self, handle: u64) -> Option<Arc<T>> {
        match self {
            // Safety: forwarded from the caller.
            Self::Direct(pointers) => Some(unsafe { pointers.lookup(handle) }),
            Self::Table(map) => map.lookup(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use rstest::rstest;

    use super::*;

    #[test]
    fn lookup_returns_the_registered_object() {
        let map = HandleMap::new();
        let handle = map.new_pointer("loop".to_string());
        assert_ne!(handle, 0);
        assert_eq!(map.lookup(handle).as_deref(), Some("loop"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn release_removes_the_handle() {
        let map = HandleMap::new();
        let handle = map.new_pointer(7u32);
        assert_eq!(map.release_pointer(handle), Some(7));
        assert_eq!(map.lookup(handle), None);
        assert_eq!(map.release_pointer(handle), None);
        assert!(map.is_empty());
    }

    #[test]
    fn handle_zero_is_never_valid() {
        let map: HandleMap<u8> = HandleMap::new();
        assert_eq!(map.lookup(0), None);
        assert_eq!(map.release_pointer(0), None);
    }

    #[test]
    fn released_slots_are_reused() {
        let map = HandleMap::new();
        let first = map.new_pointer(1);
        map.release_pointer(first);
        assert_eq!(map.new_pointer(2), first);
    }

    #[test]
    fn concurrent_registration_yields_distinct_handles() {
        let map = Arc::new(HandleMap::new());
        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    (0..500)
                        .map(|i| map.new_pointer(worker * 1000 + i))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let handles: Vec<u64> = workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect();
        let unique: HashSet<_> = handles.iter().copied().collect();
        assert_eq!(unique.len(), 4000);
        assert_eq!(map.len(), 4000);
        for handle in handles {
            assert!(map.release_pointer(handle).is_some());
        }
        assert!(map.is_empty());
    }

    #[rstest]
    #[case::direct(PointerStrategy::Direct)]
    #[case::table(PointerStrategy::Table)]
    fn managers_keep_objects_alive_until_release(#[case] strategy: PointerStrategy) {
        let manager = PointerManager::new(strategy);
        assert_eq!(manager.strategy(), strategy);
        let object = Arc::new(vec![1, 2, 3]);
        let handle = manager.new_pointer(Arc::clone(&object));
        assert_eq!(Arc::strong_count(&object), 2);

        let found = unsafe { manager.lookup(handle) }.unwrap();
        assert!(Arc::ptr_eq(&found, &object));
        drop(found);
        assert_eq!(Arc::strong_count(&object), 2);

        let released = unsafe { manager.release_pointer(handle) }.unwrap();
        assert!(Arc::ptr_eq(&released, &object));
        drop(released);
        assert_eq!(Arc::strong_count(&object), 1);
    }

    #[test]
    fn strategy_parses_case_insensitively() {
        assert_eq!("Direct".parse::<PointerStrategy>(), Ok(PointerStrategy::Direct));
        assert_eq!(" table ".parse::<PointerStrategy>(), Ok(PointerStrategy::Table));
        assert!("arena".parse::<PointerStrategy>().is_err());
    }
}
