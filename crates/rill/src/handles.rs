//! Persistent value handles.
//!
//! A handle pins a value beyond the turn that produced it, so callers can
//! inspect it later. Slots are reused through a free list; a disposed slot
//! stays allocated and its index is handed to the next `allocate`, so a
//! caller holding a stale handle either gets a fault or — if the slot was
//! reused — a different value. Callers are expected to dispose promptly.

use std::fmt;

/// Index of a stored value, as seen by remote callers.
pub type Handle = i64;

/// A lookup named a handle that was never allocated or is already disposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleHandleError {
    pub handle: Handle,
}

impl fmt::Display for StaleHandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle {} is disposed or was never allocated", self.handle)
    }
}

impl std::error::Error for StaleHandleError {}

/// Slot store with free-list reuse.
pub struct HandleStore<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> HandleStore<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Stores `value` and returns its handle, reusing the most recently
    /// freed slot when one exists.
    pub fn allocate(&mut self, value: T) -> Handle {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(value);
                index as Handle
            }
            None => {
                self.slots.push(Some(value));
                (self.slots.len() - 1) as Handle
            }
        }
    }

    pub fn get(&self, handle: Handle) -> Result<&T, StaleHandleError> {
        usize::try_from(handle)
            .ok()
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref)
            .ok_or(StaleHandleError { handle })
    }

    /// Frees a slot. Disposing a stale handle is a no-op: disposal races
    /// with session teardown and must never fault.
    pub fn dispose(&mut self, handle: Handle) {
        let Ok(index) = usize::try_from(handle) else {
            return;
        };
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.take().is_some() {
                self.free.push(index);
            }
        }
    }

    /// Drops every stored value and all free-list state.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    /// Number of live (allocated, undisposed) values.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandleStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_get_dispose() {
        let mut store = HandleStore::new();
        let a = store.allocate("alpha");
        let b = store.allocate("beta");
        assert_eq!(store.get(a), Ok(&"alpha"));
        assert_eq!(store.get(b), Ok(&"beta"));
        store.dispose(a);
        assert_eq!(store.get(a), Err(StaleHandleError { handle: a }));
        assert_eq!(store.get(b), Ok(&"beta"));
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut store = HandleStore::new();
        let a = store.allocate(1);
        store.allocate(2);
        store.dispose(a);
        let c = store.allocate(3);
        assert_eq!(c, a);
        assert_eq!(store.get(c), Ok(&3));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn double_dispose_does_not_corrupt_free_list() {
        let mut store = HandleStore::new();
        let a = store.allocate(1);
        store.dispose(a);
        store.dispose(a);
        let b = store.allocate(2);
        let c = store.allocate(3);
        assert_ne!(b, c);
        assert_eq!(store.get(b), Ok(&2));
        assert_eq!(store.get(c), Ok(&3));
    }

    #[test]
    fn negative_and_out_of_range_handles_are_stale() {
        let mut store: HandleStore<i32> = HandleStore::new();
        assert!(store.get(-1).is_err());
        assert!(store.get(99).is_err());
        store.dispose(-1);
        store.dispose(99);
        assert!(store.is_empty());
    }
}
