//! # Handle Registry
//!
//! Process-wide table mapping opaque 64-bit handles to live values
//! (playback sessions in practice).
//!
//! ## Handle Layout
//!
//! ```text
//!  63                    32 31                     0
//! ┌────────────────────────┬────────────────────────┐
//! │   slot generation      │     slot index + 1     │
//! └────────────────────────┴────────────────────────┘
//! ```
//!
//! The low half is never zero, so `0` always means "no session". Removing
//! a value bumps its slot's generation; a stale handle for a reused slot no
//! longer matches and resolves to nothing.
//!
//! ## Construction Outside the Lock
//!
//! [`Registry::insert_with`] reserves a slot, releases the table lock while
//! the value is built (preparing a session opens files and spawns threads)
//! and then fills or abandons the reservation.

use parking_lot::Mutex;
use std::sync::Arc;

/// Opaque value handle. `0` is never allocated.
pub type Handle = u64;

const SLOT_BITS: u32 = 32;
const SLOT_MASK: u64 = (1 << SLOT_BITS) - 1;

enum Slot<T> {
    Vacant,
    Reserved,
    Occupied(Arc<T>),
}

struct Entry<T> {
    generation: u32,
    slot: Slot<T>,
}

struct Table<T> {
    entries: Vec<Entry<T>>,
    free: Vec<usize>,
    live: usize,
}

impl<T> Table<T> {
    fn locate(&self, handle: Handle) -> Option<usize> {
        let low = handle & SLOT_MASK;
        if low == 0 {
            return None;
        }
        let index = (low - 1) as usize;
        let generation = (handle >> SLOT_BITS) as u32;
        let entry = self.entries.get(index)?;
        (entry.generation == generation).then_some(index)
    }

    fn vacate(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        entry.slot = Slot::Vacant;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index);
    }
}

fn encode(index: usize, generation: u32) -> Handle {
    ((generation as u64) << SLOT_BITS) | (index as u64 + 1)
}

/// Generational slab of shared values.
pub struct Registry<T> {
    table: Mutex<Table<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    /// Allocate a handle and store the value `build` makes for it.
    ///
    /// The handle stays reserved, and unresolvable, while `build` runs. On
    /// error the slot is returned to the free list.
    pub fn insert_with<E>(
        &self,
        build: impl FnOnce(Handle) -> Result<T, E>,
    ) -> Result<(Handle, Arc<T>), E> {
        let (index, handle) = {
            let mut table = self.table.lock();
            let index = match table.free.pop() {
                Some(index) => index,
                None => {
                    table.entries.push(Entry {
                        generation: 0,
                        slot: Slot::Vacant,
                    });
                    table.entries.len() - 1
                }
            };
            let entry = &mut table.entries[index];
            entry.slot = Slot::Reserved;
            (index, encode(index, entry.generation))
        };

        match build(handle) {
            Ok(value) => {
                let value = Arc::new(value);
                let mut table = self.table.lock();
                table.entries[index].slot = Slot::Occupied(Arc::clone(&value));
                table.live += 1;
                Ok((handle, value))
            }
            Err(e) => {
                self.table.lock().vacate(index);
                Err(e)
            }
        }
    }

    /// Value behind `handle`, if it is live.
    pub fn get(&self, handle: Handle) -> Option<Arc<T>> {
        let table = self.table.lock();
        let index = table.locate(handle)?;
        match &table.entries[index].slot {
            Slot::Occupied(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Detach the value behind `handle`. Unknown and stale handles yield
    /// `None`.
    pub fn remove(&self, handle: Handle) -> Option<Arc<T>> {
        let mut table = self.table.lock();
        let index = table.locate(handle)?;
        let value = match &table.entries[index].slot {
            Slot::Occupied(value) => Arc::clone(value),
            _ => return None,
        };
        table.vacate(index);
        table.live -= 1;
        Some(value)
    }

    /// Remove every value, returning them for teardown outside the lock.
    pub fn drain(&self) -> Vec<(Handle, Arc<T>)> {
        let mut table = self.table.lock();
        let mut drained = Vec::new();
        for index in 0..table.entries.len() {
            let entry = &mut table.entries[index];
            if let Slot::Occupied(value) = std::mem::replace(&mut entry.slot, Slot::Vacant) {
                drained.push((encode(index, entry.generation), value));
                table.vacate(index);
            }
        }
        table.live = 0;
        drained
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.table.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(registry: &Registry<String>, value: &str) -> Handle {
        let (handle, _) = registry
            .insert_with(|_| Ok::<_, ()>(value.to_string()))
            .unwrap();
        handle
    }

    #[test]
    fn test_handles_are_never_zero() {
        let registry = Registry::new();
        for i in 0..16 {
            let handle = insert(&registry, &i.to_string());
            assert_ne!(handle, 0);
        }
        assert!(registry.get(0).is_none());
        assert!(registry.remove(0).is_none());
    }

    #[test]
    fn test_get_and_remove() {
        let registry = Registry::new();
        let a = insert(&registry, "a");
        let b = insert(&registry, "b");

        assert_eq!(registry.get(a).as_deref().map(String::as_str), Some("a"));
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.remove(a).as_deref().map(String::as_str), Some("a"));
        assert!(registry.get(a).is_none());
        assert!(registry.remove(a).is_none());
        assert_eq!(registry.get(b).as_deref().map(String::as_str), Some("b"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reused_slot_rejects_stale_handle() {
        let registry = Registry::new();
        let first = insert(&registry, "first");
        registry.remove(first);

        let second = insert(&registry, "second");
        assert_eq!(first & SLOT_MASK, second & SLOT_MASK);
        assert_ne!(first, second);

        assert!(registry.get(first).is_none());
        assert!(registry.remove(first).is_none());
        assert_eq!(registry.get(second).as_deref().map(String::as_str), Some("second"));
    }

    #[test]
    fn test_failed_build_frees_slot() {
        let registry: Registry<String> = Registry::new();
        let mut reserved = 0;
        let result = registry.insert_with(|handle| {
            reserved = handle;
            Err::<String, _>("open failed")
        });

        assert_eq!(result.err(), Some("open failed"));
        assert!(registry.get(reserved).is_none());
        assert!(registry.is_empty());

        // the slot comes back under a new generation
        let handle = insert(&registry, "next");
        assert_ne!(handle, reserved);
    }

    #[test]
    fn test_reserved_slot_is_not_resolvable() {
        let registry: Registry<String> = Registry::new();
        let (handle, _) = registry
            .insert_with(|handle| {
                assert!(registry.get(handle).is_none());
                Ok::<_, ()>("built".to_string())
            })
            .unwrap();
        assert!(registry.get(handle).is_some());
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = Registry::new();
        let a = insert(&registry, "a");
        insert(&registry, "b");

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().any(|(h, _)| *h == a));
        assert!(registry.is_empty());
        assert!(registry.get(a).is_none());
    }
}
