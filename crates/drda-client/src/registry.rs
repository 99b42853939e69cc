//! Generation-checked arena for statements and cursors owned by a session.
//!
//! Handles given to callers hold a [`Key`]; once the slot is removed and
//! reused, stale keys stop resolving instead of aliasing the new entry.

/// Index plus generation into a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
pub struct Registry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value and return its key.
    pub fn insert(&mut self, value: T) -> Key {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Key {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Key {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, key: Key) -> Option<&T> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    #[cfg(test)]
    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Remove a value; the slot's generation is bumped so `key` goes stale.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Snapshot of live keys, in slot order.
    pub fn keys(&self) -> Vec<Key> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(i, slot)| Key {
                index: u32::try_from(i).unwrap_or(u32::MAX),
                generation: slot.generation,
            })
            .collect()
    }

    #[cfg(test)]
    pub fn clear(&mut self) {
        for key in self.keys() {
            self.remove(key);
        }
    }
}

/// Key of a statement in the session's statement registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub(crate) Key);

/// Key of a cursor in the session's cursor registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId(pub(crate) Key);

/// An entry in the commit/rollback listener set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Listener {
    Statement(StatementId),
    Cursor(CursorId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_keys_do_not_resolve() {
        let mut reg = Registry::new();
        let a = reg.insert("a");
        assert_eq!(reg.get(a), Some(&"a"));
        assert_eq!(reg.remove(a), Some("a"));

        let b = reg.insert("b");
        assert_eq!(reg.get(a), None);
        assert_eq!(reg.get(b), Some(&"b"));
        assert_eq!(reg.remove(a), None);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn keys_and_clear() {
        let mut reg = Registry::new();
        let a = reg.insert(1);
        let b = reg.insert(2);
        let c = reg.insert(3);
        reg.remove(b);
        assert_eq!(reg.keys(), vec![a, c]);
        reg.clear();
        assert!(reg.is_empty());
        assert!(!reg.contains(c));
    }
}
