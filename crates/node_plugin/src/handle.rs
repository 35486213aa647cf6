use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Opaque reference to an entry of a [`HandleTable`].
///
/// The generation changes every time a slot is reused, so an id that
/// outlived its entry never resolves to whatever took its place.
#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct InstanceId {
    index: u32,
    generation: u32,
}

impl InstanceId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slab of values addressed by generation-checked [`InstanceId`]s.
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), len: 0 }
    }

    pub fn insert(&mut self, value: T) -> InstanceId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return InstanceId { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, value: Some(value) });
        InstanceId { index, generation: 0 }
    }

    fn slot(&self, id: InstanceId) -> Option<&Slot<T>> {
        self.slots.get(id.index as usize).filter(|slot| slot.generation == id.generation)
    }

    pub fn get(&self, id: InstanceId) -> Option<&T> {
        self.slot(id)?.value.as_ref()
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.get(id).is_some()
    }

    /// Take the value out. The id, and every copy of it, is stale afterwards.
    pub fn remove(&mut self, id: InstanceId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn ids(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.slots.iter().enumerate().filter(|(_, slot)| slot.value.is_some()).map(|(index, slot)| {
            InstanceId { index: index as u32, generation: slot.generation }
        })
    }

    /// Remove every entry, returning them in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        let ids: Vec<InstanceId> = self.ids().collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}
