//! Generational arena for reference-counted host objects.

use std::fmt;

use shimrt_core::ObjRef;

use crate::object::HeapObject;

/// Heap storage with generational indices.
///
/// Objects are stored in a Vec with generation tracking. When an object
/// is freed, its slot is reused but the generation is incremented, so stale
/// references are detected instead of aliasing a new object.
pub struct ObjectHeap {
    slots: Vec<HeapSlot>,
    free_list: Vec<u32>,
    live: usize,
}

struct HeapSlot {
    generation: u32,
    value: Option<HeapObject>,
    ref_count: u32,
}

impl ObjectHeap {
    /// Create a new empty object heap.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Allocate a new object with a reference count of one.
    pub fn allocate(&mut self, value: HeapObject) -> ObjRef {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            slot.ref_count = 1;
            ObjRef::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(HeapSlot {
                generation: 0,
                value: Some(value),
                ref_count: 1,
            });
            ObjRef::new(index, 0)
        }
    }

    /// The reference the next allocation will return.
    pub fn next_ref(&self) -> ObjRef {
        match self.free_list.last() {
            Some(&index) => ObjRef::new(index, self.slots[index as usize].generation),
            None => ObjRef::new(self.slots.len() as u32, 0),
        }
    }

    /// Get an object.
    ///
    /// Returns None if the reference is stale.
    pub fn get(&self, obj: ObjRef) -> Option<&HeapObject> {
        let slot = self.slots.get(obj.index as usize)?;
        if slot.generation != obj.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Get an object mutably.
    pub fn get_mut(&mut self, obj: ObjRef) -> Option<&mut HeapObject> {
        let slot = self.slots.get_mut(obj.index as usize)?;
        if slot.generation != obj.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Increment reference count.
    pub fn add_ref(&mut self, obj: ObjRef) -> bool {
        if let Some(slot) = self.slots.get_mut(obj.index as usize)
            && slot.generation == obj.generation
            && slot.value.is_some()
        {
            slot.ref_count = slot.ref_count.saturating_add(1);
            return true;
        }
        false
    }

    /// Decrement reference count.
    ///
    /// Returns the object when this released the last reference; the caller
    /// is responsible for releasing the references it holds.
    pub fn release(&mut self, obj: ObjRef) -> Option<HeapObject> {
        let slot = self.slots.get_mut(obj.index as usize)?;
        if slot.generation != obj.generation || slot.value.is_none() {
            return None;
        }
        slot.ref_count = slot.ref_count.saturating_sub(1);
        if slot.ref_count > 0 {
            return None;
        }
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(obj.index);
        self.live -= 1;
        value
    }

    /// Get the reference count for an object.
    pub fn ref_count(&self, obj: ObjRef) -> Option<u32> {
        let slot = self.slots.get(obj.index as usize)?;
        if slot.generation == obj.generation && slot.value.is_some() {
            Some(slot.ref_count)
        } else {
            None
        }
    }

    /// Number of objects currently alive.
    pub fn live_count(&self) -> usize {
        self.live
    }
}

impl Default for ObjectHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHeap")
            .field("slot_count", &self.slots.len())
            .field("free_count", &self.free_list.len())
            .field("live", &self.live)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Payload;

    fn int(v: i64) -> HeapObject {
        HeapObject::new(ObjRef::new(0, 0), Payload::Int(v))
    }

    #[test]
    fn allocate_and_get() {
        let mut heap = ObjectHeap::new();
        let obj = heap.allocate(int(42));
        assert!(matches!(heap.get(obj).map(|o| &o.payload), Some(Payload::Int(42))));
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn ref_counting() {
        let mut heap = ObjectHeap::new();
        let obj = heap.allocate(int(1));
        assert_eq!(heap.ref_count(obj), Some(1));

        heap.add_ref(obj);
        assert_eq!(heap.ref_count(obj), Some(2));

        assert!(heap.release(obj).is_none());
        assert_eq!(heap.ref_count(obj), Some(1));

        assert!(heap.release(obj).is_some());
        assert_eq!(heap.ref_count(obj), None);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn generational_references() {
        let mut heap = ObjectHeap::new();
        let first = heap.allocate(int(1));
        heap.release(first);

        assert_eq!(heap.next_ref(), ObjRef::new(first.index, first.generation + 1));
        let second = heap.allocate(int(2));
        assert_eq!(second.index, first.index);
        assert!(heap.get(first).is_none());
        assert!(heap.get(second).is_some());
    }

    #[test]
    fn stale_reference_operations() {
        let mut heap = ObjectHeap::new();
        let obj = heap.allocate(int(1));
        heap.release(obj);
        assert!(!heap.add_ref(obj));
        assert!(heap.release(obj).is_none());
        assert!(heap.ref_count(ObjRef::new(999, 0)).is_none());
    }
}
