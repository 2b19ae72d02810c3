//! Insertion-ordered mapping storage.

use num_bigint::BigInt;
use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;
use shimrt_core::ObjRef;

/// Hash identity of a key object.
///
/// Byte strings and unicode text with the same contents are the same key,
/// as are equal integers regardless of representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    None,
    Int(i64),
    Long(BigInt),
    Float(OrderedFloat<f64>),
    Str(String),
    Tuple(Vec<DictKey>),
    Identity(ObjRef),
}

/// Mapping storage. Holds one reference to every key and value it contains.
#[derive(Debug, Default)]
pub struct Dict {
    entries: Vec<(ObjRef, ObjRef)>,
    index: FxHashMap<DictKey, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &DictKey) -> Option<ObjRef> {
        self.index.get(key).map(|&slot| self.entries[slot].1)
    }

    /// Insert an entry whose references the caller has already acquired.
    ///
    /// Returns the references the dict stopped holding: on replacement the
    /// original key is kept, so the new key and the old value come back.
    pub fn insert(&mut self, id: DictKey, key: ObjRef, value: ObjRef) -> Option<(ObjRef, ObjRef)> {
        match self.index.get(&id) {
            Some(&slot) => {
                let old = std::mem::replace(&mut self.entries[slot].1, value);
                Some((key, old))
            }
            None => {
                self.index.insert(id, self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Remove an entry, returning the key and value references it held.
    pub fn remove(&mut self, id: &DictKey) -> Option<(ObjRef, ObjRef)> {
        let slot = self.index.remove(id)?;
        let removed = self.entries.remove(slot);
        for position in self.index.values_mut() {
            if *position > slot {
                *position -= 1;
            }
        }
        Some(removed)
    }

    pub fn keys(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    pub fn entries(&self) -> &[(ObjRef, ObjRef)] {
        &self.entries
    }

    /// Every reference held, for release when the owner is freed.
    pub fn collect_refs(&self, out: &mut Vec<ObjRef>) {
        for (k, v) in &self.entries {
            out.push(*k);
            out.push(*v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_order_and_replaces() {
        let mut dict = Dict::new();
        let (k1, v1, k2, v2, v3) = (
            ObjRef::new(1, 0),
            ObjRef::new(2, 0),
            ObjRef::new(3, 0),
            ObjRef::new(4, 0),
            ObjRef::new(5, 0),
        );
        assert!(dict.insert(DictKey::Str("b".into()), k1, v1).is_none());
        assert!(dict.insert(DictKey::Str("a".into()), k2, v2).is_none());

        let dropped = dict.insert(DictKey::Str("b".into()), ObjRef::new(6, 0), v3);
        assert_eq!(dropped, Some((ObjRef::new(6, 0), v1)));
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec![k1, k2]);
        assert_eq!(dict.get(&DictKey::Str("b".into())), Some(v3));
    }

    #[test]
    fn remove_reindexes() {
        let mut dict = Dict::new();
        dict.insert(DictKey::Int(1), ObjRef::new(1, 0), ObjRef::new(2, 0));
        dict.insert(DictKey::Int(2), ObjRef::new(3, 0), ObjRef::new(4, 0));
        assert!(dict.remove(&DictKey::Int(1)).is_some());
        assert_eq!(dict.get(&DictKey::Int(2)), Some(ObjRef::new(4, 0)));
        assert_eq!(dict.len(), 1);
    }
}
