//! Fixed-capacity component sets.
//!
//! A `Composition` is a 512-bit set of component type ids. It doubles as an
//! archetype's exact component set and as a query's include/exclude filter,
//! and is the key type of the world's composition → archetype map.

use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};

use crate::component::{ComponentTypeId, MAX_COMPONENT_TYPES};

const WORDS: usize = MAX_COMPONENT_TYPES / 64;

/// A set of component type ids backed by a fixed array of 64-bit words
/// plus a running popcount.
///
/// Equality and hashing depend only on the contained ids, never on the
/// order they were inserted in. `with`/`without` never mutate in place;
/// they return a derived copy.
#[derive(Clone, Copy)]
pub struct Composition {
    words: [u64; WORDS],
    count: u16,
}

impl Composition {
    /// Create an empty composition.
    pub fn new() -> Composition {
        Composition {
            words: [0; WORDS],
            count: 0,
        }
    }

    /// Create a composition from a list of type ids.
    ///
    /// Duplicate ids are ignored.
    pub fn from_type_ids(type_ids: &[ComponentTypeId]) -> Composition {
        let mut composition = Composition::new();
        for &id in type_ids {
            composition.add(id);
        }
        composition
    }

    fn slot(id: ComponentTypeId) -> (usize, u64) {
        let index = id.index();
        assert!(
            index < MAX_COMPONENT_TYPES,
            "component id {index} exceeds the composition capacity of {MAX_COMPONENT_TYPES}"
        );
        (index / 64, 1u64 << (index % 64))
    }

    /// Add a component type id to this set. No-op if already present.
    pub fn add(&mut self, id: ComponentTypeId) {
        let (word, bit) = Self::slot(id);
        if self.words[word] & bit == 0 {
            self.words[word] |= bit;
            self.count += 1;
        }
    }

    /// Remove a component type id from this set. No-op if absent.
    pub fn remove(&mut self, id: ComponentTypeId) {
        let (word, bit) = Self::slot(id);
        if self.words[word] & bit != 0 {
            self.words[word] &= !bit;
            self.count -= 1;
        }
    }

    /// Returns true if this set contains the given id.
    pub fn has(&self, id: ComponentTypeId) -> bool {
        let (word, bit) = Self::slot(id);
        self.words[word] & bit != 0
    }

    /// Return a copy of this set with the given id added.
    pub fn with(&self, id: ComponentTypeId) -> Composition {
        let mut derived = *self;
        derived.add(id);
        derived
    }

    /// Return a copy of this set with the given id removed.
    pub fn without(&self, id: ComponentTypeId) -> Composition {
        let mut derived = *self;
        derived.remove(id);
        derived
    }

    /// Returns true if every id in `other` is also in `self` (self ⊇ other).
    pub fn includes(&self, other: &Composition) -> bool {
        if other.count > self.count {
            return false;
        }
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & b == *b)
    }

    /// Returns true if `self` and `other` share no ids.
    pub fn excludes(&self, other: &Composition) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & b == 0)
    }

    /// Return the number of ids in this set.
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Returns true if this set contains no ids.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Decode the set bits into a sorted, ascending list of type ids.
    pub fn type_ids(&self) -> Vec<ComponentTypeId> {
        let mut ids = Vec::with_capacity(self.count as usize);
        for (block, &word) in self.words.iter().enumerate() {
            let mut value = word;
            while value != 0 {
                let bit = value.trailing_zeros() as usize;
                ids.push(ComponentTypeId::new((block * 64 + bit) as u16));
                value &= !(1u64 << bit);
            }
        }
        ids
    }
}

impl Default for Composition {
    fn default() -> Self {
        Composition::new()
    }
}

impl PartialEq for Composition {
    fn eq(&self, other: &Composition) -> bool {
        // Popcount fast path before the word-wise compare.
        self.count == other.count && self.words == other.words
    }
}

impl Eq for Composition {}

impl Hash for Composition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Polynomial fold of the words, folded high-into-low like the
        // classic 31x hash.
        let mut hash: u64 = 17;
        for &word in &self.words {
            hash = hash.wrapping_mul(31).wrapping_add(word ^ (word >> 32));
        }
        state.write_u64(hash);
    }
}

impl Debug for Composition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.type_ids().iter().map(|id| id.id()))
            .finish()
    }
}
