//! Base definitions for components.
//!
//! All entities in this crate are built out of components. There is no
//! intrinsic value to an entity. This module defines the `Component` marker
//! trait and the per-world registry which assigns every distinct component
//! type a dense numeric id and records its memory size.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};

use bytemuck::Pod;
use log::warn;

use crate::error::EcsError;

/// The maximum number of distinct component types one registry can assign.
///
/// This matches the bit capacity of [`Composition`](crate::Composition).
pub const MAX_COMPONENT_TYPES: usize = 512;

/// The alignment every component column is padded to inside a chunk.
///
/// Component types with a stricter alignment than this cannot be stored.
pub const COMPONENT_ALIGNMENT: usize = 32;

/// The component trait is implemented on all component types.
///
/// Components are plain, fixed-size, trivially-copyable values: `Pod`
/// guarantees they contain no pointers, padding or droppable resources, so
/// they can live in raw chunk memory and be relocated with byte copies.
pub trait Component: Pod + 'static {}

/// A component type id which is unique for a specific component type
/// within one registry.
///
/// Ids are dense, start at 0 and are never reused for the lifetime of the
/// registry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentTypeId(u16);

impl ComponentTypeId {
    pub(crate) fn new(inner: u16) -> ComponentTypeId {
        ComponentTypeId(inner)
    }

    /// Return the inner dense id.
    pub fn id(&self) -> u16 {
        self.0
    }

    /// Return the inner dense id widened for indexing.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Debug for ComponentTypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

struct ComponentInfo {
    size: usize,
    name: &'static str,
}

/// Assigns dense ids to component types and records their sizes.
///
/// Each `World` owns its own registry, so multiple worlds can coexist in
/// one process (notably in tests) without sharing mutable global state.
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_type: HashMap<TypeId, ComponentTypeId>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> ComponentRegistry {
        ComponentRegistry {
            infos: Vec::new(),
            by_type: HashMap::new(),
        }
    }

    /// Register a component type, assigning the next unused id.
    ///
    /// Registration is idempotent per type: repeated calls return the same
    /// id. Size and alignment are fixed once registered.
    ///
    /// Oversized or oddly-sized components are advisory `warn!`s only; a
    /// zero-sized type or an alignment above [`COMPONENT_ALIGNMENT`] is an
    /// error because neither can be laid out as a packed column.
    pub fn register<T: Component>(&mut self) -> Result<ComponentTypeId, EcsError> {
        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            return Ok(id);
        }

        let size = std::mem::size_of::<T>();
        let align = std::mem::align_of::<T>();
        let name = type_name::<T>();

        if size == 0 {
            return Err(EcsError::UnsupportedComponent {
                name,
                reason: "zero-sized component types are not supported",
            });
        }
        if align > COMPONENT_ALIGNMENT {
            return Err(EcsError::UnsupportedComponent {
                name,
                reason: "alignment exceeds the 32 byte column alignment",
            });
        }
        if self.infos.len() == MAX_COMPONENT_TYPES {
            return Err(EcsError::ComponentCapacity {
                capacity: MAX_COMPONENT_TYPES,
            });
        }

        if !size.is_power_of_two() {
            warn!("component {name} has a size ({size}) that is not a power of two");
        }
        if size > 64 {
            warn!("component {name} is large ({size} bytes); chunk row capacity will suffer");
        }

        let id = ComponentTypeId(self.infos.len() as u16);
        self.infos.push(ComponentInfo { size, name });
        self.by_type.insert(TypeId::of::<T>(), id);
        Ok(id)
    }

    /// Look up the id previously assigned to `T`.
    ///
    /// # Panics
    /// Panics if `T` was never registered; using an unregistered component
    /// type is a programming error.
    pub fn id_of<T: Component>(&self) -> ComponentTypeId {
        match self.by_type.get(&TypeId::of::<T>()) {
            Some(&id) => id,
            None => panic!("component type {} is not registered", type_name::<T>()),
        }
    }

    /// Returns true if `T` has been registered.
    pub fn is_registered<T: Component>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    /// Return the byte size of a registered component type.
    ///
    /// # Panics
    /// Panics if `id` was never issued by this registry.
    pub fn size_of(&self, id: ComponentTypeId) -> usize {
        self.infos[id.index()].size
    }

    /// Return the Rust type name of a registered component type.
    ///
    /// # Panics
    /// Panics if `id` was never issued by this registry.
    pub fn name_of(&self, id: ComponentTypeId) -> &'static str {
        self.infos[id.index()].name
    }

    /// Return the number of registered component types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns true if no component types have been registered.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        ComponentRegistry::new()
    }
}

#[cfg(test)]
mod test {
    use bytemuck::{Pod, Zeroable};

    use super::*;

    #[derive(Debug, Clone, Copy, Pod, Zeroable)]
    #[repr(C)]
    struct A(u32);
    impl Component for A {}

    #[derive(Debug, Clone, Copy, Pod, Zeroable)]
    #[repr(C)]
    struct B(u64);
    impl Component for B {}

    #[test]
    fn register_assigns_dense_ids() {
        let mut registry = ComponentRegistry::new();
        let a = registry.register::<A>().unwrap();
        let b = registry.register::<B>().unwrap();

        assert_eq!(a.id(), 0);
        assert_eq!(b.id(), 1);
        assert_eq!(registry.size_of(a), 4);
        assert_eq!(registry.size_of(b), 8);
    }

    #[test]
    fn register_is_idempotent() {
        let mut registry = ComponentRegistry::new();
        let first = registry.register::<A>().unwrap();
        let second = registry.register::<A>().unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.id_of::<A>(), first);
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn id_of_unregistered_type_panics() {
        let registry = ComponentRegistry::new();
        registry.id_of::<A>();
    }

    #[test]
    fn registries_are_independent() {
        let mut one = ComponentRegistry::new();
        let mut two = ComponentRegistry::new();

        one.register::<A>().unwrap();
        let b_in_two = two.register::<B>().unwrap();

        // Each registry starts numbering from zero.
        assert_eq!(b_in_two.id(), 0);
        assert!(!two.is_registered::<A>());
    }
}
