//! Hierarchical type registry.
//!
//! Format plug-ins register named types under abstract base nodes (one
//! for native images, one for native textures). Types form a tree;
//! lookup searches a subtree so that two plug-in families can use the
//! same short name without clashing. Constructed payloads carry their
//! [`TypeId`], which is how a raster's platform data or a native image
//! handle is mapped back to the codec that owns it.

use std::any::Any;
use std::sync::Arc;

use rastex_core::{Error, Result};

use crate::engine::Engine;

/// Opaque identifier of a registry node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(usize);

/// Type-erased per-instance payload of a constructed object.
pub type Payload = Box<dyn Any + Send + Sync>;

/// Construction interface supplied at type registration.
pub trait TypeInterface: Send + Sync {
    /// Builds a fresh payload for this type.
    fn construct(&self, engine: &Engine) -> Result<Payload>;

    /// Builds a payload that replicates `src`.
    fn clone_payload(&self, engine: &Engine, src: &(dyn Any + Send + Sync)) -> Result<Payload>;
}

struct TypeNode {
    name: String,
    parent: Option<TypeId>,
    interface: Option<Arc<dyn TypeInterface>>,
}

/// The tree of registered types.
///
/// Guarded by the engine's type-system lock; all mutation goes through
/// [`Engine`](crate::engine::Engine) methods.
#[derive(Default)]
pub struct TypeRegistry {
    nodes: Vec<Option<TypeNode>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an abstract node that only serves as a subtree root.
    pub fn register_abstract(&mut self, name: &str, parent: Option<TypeId>) -> Result<TypeId> {
        self.insert(name, parent, None)
    }

    /// Registers a constructible type under `parent`.
    ///
    /// Fails with [`Error::TypeNameConflict`] if `name` already exists
    /// in the subtree rooted at `parent`.
    pub fn register(
        &mut self,
        name: &str,
        interface: Arc<dyn TypeInterface>,
        parent: Option<TypeId>,
    ) -> Result<TypeId> {
        self.insert(name, parent, Some(interface))
    }

    fn insert(
        &mut self,
        name: &str,
        parent: Option<TypeId>,
        interface: Option<Arc<dyn TypeInterface>>,
    ) -> Result<TypeId> {
        if self.find_type_info(name, parent).is_some() {
            return Err(Error::TypeNameConflict(name.to_string()));
        }
        let id = TypeId(self.nodes.len());
        self.nodes.push(Some(TypeNode {
            name: name.to_string(),
            parent,
            interface,
        }));
        Ok(id)
    }

    /// Finds a type by name in the subtree rooted at `base`.
    ///
    /// Names are matched case-sensitively; the search is depth-first
    /// and excludes `base` itself. A `base` of `None` searches the
    /// whole forest.
    pub fn find_type_info(&self, name: &str, base: Option<TypeId>) -> Option<TypeId> {
        for (index, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            let id = TypeId(index);
            if node.name == name && Some(id) != base && self.is_type_under(id, base) {
                return Some(id);
            }
        }
        None
    }

    /// True iff `id` lies in the subtree rooted at `base` (excluding
    /// `base` itself when they are equal). A `base` of `None` accepts
    /// every node.
    pub fn is_type_under(&self, id: TypeId, base: Option<TypeId>) -> bool {
        let Some(base) = base else { return true };
        let mut cursor = self.parent_of(id);
        while let Some(parent) = cursor {
            if parent == base {
                return true;
            }
            cursor = self.parent_of(parent);
        }
        false
    }

    /// Name of a registered node.
    pub fn name_of(&self, id: TypeId) -> Option<&str> {
        self.node(id).map(|n| n.name.as_str())
    }

    /// Parent of a registered node.
    pub fn parent_of(&self, id: TypeId) -> Option<TypeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// The construction interface of a node, if it is constructible.
    pub fn interface_of(&self, id: TypeId) -> Option<Arc<dyn TypeInterface>> {
        self.node(id).and_then(|n| n.interface.clone())
    }

    /// Removes a type from the registry.
    ///
    /// Refuses to remove nodes that still have children.
    pub fn delete_type(&mut self, id: TypeId) -> bool {
        if self.node(id).is_none() {
            return false;
        }
        let has_children = self
            .nodes
            .iter()
            .flatten()
            .any(|n| n.parent == Some(id));
        if has_children {
            return false;
        }
        self.nodes[id.0] = None;
        true
    }

    fn node(&self, id: TypeId) -> Option<&TypeNode> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }
}

/// A constructed instance bundling a payload with its registry node.
pub struct TypedObject {
    type_id: TypeId,
    payload: Payload,
}

impl TypedObject {
    pub(crate) fn new(type_id: TypeId, payload: Payload) -> Self {
        Self { type_id, payload }
    }

    /// The registry node this object was constructed from.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Borrows the type-erased payload.
    pub fn payload(&self) -> &(dyn Any + Send + Sync) {
        self.payload.as_ref()
    }

    /// Mutably borrows the type-erased payload.
    pub fn payload_mut(&mut self) -> &mut (dyn Any + Send + Sync) {
        self.payload.as_mut()
    }

    /// Downcasts the payload to a concrete type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Mutably downcasts the payload to a concrete type.
    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.payload.downcast_mut::<T>()
    }
}
