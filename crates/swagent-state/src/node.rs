//! Copy-on-write node wrapper.
//!
//! Every collection of the state tree (and the tree root itself) lives in a
//! [`Node`]. A node is mutable only until it is published. After that any
//! writer must go through [`Node::modify`], which substitutes an unpublished
//! clone into the caller's slot before handing out a mutable reference.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Fields that can be wrapped in a [`Node`].
///
/// Implementors holding child nodes must publish them from
/// [`publish_children`](NodeFields::publish_children) so that publishing the
/// root seals the whole tree.
pub trait NodeFields: Clone {
    fn publish_children(&self) {}
}

pub struct Node<F> {
    fields: F,
    published: AtomicBool,
    generation: u64,
}

impl<F: NodeFields> Node<F> {
    pub fn new(fields: F) -> Self {
        Self {
            fields,
            published: AtomicBool::new(false),
            generation: 0,
        }
    }

    /// Read-only view; valid for as long as the holder keeps the node alive.
    pub fn fields(&self) -> &F {
        &self.fields
    }

    /// Mutable access to an unpublished node.
    ///
    /// # Panics
    ///
    /// Panics if the node has been published. Published nodes are shared with
    /// readers; mutate them through [`Node::modify`] instead.
    pub fn writable_fields(&mut self) -> &mut F {
        assert!(
            !self.is_published(),
            "attempted to mutate published node (generation {})",
            self.generation
        );
        &mut self.fields
    }

    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    /// Number of clone steps between this node and the one it was built from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Seals this node and every unpublished node reachable from it.
    pub fn publish(&self) {
        if !self.published.swap(true, Ordering::AcqRel) {
            self.fields.publish_children();
        }
    }

    /// Returns a mutable reference to the fields held in `slot`, cloning the
    /// node first if it is published or shared with another holder.
    pub fn modify(slot: &mut Arc<Node<F>>) -> &mut F {
        if slot.is_published() {
            *slot = Arc::new(slot.as_ref().clone());
        }
        Arc::make_mut(slot).writable_fields()
    }
}

impl<F: NodeFields> Clone for Node<F> {
    /// Clones into a fresh, unpublished node one generation ahead.
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            published: AtomicBool::new(false),
            generation: self.generation + 1,
        }
    }
}

impl<F: NodeFields + Default> Default for Node<F> {
    fn default() -> Self {
        Node::new(F::default())
    }
}

impl<F: PartialEq> PartialEq for Node<F> {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl<F: fmt::Debug> fmt::Debug for Node<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("generation", &self.generation)
            .field("published", &self.published.load(Ordering::Relaxed))
            .field("fields", &self.fields)
            .finish()
    }
}

impl<F: Serialize> Serialize for Node<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl<'de, F: NodeFields + Deserialize<'de>> Deserialize<'de> for Node<F> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        F::deserialize(deserializer).map(Node::new)
    }
}
