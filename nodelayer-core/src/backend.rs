//! Node store abstraction.
//!
//! This module defines the driver interface the unit of work writes through. A store is a
//! hierarchical, path-addressed tree of nodes, each carrying a node type, an optional uuid
//! (for referenceable nodes) and a map of BSON properties.
//!
//! # Overview
//!
//! The [`NodeStore`] trait provides single-node operations only. Nothing about it is
//! transactional across calls: a flush issues a sequence of independent writes and a failure
//! midway leaves the earlier writes in place.
//!
//! # Traits
//!
//! - [`NodeStore`]: The core trait for store drivers
//! - [`NodeStoreBuilder`]: Factory trait for creating store instances

use std::{fmt::Debug, sync::Arc};

use bson::{Bson, Document as Properties};
use uuid::Uuid;

use crate::error::StoreResult;

/// A node as read from or written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    pub path: String,
    pub node_type: String,
    pub uuid: Option<Uuid>,
    pub properties: Properties,
}

impl RawNode {
    pub fn new(path: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            node_type: node_type.into(),
            uuid: None,
            properties: Properties::new(),
        }
    }

    pub fn with_uuid(mut self, uuid: Option<Uuid>) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn property(&self, name: &str) -> Option<&Bson> {
        self.properties.get(name)
    }
}

/// Abstract interface for hierarchical node stores.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a store may be shared by several sessions, while
/// each session drives it from a single thread.
///
/// # Error Handling
///
/// Operations return [`StoreResult<T>`](crate::error::StoreResult). The session surfaces these
/// errors unchanged.
pub trait NodeStore: Send + Sync + Debug {
    /// Reads the node at `path`. A missing node is `Ok(None)`.
    fn read_node(&self, path: &str) -> StoreResult<Option<RawNode>>;

    /// Whether a node exists at `path`.
    fn node_exists(&self, path: &str) -> StoreResult<bool> {
        Ok(self.read_node(path)?.is_some())
    }

    /// Creates a new node.
    ///
    /// Fails with `AlreadyExists` if a node is present at the path, with `ParentNotFound` if
    /// the parent is missing and with `DuplicateUuid` if the uuid is taken.
    fn create_node(&self, node: RawNode) -> StoreResult<()>;

    /// Merges `properties` into the existing node at `path`. A `Null` value removes the
    /// property. Fails with `NotFound` if there is no node.
    fn write_node(&self, path: &str, properties: Properties) -> StoreResult<()>;

    /// Moves the node and its subtree.
    fn move_node(&self, from: &str, to: &str) -> StoreResult<()>;

    /// Removes the node and its subtree.
    fn remove_node(&self, path: &str) -> StoreResult<()>;

    /// Direct children of `path`, in store order.
    fn children(&self, path: &str) -> StoreResult<Vec<RawNode>>;

    /// The node carrying `uuid`, if any.
    fn find_by_uuid(&self, uuid: &Uuid) -> StoreResult<Option<RawNode>>;
}

impl<S> NodeStore for &S
where
    S: NodeStore + ?Sized,
{
    fn read_node(&self, path: &str) -> StoreResult<Option<RawNode>> {
        (**self).read_node(path)
    }

    fn node_exists(&self, path: &str) -> StoreResult<bool> {
        (**self).node_exists(path)
    }

    fn create_node(&self, node: RawNode) -> StoreResult<()> {
        (**self).create_node(node)
    }

    fn write_node(&self, path: &str, properties: Properties) -> StoreResult<()> {
        (**self).write_node(path, properties)
    }

    fn move_node(&self, from: &str, to: &str) -> StoreResult<()> {
        (**self).move_node(from, to)
    }

    fn remove_node(&self, path: &str) -> StoreResult<()> {
        (**self).remove_node(path)
    }

    fn children(&self, path: &str) -> StoreResult<Vec<RawNode>> {
        (**self).children(path)
    }

    fn find_by_uuid(&self, uuid: &Uuid) -> StoreResult<Option<RawNode>> {
        (**self).find_by_uuid(uuid)
    }
}

impl<S> NodeStore for Arc<S>
where
    S: NodeStore + ?Sized,
{
    fn read_node(&self, path: &str) -> StoreResult<Option<RawNode>> {
        (**self).read_node(path)
    }

    fn node_exists(&self, path: &str) -> StoreResult<bool> {
        (**self).node_exists(path)
    }

    fn create_node(&self, node: RawNode) -> StoreResult<()> {
        (**self).create_node(node)
    }

    fn write_node(&self, path: &str, properties: Properties) -> StoreResult<()> {
        (**self).write_node(path, properties)
    }

    fn move_node(&self, from: &str, to: &str) -> StoreResult<()> {
        (**self).move_node(from, to)
    }

    fn remove_node(&self, path: &str) -> StoreResult<()> {
        (**self).remove_node(path)
    }

    fn children(&self, path: &str) -> StoreResult<Vec<RawNode>> {
        (**self).children(path)
    }

    fn find_by_uuid(&self, uuid: &Uuid) -> StoreResult<Option<RawNode>> {
        (**self).find_by_uuid(uuid)
    }
}

impl<S> NodeStore for Box<S>
where
    S: NodeStore + ?Sized,
{
    fn read_node(&self, path: &str) -> StoreResult<Option<RawNode>> {
        (**self).read_node(path)
    }

    fn node_exists(&self, path: &str) -> StoreResult<bool> {
        (**self).node_exists(path)
    }

    fn create_node(&self, node: RawNode) -> StoreResult<()> {
        (**self).create_node(node)
    }

    fn write_node(&self, path: &str, properties: Properties) -> StoreResult<()> {
        (**self).write_node(path, properties)
    }

    fn move_node(&self, from: &str, to: &str) -> StoreResult<()> {
        (**self).move_node(from, to)
    }

    fn remove_node(&self, path: &str) -> StoreResult<()> {
        (**self).remove_node(path)
    }

    fn children(&self, path: &str) -> StoreResult<Vec<RawNode>> {
        (**self).children(path)
    }

    fn find_by_uuid(&self, uuid: &Uuid) -> StoreResult<Option<RawNode>> {
        (**self).find_by_uuid(uuid)
    }
}

/// Factory for store instances.
pub trait NodeStoreBuilder {
    type Store: NodeStore;

    fn build(self) -> StoreResult<Self::Store>;
}
