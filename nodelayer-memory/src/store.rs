//! In-memory node tree implementing [`NodeStore`].
//!
//! Nodes are kept in a single path-keyed map whose order doubles as sibling order: a created
//! or moved node is appended after its existing siblings.

use std::{collections::HashMap, sync::Arc};

use bson::{Bson, Document as Properties};
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::trace;
use uuid::Uuid;

use nodelayer_core::{
    backend::{NodeStore, NodeStoreBuilder, RawNode},
    error::{StoreError, StoreResult},
    path,
};

/// Node type of the root node.
pub const ROOT_NODE_TYPE: &str = "rep:root";

#[derive(Debug)]
struct Tree {
    nodes: IndexMap<String, RawNode>,
    uuids: HashMap<Uuid, String>,
}

impl Tree {
    fn new(root_node_type: &str) -> Self {
        let mut nodes = IndexMap::new();
        nodes.insert(path::ROOT.to_string(), RawNode::new(path::ROOT, root_node_type));

        Self { nodes, uuids: HashMap::new() }
    }

    /// Paths of `path` and everything below it, in tree order.
    fn subtree(&self, path: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|p| p.as_str() == path || path::is_descendant(p, path))
            .cloned()
            .collect()
    }
}

/// Thread-safe, in-memory hierarchical node store.
///
/// `InMemoryNodeStore` is cloneable; clones share the same tree, so a test can hand one clone
/// to a session and inspect the stored state through another. The root node `/` always
/// exists.
///
/// # Example
///
/// ```ignore
/// use nodelayer_memory::InMemoryNodeStore;
/// use nodelayer::backend::{NodeStore, RawNode};
///
/// let store = InMemoryNodeStore::new();
/// store.create_node(RawNode::new("/functional", "nt:unstructured"))?;
///
/// assert!(store.node_exists("/functional")?);
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryNodeStore {
    tree: Arc<RwLock<Tree>>,
}

impl InMemoryNodeStore {
    /// Creates a store holding only the root node.
    pub fn new() -> Self {
        Self::with_root_type(ROOT_NODE_TYPE)
    }

    fn with_root_type(root_node_type: &str) -> Self {
        Self {
            tree: Arc::new(RwLock::new(Tree::new(root_node_type))),
        }
    }

    pub fn builder() -> InMemoryNodeStoreBuilder {
        InMemoryNodeStoreBuilder::default()
    }

    /// Number of nodes, the root included.
    pub fn len(&self) -> usize {
        self.tree.read().nodes.len()
    }

    /// Whether the store holds nothing but the root.
    pub fn is_empty(&self) -> bool {
        self.len() == 1
    }

    /// All node paths in tree order.
    pub fn paths(&self) -> Vec<String> {
        self.tree.read().nodes.keys().cloned().collect()
    }
}

impl Default for InMemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for InMemoryNodeStore {
    fn read_node(&self, path: &str) -> StoreResult<Option<RawNode>> {
        path::validate(path)?;

        Ok(self.tree.read().nodes.get(path).cloned())
    }

    fn node_exists(&self, path: &str) -> StoreResult<bool> {
        path::validate(path)?;

        Ok(self.tree.read().nodes.contains_key(path))
    }

    fn create_node(&self, node: RawNode) -> StoreResult<()> {
        path::validate(&node.path)?;

        let mut tree = self.tree.write();

        if tree.nodes.contains_key(&node.path) {
            return Err(StoreError::AlreadyExists(node.path));
        }

        match path::parent(&node.path) {
            Some(parent) if tree.nodes.contains_key(parent) => {}
            _ => return Err(StoreError::ParentNotFound(node.path)),
        }

        if let Some(uuid) = node.uuid {
            if tree.uuids.contains_key(&uuid) {
                return Err(StoreError::DuplicateUuid(uuid));
            }
            tree.uuids.insert(uuid, node.path.clone());
        }

        trace!(path = %node.path, node_type = %node.node_type, "created node");
        tree.nodes.insert(node.path.clone(), node);

        Ok(())
    }

    fn write_node(&self, path: &str, properties: Properties) -> StoreResult<()> {
        path::validate(path)?;

        let mut tree = self.tree.write();
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

        for (name, value) in properties {
            match value {
                Bson::Null => {
                    node.properties.remove(&name);
                }
                value => {
                    node.properties.insert(name, value);
                }
            }
        }

        trace!(%path, "wrote node");
        Ok(())
    }

    fn move_node(&self, from: &str, to: &str) -> StoreResult<()> {
        path::validate(from)?;
        path::validate(to)?;

        if from == path::ROOT || path::is_descendant(to, from) {
            return Err(StoreError::InvalidPath(to.to_string()));
        }

        let mut tree = self.tree.write();

        if !tree.nodes.contains_key(from) {
            return Err(StoreError::NotFound(from.to_string()));
        }
        if tree.nodes.contains_key(to) {
            return Err(StoreError::AlreadyExists(to.to_string()));
        }
        match path::parent(to) {
            Some(parent) if tree.nodes.contains_key(parent) => {}
            _ => return Err(StoreError::ParentNotFound(to.to_string())),
        }

        for old_path in tree.subtree(from) {
            let Some(mut node) = tree.nodes.shift_remove(&old_path) else {
                continue;
            };
            let Some(new_path) = path::rebase(&old_path, from, to) else {
                continue;
            };

            if let Some(uuid) = node.uuid {
                tree.uuids.insert(uuid, new_path.clone());
            }

            node.path = new_path.clone();
            tree.nodes.insert(new_path, node);
        }

        trace!(%from, %to, "moved node");
        Ok(())
    }

    fn remove_node(&self, path: &str) -> StoreResult<()> {
        path::validate(path)?;

        if path == path::ROOT {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        let mut tree = self.tree.write();

        if !tree.nodes.contains_key(path) {
            return Err(StoreError::NotFound(path.to_string()));
        }

        for doomed in tree.subtree(path) {
            if let Some(node) = tree.nodes.shift_remove(&doomed) {
                if let Some(uuid) = node.uuid {
                    tree.uuids.remove(&uuid);
                }
            }
        }

        trace!(%path, "removed node");
        Ok(())
    }

    fn children(&self, path: &str) -> StoreResult<Vec<RawNode>> {
        path::validate(path)?;

        let tree = self.tree.read();

        if !tree.nodes.contains_key(path) {
            return Err(StoreError::NotFound(path.to_string()));
        }

        Ok(tree
            .nodes
            .values()
            .filter(|node| path::parent(&node.path) == Some(path))
            .cloned()
            .collect())
    }

    fn find_by_uuid(&self, uuid: &Uuid) -> StoreResult<Option<RawNode>> {
        let tree = self.tree.read();

        Ok(tree
            .uuids
            .get(uuid)
            .and_then(|path| tree.nodes.get(path))
            .cloned())
    }
}

/// Builder for constructing [`InMemoryNodeStore`] instances.
///
/// # Example
///
/// ```ignore
/// use nodelayer_memory::InMemoryNodeStore;
/// use nodelayer::backend::NodeStoreBuilder;
///
/// let store = InMemoryNodeStore::builder().root_node_type("nt:folder").build()?;
/// ```
#[derive(Default)]
pub struct InMemoryNodeStoreBuilder {
    root_node_type: Option<String>,
}

impl InMemoryNodeStoreBuilder {
    pub fn root_node_type(mut self, node_type: impl Into<String>) -> Self {
        self.root_node_type = Some(node_type.into());
        self
    }
}

impl NodeStoreBuilder for InMemoryNodeStoreBuilder {
    type Store = InMemoryNodeStore;

    /// This always succeeds and returns a freshly initialized store.
    fn build(self) -> StoreResult<Self::Store> {
        Ok(InMemoryNodeStore::with_root_type(
            self.root_node_type.as_deref().unwrap_or(ROOT_NODE_TYPE),
        ))
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    fn node(path: &str) -> RawNode {
        RawNode::new(path, "nt:unstructured")
    }

    #[test]
    fn create_requires_parent_and_free_path() {
        let store = InMemoryNodeStore::new();

        store.create_node(node("/a")).unwrap();

        assert_eq!(
            store.create_node(node("/a")),
            Err(StoreError::AlreadyExists("/a".to_string()))
        );
        assert_eq!(
            store.create_node(node("/x/y")),
            Err(StoreError::ParentNotFound("/x/y".to_string()))
        );
    }

    #[test]
    fn write_merges_and_null_removes() {
        let store = InMemoryNodeStore::new();
        store
            .create_node(node("/a").with_properties(doc! { "name": "a", "status": "new" }))
            .unwrap();

        store
            .write_node("/a", doc! { "status": Bson::Null, "title": "t" })
            .unwrap();

        let stored = store.read_node("/a").unwrap().unwrap();
        assert_eq!(stored.properties, doc! { "name": "a", "title": "t" });
        assert_eq!(
            store.write_node("/missing", doc! {}),
            Err(StoreError::NotFound("/missing".to_string()))
        );
    }

    #[test]
    fn move_carries_subtree_and_uuids() {
        let store = InMemoryNodeStore::new();
        let uuid = Uuid::new_v4();
        store.create_node(node("/a")).unwrap();
        store.create_node(node("/a/b").with_uuid(Some(uuid))).unwrap();
        store.create_node(node("/c")).unwrap();

        store.move_node("/a", "/c/a").unwrap();

        assert!(!store.node_exists("/a").unwrap());
        assert!(store.node_exists("/c/a/b").unwrap());
        assert_eq!(store.find_by_uuid(&uuid).unwrap().unwrap().path, "/c/a/b");
        assert!(store.move_node("/c", "/c/a/x").is_err());
    }

    #[test]
    fn remove_drops_subtree() {
        let store = InMemoryNodeStore::new();
        let uuid = Uuid::new_v4();
        store.create_node(node("/a")).unwrap();
        store.create_node(node("/a/b").with_uuid(Some(uuid))).unwrap();

        store.remove_node("/a").unwrap();

        assert!(store.is_empty());
        assert!(store.find_by_uuid(&uuid).unwrap().is_none());
        assert!(store.remove_node("/").is_err());
    }

    #[test]
    fn children_keep_insertion_order() {
        let store = InMemoryNodeStore::new();
        for path in ["/p", "/p/z", "/p/a", "/p/z/deep", "/p/m"] {
            store.create_node(node(path)).unwrap();
        }

        let names = store
            .children("/p")
            .unwrap()
            .into_iter()
            .map(|n| n.path)
            .collect::<Vec<_>>();

        assert_eq!(names, vec!["/p/z", "/p/a", "/p/m"]);
    }

    #[test]
    fn clones_share_the_tree() {
        let store = InMemoryNodeStore::builder().build().unwrap();
        let other = store.clone();

        store.create_node(node("/shared")).unwrap();

        assert!(other.node_exists("/shared").unwrap());
        assert_eq!(other.read_node("/").unwrap().unwrap().node_type, ROOT_NODE_TYPE);
    }
}
