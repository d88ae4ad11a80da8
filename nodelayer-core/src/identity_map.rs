//! Per-session cache enforcing one live instance per identity.

use std::collections::HashMap;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::{
    document::{DocumentHandle, Oid},
    path,
};

/// Maps document paths to their single live instance.
///
/// Iteration follows registration order so that change computation visits documents
/// deterministically. Secondary indexes by [`Oid`] and by uuid are kept in step.
#[derive(Debug, Default)]
pub struct IdentityMap {
    by_id: IndexMap<String, DocumentHandle>,
    by_oid: HashMap<Oid, String>,
    by_uuid: HashMap<Uuid, String>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&DocumentHandle> {
        self.by_id.get(id)
    }

    pub fn get_by_oid(&self, oid: Oid) -> Option<&DocumentHandle> {
        self.by_oid.get(&oid).and_then(|id| self.by_id.get(id))
    }

    pub fn get_by_uuid(&self, uuid: &Uuid) -> Option<&DocumentHandle> {
        self.by_uuid.get(uuid).and_then(|id| self.by_id.get(id))
    }

    /// The id under which the instance is registered.
    pub fn id_of(&self, oid: Oid) -> Option<&str> {
        self.by_oid.get(&oid).map(String::as_str)
    }

    pub fn contains(&self, document: &DocumentHandle) -> bool {
        self.by_oid.contains_key(&document.oid())
    }

    /// Registers `document` under `id`, replacing whatever was registered there.
    pub fn put(&mut self, id: impl Into<String>, document: DocumentHandle) {
        let id = id.into();

        if let Some(previous) = self.by_id.get(&id).cloned() {
            self.remove_entry(&id, &previous);
        }

        self.by_oid.insert(document.oid(), id.clone());
        if let Some(uuid) = document.uuid() {
            self.by_uuid.insert(uuid, id.clone());
        }
        self.by_id.insert(id, document);
    }

    pub fn remove(&mut self, id: &str) -> Option<DocumentHandle> {
        let document = self.by_id.get(id).cloned()?;
        self.remove_entry(id, &document);

        Some(document)
    }

    pub fn remove_document(&mut self, document: &DocumentHandle) -> bool {
        match self.by_oid.get(&document.oid()).cloned() {
            Some(id) => self.remove(&id).is_some(),
            None => false,
        }
    }

    fn remove_entry(&mut self, id: &str, document: &DocumentHandle) {
        self.by_id.shift_remove(id);
        self.by_oid.remove(&document.oid());
        self.by_uuid.retain(|_, mapped| mapped.as_str() != id);
    }

    /// Drops every entry. Instances held elsewhere become detached.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_oid.clear();
        self.by_uuid.clear();
    }

    /// Re-registers every entry at or below `from` under `to`, updating the documents' ids.
    /// Returns the affected documents.
    pub fn rekey(&mut self, from: &str, to: &str) -> Vec<DocumentHandle> {
        let affected = self
            .by_id
            .keys()
            .filter_map(|id| path::rebase(id, from, to).map(|new_id| (id.clone(), new_id)))
            .collect::<Vec<_>>();

        let mut moved = Vec::with_capacity(affected.len());

        for (old_id, new_id) in affected {
            if let Some(document) = self.remove(&old_id) {
                document.borrow_mut().set_id(new_id.clone());
                self.put(new_id, document.clone());
                moved.push(document);
            }
        }

        moved
    }

    /// Registered documents at `path` or below it.
    pub fn subtree(&self, path: &str) -> Vec<DocumentHandle> {
        self.by_id
            .iter()
            .filter(|(id, _)| id.as_str() == path || path::is_descendant(id, path))
            .map(|(_, document)| document.clone())
            .collect()
    }

    pub fn handles(&self) -> Vec<DocumentHandle> {
        self.by_id.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn doc(id: &str) -> DocumentHandle {
        Document::new("Page").with_id(id).into_handle()
    }

    #[test]
    fn one_instance_per_identity() {
        let mut map = IdentityMap::new();
        let first = doc("/a");
        let second = doc("/a");

        map.put("/a", first.clone());
        assert!(map.get("/a").unwrap().ptr_eq(&first));

        map.put("/a", second.clone());
        assert!(map.get("/a").unwrap().ptr_eq(&second));
        assert!(!map.contains(&first));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn clear_orphans_held_instances() {
        let mut map = IdentityMap::new();
        let held = doc("/a");
        map.put("/a", held.clone());

        map.clear();

        assert!(map.get("/a").is_none());
        assert!(!map.contains(&held));
    }

    #[test]
    fn rekey_moves_subtree() {
        let mut map = IdentityMap::new();
        let parent = doc("/a");
        let child = doc("/a/b");
        let sibling = doc("/ab");
        map.put("/a", parent.clone());
        map.put("/a/b", child.clone());
        map.put("/ab", sibling.clone());

        let moved = map.rekey("/a", "/x");

        assert_eq!(moved.len(), 2);
        assert!(map.get("/x/b").unwrap().ptr_eq(&child));
        assert_eq!(child.id().as_deref(), Some("/x/b"));
        assert!(map.get("/ab").unwrap().ptr_eq(&sibling));
        assert!(map.get("/a").is_none());
    }

    #[test]
    fn uuid_index_follows_entries() {
        let mut map = IdentityMap::new();
        let uuid = Uuid::new_v4();
        let document = doc("/a");
        document.borrow_mut().set_uuid(uuid);

        map.put("/a", document.clone());
        assert!(map.get_by_uuid(&uuid).unwrap().ptr_eq(&document));

        map.rekey("/a", "/b");
        assert_eq!(map.get_by_uuid(&uuid).unwrap().id().as_deref(), Some("/b"));

        map.remove_document(&document);
        assert!(map.get_by_uuid(&uuid).is_none());
    }
}
