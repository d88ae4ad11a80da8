//! Lazily loaded collections of document references.
//!
//! A [`ReferenceMany`] is in one of two observable states. Hydrated collections start
//! [`LoadState::Unloaded`], remembering only where their members live ([`Source`]). The session
//! resolves the source and hands the documents to [`ReferenceMany::initialize`]; from then on
//! the collection is [`LoadState::Loaded`] and stays cached for the lifetime of the instance.
//! Initializing twice is a no-op.

use std::fmt;

use uuid::Uuid;

use crate::{
    document::{DocumentHandle, Oid},
    error::{SessionError, SessionResult},
};

/// Where the members of an unloaded collection are found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Uuids of referenced nodes, in order.
    References(Vec<Uuid>),
    /// The child nodes of the given path, in store order.
    Children(String),
}

#[derive(Clone)]
pub enum LoadState {
    Unloaded(Source),
    Loaded(Vec<DocumentHandle>),
}

/// An ordered collection of references that loads on first use.
#[derive(Clone)]
pub struct ReferenceMany {
    state: LoadState,
}

impl ReferenceMany {
    /// An empty, loaded collection.
    pub fn new() -> Self {
        Self {
            state: LoadState::Loaded(Vec::new()),
        }
    }

    pub fn from_documents(documents: Vec<DocumentHandle>) -> Self {
        Self {
            state: LoadState::Loaded(documents),
        }
    }

    pub fn unloaded(source: Source) -> Self {
        Self {
            state: LoadState::Unloaded(source),
        }
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, LoadState::Loaded(_))
    }

    /// The source of an unloaded collection.
    pub fn source(&self) -> Option<&Source> {
        match &self.state {
            LoadState::Unloaded(source) => Some(source),
            LoadState::Loaded(_) => None,
        }
    }

    /// Transitions to the loaded state. Does nothing if already loaded.
    pub fn initialize(&mut self, documents: Vec<DocumentHandle>) {
        if let LoadState::Unloaded(_) = self.state {
            self.state = LoadState::Loaded(documents);
        }
    }

    /// The loaded members, or `None` while unloaded.
    pub fn documents(&self) -> Option<&[DocumentHandle]> {
        match &self.state {
            LoadState::Loaded(documents) => Some(documents),
            LoadState::Unloaded(_) => None,
        }
    }

    /// Oids of the loaded members in order.
    pub fn oids(&self) -> Option<Vec<Oid>> {
        self.documents()
            .map(|docs| docs.iter().map(DocumentHandle::oid).collect())
    }

    pub fn contains(&self, document: &DocumentHandle) -> bool {
        self.documents()
            .is_some_and(|docs| docs.iter().any(|d| d.ptr_eq(document)))
    }

    /// Appends a reference.
    ///
    /// # Errors
    ///
    /// Fails with [`SessionError::IllegalState`] while unloaded; load it through
    /// [`Session::load_collection`](crate::session::Session::load_collection) first.
    pub fn push(&mut self, document: DocumentHandle) -> SessionResult<()> {
        self.loaded_mut()?.push(document);
        Ok(())
    }

    /// Appends the reference unless the same instance is already a member.
    pub fn push_unique(&mut self, document: DocumentHandle) -> SessionResult<bool> {
        let docs = self.loaded_mut()?;

        if docs.iter().any(|d| d.ptr_eq(&document)) {
            return Ok(false);
        }

        docs.push(document);
        Ok(true)
    }

    /// Removes every occurrence of the instance. Returns whether anything was removed.
    pub fn remove(&mut self, document: &DocumentHandle) -> SessionResult<bool> {
        let docs = self.loaded_mut()?;
        let before = docs.len();
        docs.retain(|d| !d.ptr_eq(document));

        Ok(docs.len() != before)
    }

    pub fn clear(&mut self) {
        self.state = LoadState::Loaded(Vec::new());
    }

    fn loaded_mut(&mut self) -> SessionResult<&mut Vec<DocumentHandle>> {
        match &mut self.state {
            LoadState::Loaded(documents) => Ok(documents),
            LoadState::Unloaded(_) => Err(SessionError::IllegalState(
                "collection must be loaded before it can be modified".to_string(),
            )),
        }
    }
}

impl Default for ReferenceMany {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ReferenceMany {
    fn eq(&self, other: &Self) -> bool {
        match (&self.state, &other.state) {
            (LoadState::Unloaded(a), LoadState::Unloaded(b)) => a == b,
            (LoadState::Loaded(a), LoadState::Loaded(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.ptr_eq(y))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for ReferenceMany {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            LoadState::Unloaded(source) => write!(f, "Unloaded({source:?})"),
            LoadState::Loaded(docs) => f.debug_list().entries(docs).finish(),
        }
    }
}

impl FromIterator<DocumentHandle> for ReferenceMany {
    fn from_iter<T: IntoIterator<Item = DocumentHandle>>(iter: T) -> Self {
        Self::from_documents(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    #[test]
    fn unloaded_collections_reject_mutation() {
        let mut refs = ReferenceMany::unloaded(Source::References(vec![Uuid::new_v4()]));
        let doc = Document::new("Article").into_handle();

        assert!(!refs.is_loaded());
        assert!(refs.push(doc.clone()).is_err());
        assert!(refs.documents().is_none());

        refs.initialize(vec![]);
        assert!(refs.is_loaded());
        refs.push(doc.clone()).unwrap();
        assert!(refs.contains(&doc));
    }

    #[test]
    fn initialize_is_idempotent() {
        let first = Document::new("Article").into_handle();
        let second = Document::new("Article").into_handle();
        let mut refs = ReferenceMany::unloaded(Source::Children("/a".to_string()));

        refs.initialize(vec![first.clone()]);
        refs.initialize(vec![second]);

        assert_eq!(refs.oids(), Some(vec![first.oid()]));
    }

    #[test]
    fn push_unique_and_remove() {
        let doc = Document::new("Article").into_handle();
        let mut refs = ReferenceMany::new();

        assert!(refs.push_unique(doc.clone()).unwrap());
        assert!(!refs.push_unique(doc.clone()).unwrap());
        assert!(refs.remove(&doc).unwrap());
        assert_eq!(refs.documents().map(<[_]>::len), Some(0));
    }
}
