//! Core types for document representation.
//!
//! A [`Document`] is a mapping of field names to [`Value`]s together with its mapped class,
//! its path identity and, for referenceable classes, its uuid. Application code and the
//! session share documents through [`DocumentHandle`], a reference-counted cell whose identity
//! (its [`Oid`]) is what references compare on.
//!
//! # Example
//!
//! ```ignore
//! use nodelayer::prelude::*;
//!
//! let user = Document::new("CmsUser")
//!     .with_id("/functional/user")
//!     .with("name", "mdekrijger")
//!     .into_handle();
//!
//! user.borrow_mut().set("status", "active");
//! assert_eq!(user.borrow().get_str("name"), Some("mdekrijger"));
//! ```

use std::{
    cell::{Ref, RefCell, RefMut},
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use uuid::Uuid;

use crate::{reference::ReferenceMany, value::Value};

/// Ordered field storage of a document.
pub type Fields = BTreeMap<String, Value>;

static NEXT_OID: AtomicU64 = AtomicU64::new(1);

/// In-memory instance identity of a document.
///
/// Every [`DocumentHandle`] gets a fresh oid, so a document re-hydrated after
/// [`Session::clear`](crate::session::Session::clear) is a different instance from the one
/// held before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(u64);

impl Oid {
    fn next() -> Self {
        Oid(NEXT_OID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An application-level object mapped to a node in the hierarchical store.
#[derive(Debug, Clone)]
pub struct Document {
    class: String,
    id: Option<String>,
    uuid: Option<Uuid>,
    fields: Fields,
}

impl Document {
    /// Creates an empty document of the given mapped class.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            id: None,
            uuid: None,
            fields: Fields::new(),
        }
    }

    /// Sets the path identity. Only meaningful before the document is persisted;
    /// afterwards the path changes through [`Session::move_document`](crate::session::Session::move_document).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets a field value.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Wraps the document into a shared handle.
    pub fn into_handle(self) -> DocumentHandle {
        DocumentHandle::new(self)
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.fields.get_mut(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Returns the referenced document of a single-reference or parent field.
    pub fn reference(&self, field: &str) -> Option<&DocumentHandle> {
        self.get(field).and_then(Value::as_reference)
    }

    pub fn collection(&self, field: &str) -> Option<&ReferenceMany> {
        self.get(field).and_then(Value::as_collection)
    }

    pub fn collection_mut(&mut self, field: &str) -> Option<&mut ReferenceMany> {
        self.get_mut(field).and_then(Value::as_collection_mut)
    }

    /// Sets a field, returning the previous value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    pub fn unset(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub(crate) fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    pub(crate) fn set_uuid(&mut self, uuid: Uuid) {
        self.uuid = Some(uuid);
    }

    pub(crate) fn replace_fields(&mut self, fields: Fields) {
        self.fields = fields;
    }
}

/// Shared, mutable handle to a [`Document`].
///
/// Cloning a handle yields another reference to the same instance. Equality and hashing follow
/// instance identity, never field contents.
#[derive(Clone)]
pub struct DocumentHandle {
    oid: Oid,
    cell: Rc<RefCell<Document>>,
}

impl DocumentHandle {
    pub fn new(document: Document) -> Self {
        Self {
            oid: Oid::next(),
            cell: Rc::new(RefCell::new(document)),
        }
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Immutably borrows the document.
    ///
    /// # Panics
    ///
    /// Panics if the document is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, Document> {
        self.cell.borrow()
    }

    /// Mutably borrows the document.
    ///
    /// # Panics
    ///
    /// Panics if the document is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, Document> {
        self.cell.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &DocumentHandle) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    pub fn id(&self) -> Option<String> {
        self.borrow().id().map(str::to_string)
    }

    pub fn class(&self) -> String {
        self.borrow().class().to_string()
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.borrow().uuid()
    }

    /// Clones the current value of a field.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.borrow().get(field).cloned()
    }

    pub fn get_string(&self, field: &str) -> Option<String> {
        self.borrow().get_str(field).map(str::to_string)
    }

    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.borrow_mut().set(field, value)
    }
}

impl PartialEq for DocumentHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for DocumentHandle {}

impl Hash for DocumentHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.oid.hash(state);
    }
}

// Never print fields here: references between documents may form cycles.
impl fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.try_borrow() {
            Ok(doc) => write!(
                f,
                "{}({} {})",
                doc.class(),
                self.oid,
                doc.id().unwrap_or("<unassigned>")
            ),
            Err(_) => write!(f, "Document({} <borrowed>)", self.oid),
        }
    }
}

impl From<Document> for DocumentHandle {
    fn from(document: Document) -> Self {
        DocumentHandle::new(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_identity() {
        let a = Document::new("Page").with("title", "x").into_handle();
        let b = Document::new("Page").with("title", "x").into_handle();

        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_ne!(a.oid(), b.oid());
    }

    #[test]
    fn field_access() {
        let doc = Document::new("CmsUser")
            .with_id("/functional/user")
            .with("name", "lsmith")
            .into_handle();

        assert_eq!(doc.id().as_deref(), Some("/functional/user"));
        assert_eq!(doc.get_string("name").as_deref(), Some("lsmith"));

        doc.set("name", "dbu");
        assert_eq!(doc.get("name"), Some(Value::from("dbu")));
        assert!(doc.borrow_mut().unset("name").is_some());
        assert_eq!(doc.get("name"), None);
    }

    #[test]
    fn debug_does_not_recurse_into_references() {
        let a = Document::new("Node").into_handle();
        let b = Document::new("Node").with("peer", &a).into_handle();
        a.set("peer", &b);

        let printed = format!("{:?}", a);
        assert!(printed.starts_with("Node("));
    }
}
