//! The unit of work.
//!
//! A [`Session`] owns the identity map, the snapshots and the scheduler, together with the
//! collaborators it writes through: a [`NodeStore`], a [`MetadataProvider`] and a
//! [`Hydrator`]. Documents become tracked when they are persisted or found, and stay tracked
//! until [`Session::clear`] or until a flush commits their removal.
//!
//! # Example
//!
//! ```ignore
//! use nodelayer::{prelude::*, memory::InMemoryNodeStore};
//!
//! let mut session = Session::builder()
//!     .store(InMemoryNodeStore::new())
//!     .metadata(registry)
//!     .build()?;
//!
//! session.ensure_path("/functional")?;
//!
//! let user = Document::new("CmsUser")
//!     .with_id("/functional/user")
//!     .with("username", "lsmith")
//!     .into_handle();
//!
//! session.persist(&user)?;
//! session.flush()?;
//!
//! session.clear()?;
//! let reloaded = session.find(Some("CmsUser"), "/functional/user")?;
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    rc::Rc,
    sync::Arc,
};

use bson::Bson;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    backend::{NodeStore, RawNode},
    changeset::{ChangeSet, ChangeSetComputer, FieldState, Snapshot},
    config::SessionConfig,
    document::{Document, DocumentHandle, Oid},
    error::{SessionError, SessionResult},
    event::EventManager,
    hydrate::{BsonHydrator, Hydrator, ReferenceResolver},
    identity_map::IdentityMap,
    mapping::{ClassMetadata, FieldKind, GENERIC_CLASS, IdStrategy, MetadataProvider, MetadataRegistry},
    path,
    reference::{ReferenceMany, Source},
    scheduler::{DocumentState, OperationKind, ScheduledMove, Scheduler},
    value::Value,
};

/// Tracks documents and writes their changes to a node store on [`Session::flush`].
///
/// A session is single-threaded: documents are shared through reference-counted handles and
/// listeners run on the thread that flushes.
pub struct Session {
    store: Box<dyn NodeStore>,
    metadata: Arc<dyn MetadataProvider>,
    pub(crate) hydrator: Rc<dyn Hydrator>,
    events: EventManager,
    config: SessionConfig,
    pub(crate) identity_map: IdentityMap,
    pub(crate) snapshots: HashMap<Oid, Snapshot>,
    pub(crate) scheduler: Scheduler,
    pub(crate) flushing: bool,
}

impl Session {
    /// A session over `store` with the given mappings and default configuration.
    pub fn new(store: impl NodeStore + 'static, metadata: impl MetadataProvider + 'static) -> Self {
        Self::with_parts(
            Box::new(store),
            Arc::new(metadata),
            Rc::new(BsonHydrator::new()),
            SessionConfig::default(),
        )
    }

    /// Starts a [`SessionBuilder`], for sessions with a custom hydrator or configuration.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    fn with_parts(
        store: Box<dyn NodeStore>,
        metadata: Arc<dyn MetadataProvider>,
        hydrator: Rc<dyn Hydrator>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            metadata,
            hydrator,
            events: EventManager::new(),
            config,
            identity_map: IdentityMap::new(),
            snapshots: HashMap::new(),
            scheduler: Scheduler::new(),
            flushing: false,
        }
    }

    /// The listener registry of this session.
    ///
    /// # Example
    ///
    /// ```ignore
    /// session.event_manager().listen(&[Event::PrePersist], |args: &mut EventArgs<'_>| {
    ///     if let Some(document) = args.document() {
    ///         document.set("status", "new");
    ///     }
    ///     Ok(())
    /// })?;
    /// ```
    pub fn event_manager(&mut self) -> &mut EventManager {
        &mut self.events
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The node store this session writes through.
    pub fn store(&self) -> &dyn NodeStore {
        self.store.as_ref()
    }

    /// The mappings documents are read and written with.
    pub fn metadata(&self) -> &dyn MetadataProvider {
        self.metadata.as_ref()
    }

    /// Whether a flush is currently running on this session.
    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    /// Schedules a document for insertion, together with the untracked documents reachable
    /// through its cascading references and children.
    ///
    /// The id is determined by the class' [`IdStrategy`]; referenceable documents receive a
    /// uuid. Persisting a tracked document only cascades.
    ///
    /// # Errors
    ///
    /// - [`SessionError::IllegalState`] if the document is scheduled for removal, or if its
    ///   id is already taken by another instance or by a stored node. Use [`Session::merge`]
    ///   to apply a detached copy to stored state. Ids at or below the target of a pending
    ///   move are taken as well until that move is flushed.
    /// - [`SessionError::InvalidDocument`] if no valid id can be derived.
    pub fn persist(&mut self, document: &DocumentHandle) -> SessionResult<()> {
        let metadata = self.metadata.require(&document.class())?;

        match self.scheduler.state(document.oid()) {
            DocumentState::ScheduledRemove => {
                return Err(SessionError::IllegalState(format!(
                    "{document:?} is scheduled for removal and cannot be persisted"
                )));
            }
            DocumentState::Detached => {}
            _ => return self.cascade_persist(document, &metadata),
        }

        let id = self.derive_id(document, &metadata)?;
        path::validate(&id).map_err(|e| SessionError::InvalidDocument(e.to_string()))?;

        if let Some(existing) = self.identity_map.get(&id) {
            if !existing.ptr_eq(document) {
                return Err(SessionError::IllegalState(format!(
                    "{id} is already managed by another instance; use merge to apply changes to it"
                )));
            }
        }

        if self.store.node_exists(&id)? {
            return Err(SessionError::IllegalState(format!(
                "a node already exists at {id}; find or merge it instead"
            )));
        }

        if let Some(pending) = self.pending_move_onto(&id, None) {
            return Err(SessionError::IllegalState(format!(
                "{id} is claimed by the pending move of {} to {}; flush the move first",
                pending.from, pending.to
            )));
        }

        {
            let mut doc = document.borrow_mut();
            doc.set_id(id.clone());

            if metadata.referenceable && doc.uuid().is_none() {
                doc.set_uuid(Uuid::new_v4());
            }

            if let Some(field) = metadata.node_name_field() {
                if doc.get(field).is_none() {
                    doc.set(field, path::name(&id));
                }
            }
        }

        // registered before cascading so that references back to it find it tracked
        self.identity_map.put(id.clone(), document.clone());

        if let Err(err) = self.cascade_references(document, &metadata) {
            self.identity_map.remove_document(document);
            return Err(err);
        }

        self.scheduler.schedule_insert(document)?;
        debug!(%id, class = %metadata.name, "scheduled insert");

        self.cascade_children(document, &metadata)
    }

    /// A pending move of another document whose target is `path` or one of its ancestors.
    fn pending_move_onto(&self, path: &str, except: Option<Oid>) -> Option<ScheduledMove> {
        self.scheduler.moves().into_iter().find(|pending| {
            Some(pending.document.oid()) != except
                && (pending.to == path || path::is_descendant(path, &pending.to))
        })
    }

    fn derive_id(&mut self, document: &DocumentHandle, metadata: &ClassMetadata) -> SessionResult<String> {
        let (assigned, parent, name) = {
            let doc = document.borrow();
            (
                doc.id().map(str::to_string),
                metadata.parent_field().and_then(|f| doc.reference(f)).cloned(),
                metadata
                    .node_name_field()
                    .and_then(|f| doc.get_str(f))
                    .map(str::to_string),
            )
        };

        let parent_id = match parent {
            Some(parent) => {
                if self.is_untracked(&parent) {
                    self.persist(&parent)?;
                }
                parent.id()
            }
            None => None,
        };

        let id = match metadata.id_strategy {
            IdStrategy::Assigned => assigned,
            IdStrategy::Parent => match (parent_id, name) {
                (Some(parent), Some(name)) => Some(path::join(&parent, &name)),
                _ => assigned,
            },
            IdStrategy::Generated => assigned.or_else(|| {
                let parent = parent_id.unwrap_or_else(|| path::ROOT.to_string());
                Some(path::join(&parent, &Uuid::new_v4().to_string()))
            }),
        };

        id.ok_or_else(|| {
            SessionError::InvalidDocument(format!(
                "cannot determine the id of {document:?} with the {:?} strategy",
                metadata.id_strategy
            ))
        })
    }

    fn is_untracked(&self, document: &DocumentHandle) -> bool {
        self.scheduler.state(document.oid()) == DocumentState::Detached
            && !self.identity_map.contains(document)
    }

    fn cascade_persist(&mut self, document: &DocumentHandle, metadata: &ClassMetadata) -> SessionResult<()> {
        self.cascade_references(document, metadata)?;
        self.cascade_children(document, metadata)
    }

    /// Untracked members of the cascading fields of `document`, either of its children field
    /// or of its reference fields.
    fn cascade_targets(
        &self,
        document: &DocumentHandle,
        metadata: &ClassMetadata,
        children: bool,
    ) -> Vec<DocumentHandle> {
        let doc = document.borrow();
        let mut targets = Vec::new();

        for (name, mapping) in &metadata.fields {
            let wanted = if children {
                mapping.kind == FieldKind::Children
            } else {
                mapping.kind.is_reference()
            };
            if !wanted || !mapping.cascade().persist {
                continue;
            }

            match doc.get(name) {
                Some(Value::Reference(target)) => targets.push(target.clone()),
                Some(Value::Collection(collection)) => {
                    targets.extend(collection.documents().unwrap_or_default().iter().cloned())
                }
                _ => {}
            }
        }

        targets.retain(|target| self.is_untracked(target));
        targets
    }

    /// Referenced documents are scheduled ahead of the document referencing them.
    fn cascade_references(&mut self, document: &DocumentHandle, metadata: &ClassMetadata) -> SessionResult<()> {
        for target in self.cascade_targets(document, metadata, false) {
            // an earlier target may have reached it already
            if self.is_untracked(&target) {
                trace!(from = ?document, to = ?target, "cascading persist");
                self.persist(&target)?;
            }
        }

        Ok(())
    }

    fn cascade_children(&mut self, document: &DocumentHandle, metadata: &ClassMetadata) -> SessionResult<()> {
        for child in self.cascade_targets(document, metadata, true) {
            if self.is_untracked(&child) {
                let child_metadata = self.metadata.require(&child.class())?;
                if let Some(parent_field) = child_metadata.parent_field() {
                    child.set(parent_field, document);
                }
                self.persist(&child)?;
            }
        }

        Ok(())
    }

    /// Schedules a managed document for removal.
    ///
    /// Tracked descendants are removed with it when `cascade_remove_descendants` is set, and
    /// so are the targets of fields cascading remove. Removing a document that is only
    /// scheduled for insertion unschedules it.
    pub fn remove(&mut self, document: &DocumentHandle) -> SessionResult<()> {
        if self.scheduler.state(document.oid()) == DocumentState::Detached {
            return Err(SessionError::IllegalState(format!(
                "{document:?} is not managed by this session"
            )));
        }

        let mut visited = HashSet::new();
        self.remove_cascading(document, &mut visited)
    }

    fn remove_cascading(&mut self, document: &DocumentHandle, visited: &mut HashSet<Oid>) -> SessionResult<()> {
        if !visited.insert(document.oid()) {
            return Ok(());
        }

        match self.scheduler.state(document.oid()) {
            DocumentState::Detached | DocumentState::ScheduledRemove => return Ok(()),
            DocumentState::ScheduledInsert => {
                self.untrack(document);
                debug!(document = ?document, "unscheduled insert");
            }
            DocumentState::Managed | DocumentState::Dirty => {
                self.scheduler.schedule_remove(document)?;
                debug!(document = ?document, "scheduled remove");
            }
        }

        let metadata = self.metadata.require(&document.class())?;
        let mut cascaded = Vec::new();

        if let Some(id) = document.id() {
            for descendant in self.identity_map.subtree(&id) {
                if descendant.ptr_eq(document) {
                    continue;
                }

                let pending_insert =
                    self.scheduler.state(descendant.oid()) == DocumentState::ScheduledInsert;
                if self.config.cascade_remove_descendants || pending_insert {
                    cascaded.push(descendant);
                }
            }
        }

        {
            let doc = document.borrow();

            for (name, mapping) in &metadata.fields {
                if !mapping.cascade().remove {
                    continue;
                }

                match doc.get(name) {
                    Some(Value::Reference(target)) => cascaded.push(target.clone()),
                    Some(Value::Collection(collection)) => {
                        cascaded.extend(collection.documents().unwrap_or_default().iter().cloned())
                    }
                    _ => {}
                }
            }
        }

        for target in cascaded {
            self.remove_cascading(&target, visited)?;
        }

        Ok(())
    }

    /// Relocates a document and its subtree to `target`.
    ///
    /// For a managed document the move is recorded and carried out by the next flush; the
    /// document keeps its current id until then. A document still scheduled for insertion is
    /// simply re-addressed. Pending field changes are unaffected either way. Once the move is
    /// committed, loaded children collections of the old and new parent reflect it.
    ///
    /// # Errors
    ///
    /// [`SessionError::IllegalState`] when the target is below the document itself, is held
    /// by another document or stored node, or is the target of another pending move. A
    /// pending insert cannot be moved below the target of a pending move either.
    pub fn move_document(&mut self, document: &DocumentHandle, target: &str) -> SessionResult<()> {
        path::validate(target).map_err(|e| SessionError::InvalidDocument(e.to_string()))?;

        let state = self.scheduler.state(document.oid());
        if matches!(state, DocumentState::Detached | DocumentState::ScheduledRemove) {
            return Err(SessionError::IllegalState(format!(
                "cannot move {document:?} in state {state:?}"
            )));
        }

        let current = document
            .id()
            .ok_or_else(|| SessionError::InvalidDocument(format!("{document:?} has no id")))?;

        if path::is_descendant(target, &current) {
            return Err(SessionError::IllegalState(format!(
                "cannot move {current} below itself to {target}"
            )));
        }

        match self.identity_map.get(target) {
            Some(existing) if existing.ptr_eq(document) => {}
            Some(existing)
                if self.scheduler.state(existing.oid()) == DocumentState::ScheduledRemove => {}
            Some(_) => {
                return Err(SessionError::IllegalState(format!(
                    "cannot move {current} to {target}: the path is taken by another document"
                )));
            }
            None => {
                if self.store.node_exists(target)? {
                    return Err(SessionError::IllegalState(format!(
                        "cannot move {current} to {target}: a node exists there"
                    )));
                }
            }
        }

        // inserts are written before moves, so a pending insert cannot land below one
        if let Some(pending) = self.pending_move_onto(target, Some(document.oid())) {
            if pending.to == target || state == DocumentState::ScheduledInsert {
                return Err(SessionError::IllegalState(format!(
                    "cannot move {current} to {target}: the path is claimed by the pending move of {}",
                    pending.from
                )));
            }
        }

        if state == DocumentState::ScheduledInsert {
            self.identity_map.rekey(&current, target);
            self.transfer_child(document, &current, target, false)?;
            self.relink(document, target)?;
            debug!(from = %current, to = %target, "re-addressed pending insert");
            return Ok(());
        }

        self.scheduler.schedule_move(document, &current, target)?;
        debug!(from = %current, to = %target, "scheduled move");

        Ok(())
    }

    /// Moves `document` out of the loaded children collection of the parent at its old
    /// location and into that of the parent at `to`. For a committed move the parents'
    /// snapshots follow, since the store already holds the new arrangement.
    pub(crate) fn transfer_child(
        &mut self,
        document: &DocumentHandle,
        from: &str,
        to: &str,
        committed: bool,
    ) -> SessionResult<()> {
        if let Some(parent) = path::parent(from).and_then(|p| self.identity_map.get(p).cloned()) {
            let metadata = self.metadata.require(&parent.class())?;

            if let Some(field) = metadata.children_field() {
                if let Some(children) = parent.borrow_mut().collection_mut(field) {
                    if children.is_loaded() {
                        children.remove(document)?;
                    }
                }

                if committed {
                    if let Some(snapshot) = self.snapshots.get_mut(&parent.oid()) {
                        snapshot.forget_member(field, document.oid());
                    }
                }
            }
        }

        if let Some(parent) = path::parent(to).and_then(|p| self.identity_map.get(p).cloned()) {
            let metadata = self.metadata.require(&parent.class())?;

            if let Some(field) = metadata.children_field() {
                let listed = match parent.borrow_mut().collection_mut(field) {
                    Some(children) if children.is_loaded() => {
                        children.push_unique(document.clone())?;
                        true
                    }
                    _ => false,
                };

                if listed && committed {
                    if let Some(snapshot) = self.snapshots.get_mut(&parent.oid()) {
                        snapshot.add_member(field, document.oid());
                    }
                }
            }
        }

        Ok(())
    }

    /// Brings the node name and parent fields of `document` in line with `new_path`.
    pub(crate) fn relink(&mut self, document: &DocumentHandle, new_path: &str) -> SessionResult<()> {
        let metadata = self.metadata.require(&document.class())?;

        if let Some(field) = metadata.node_name_field() {
            document.set(field, path::name(new_path));
        }

        if let Some(field) = metadata.parent_field() {
            let parent = match path::parent(new_path) {
                Some(parent) => self.find(None, parent)?,
                None => None,
            };

            match parent {
                Some(parent) => {
                    document.set(field, &parent);
                }
                None => warn!(path = %new_path, "parent of relocated document could not be resolved"),
            }
        }

        Ok(())
    }

    /// Applies the state of `document` to the managed instance with the same id and returns
    /// that instance. Scalars and single references are replaced; many-reference fields are
    /// unioned, keeping the managed order and appending new members. A document without a
    /// managed or stored counterpart is persisted instead.
    pub fn merge(&mut self, document: &DocumentHandle) -> SessionResult<DocumentHandle> {
        if self.identity_map.contains(document) {
            return Ok(document.clone());
        }

        let managed = match document.id() {
            Some(id) => self.find(Some(&document.class()), &id)?,
            None => None,
        };

        let Some(managed) = managed else {
            self.persist(document)?;
            return Ok(document.clone());
        };

        let metadata = self.metadata.require(&managed.class())?;

        for (name, mapping) in &metadata.fields {
            match mapping.kind {
                FieldKind::Parent | FieldKind::NodeName | FieldKind::Children => {}
                FieldKind::ReferenceMany => {
                    let incoming = document
                        .borrow()
                        .collection(name)
                        .and_then(|c| c.documents().map(<[_]>::to_vec));
                    let Some(incoming) = incoming else {
                        continue;
                    };

                    if managed.borrow().collection(name).is_some() {
                        self.load_collection(&managed, name)?;
                    } else {
                        managed.set(name.as_str(), ReferenceMany::new());
                    }

                    let members = incoming
                        .iter()
                        .map(|member| self.managed_counterpart(member))
                        .collect::<Vec<_>>();

                    let mut doc = managed.borrow_mut();
                    if let Some(collection) = doc.collection_mut(name) {
                        for member in members {
                            collection.push_unique(member)?;
                        }
                    }
                }
                FieldKind::ReferenceOne => match document.get(name) {
                    Some(Value::Reference(target)) => {
                        let target = self.managed_counterpart(&target);
                        managed.set(name.as_str(), target);
                    }
                    _ => {
                        managed.borrow_mut().unset(name);
                    }
                },
                _ => match document.get(name) {
                    Some(value) => {
                        managed.set(name.as_str(), value);
                    }
                    None => {
                        managed.borrow_mut().unset(name);
                    }
                },
            }
        }

        debug!(document = ?managed, "merged");
        Ok(managed)
    }

    fn managed_counterpart(&self, document: &DocumentHandle) -> DocumentHandle {
        if self.identity_map.contains(document) {
            return document.clone();
        }

        document
            .id()
            .and_then(|id| self.identity_map.get(&id).cloned())
            .unwrap_or_else(|| document.clone())
    }

    /// Detaches every document and drops all snapshots and pending work. Later lookups hydrate
    /// fresh instances.
    pub fn clear(&mut self) -> SessionResult<()> {
        if self.flushing {
            return Err(SessionError::IllegalState(
                "clear called while a flush is running".to_string(),
            ));
        }

        self.identity_map.clear();
        self.snapshots.clear();
        self.scheduler.clear();
        debug!("session cleared");

        Ok(())
    }

    /// Looks up the document at `id`, from the identity map or else from the store. With a
    /// class given, documents not of that class (or a subclass) are not returned.
    pub fn find(&mut self, class: Option<&str>, id: &str) -> SessionResult<Option<DocumentHandle>> {
        path::validate(id)?;

        let document = match self.identity_map.get(id) {
            Some(document) => document.clone(),
            None => match self.store.read_node(id)? {
                Some(node) => self.hydrate_node(node)?,
                None => return Ok(None),
            },
        };

        Ok(self.of_class(document, class))
    }

    /// Looks up a referenceable document by its uuid, from the identity map or else from
    /// the store.
    pub fn find_by_uuid(&mut self, uuid: &Uuid) -> SessionResult<Option<DocumentHandle>> {
        if let Some(document) = self.identity_map.get_by_uuid(uuid) {
            return Ok(Some(document.clone()));
        }

        let Some(node) = self.store.find_by_uuid(uuid)? else {
            return Ok(None);
        };

        match self.identity_map.get(&node.path) {
            Some(document) => Ok(Some(document.clone())),
            None => self.hydrate_node(node).map(Some),
        }
    }

    /// Returns the document of `class` at `id`, or persists the one built by `create`.
    ///
    /// Pending inserts are found too, so repeated calls for the same id within one flush
    /// resolve to a single instance.
    pub fn find_or_create<F>(&mut self, class: &str, id: &str, create: F) -> SessionResult<DocumentHandle>
    where
        F: FnOnce() -> Document,
    {
        if let Some(existing) = self.find(Some(class), id)? {
            return Ok(existing);
        }

        let mut document = create();
        if document.id().is_none() {
            document.set_id(id);
        }

        let handle = document.into_handle();
        self.persist(&handle)?;

        Ok(handle)
    }

    fn of_class(&self, document: DocumentHandle, class: Option<&str>) -> Option<DocumentHandle> {
        match class {
            Some(class) if !self.metadata.is_instance(&document.class(), class) => {
                debug!(document = ?document, expected = %class, "found document of another class");
                None
            }
            _ => Some(document),
        }
    }

    /// Builds and registers a managed document from a node. The instance is registered
    /// before its fields are hydrated so that references back to it resolve to it.
    fn hydrate_node(&mut self, node: RawNode) -> SessionResult<DocumentHandle> {
        let class = match node.property(&self.config.class_property) {
            Some(Bson::String(class)) => class.clone(),
            _ => GENERIC_CLASS.to_string(),
        };
        let metadata = self.metadata.require(&class)?;

        let mut document = Document::new(class).with_id(node.path.clone());
        if let Some(uuid) = node.uuid {
            document.set_uuid(uuid);
        }

        let handle = document.into_handle();
        self.identity_map.put(node.path.clone(), handle.clone());
        self.scheduler.manage(&handle);

        let hydrator = Rc::clone(&self.hydrator);
        match hydrator.hydrate(&node, &metadata, self) {
            Ok(fields) => {
                handle.borrow_mut().replace_fields(fields);
                let snapshot = ChangeSetComputer::capture(&handle.borrow(), &metadata);
                self.snapshots.insert(handle.oid(), snapshot);
                trace!(path = %node.path, "hydrated");

                Ok(handle)
            }
            Err(err) => {
                self.untrack(&handle);
                Err(err)
            }
        }
    }

    pub(crate) fn untrack(&mut self, document: &DocumentHandle) {
        self.identity_map.remove_document(document);
        self.snapshots.remove(&document.oid());
        self.scheduler.untrack(document.oid());
    }

    /// Loads an unloaded collection field. Loading twice is a no-op.
    ///
    /// The snapshot of the document is brought to the loaded representation as well, so
    /// loading alone never makes a document dirty.
    pub fn load_collection(&mut self, document: &DocumentHandle, field: &str) -> SessionResult<()> {
        let source = match document.borrow().collection(field) {
            Some(collection) => collection.source().cloned(),
            None => {
                return Err(SessionError::InvalidDocument(format!(
                    "field {field} of {document:?} is not a collection"
                )));
            }
        };

        let Some(source) = source else {
            return Ok(());
        };

        let members = match &source {
            Source::References(uuids) => {
                let mut members = Vec::with_capacity(uuids.len());
                for uuid in uuids {
                    match self.find_by_uuid(uuid)? {
                        Some(member) => members.push(member),
                        None => warn!(%uuid, %field, "dangling reference in collection"),
                    }
                }
                members
            }
            Source::Children(parent) => {
                let nodes = self.store.children(parent)?;
                let mut members = Vec::with_capacity(nodes.len());
                for node in nodes {
                    let member = match self.identity_map.get(&node.path).cloned() {
                        Some(member) => member,
                        None => self.hydrate_node(node)?,
                    };
                    members.push(member);
                }
                members
            }
        };

        let oids = members.iter().map(DocumentHandle::oid).collect();

        if let Some(collection) = document.borrow_mut().collection_mut(field) {
            collection.initialize(members);
        }
        if let Some(snapshot) = self.snapshots.get_mut(&document.oid()) {
            snapshot.mark_loaded(field, oids);
        }

        debug!(document = ?document, %field, "loaded collection");
        Ok(())
    }

    /// Creates `path` and any missing ancestors directly in the store, outside the unit of
    /// work.
    pub fn ensure_path(&self, path: &str) -> SessionResult<()> {
        path::validate(path)?;

        let wanted = path::ancestors(path)
            .into_iter()
            .chain(std::iter::once(path.to_string()));

        for current in wanted {
            if !self.store.node_exists(&current)? {
                self.store
                    .create_node(RawNode::new(current.clone(), self.config.default_node_type.clone()))?;
                debug!(path = %current, "created node");
            }
        }

        Ok(())
    }

    /// Whether the instance is tracked and not scheduled for removal.
    pub fn contains(&self, document: &DocumentHandle) -> bool {
        self.identity_map.contains(document)
            && self.scheduler.state(document.oid()) != DocumentState::ScheduledRemove
    }

    /// The lifecycle state of a document. A managed document with pending changes reports
    /// [`DocumentState::Dirty`].
    pub fn document_state(&self, document: &DocumentHandle) -> DocumentState {
        let oid = document.oid();

        match self.scheduler.state(oid) {
            DocumentState::Managed => {
                let dirty = self.scheduler.has_update(oid)
                    || self.change_set(document).is_ok_and(|cs| !cs.is_empty());
                if dirty { DocumentState::Dirty } else { DocumentState::Managed }
            }
            state => state,
        }
    }

    /// The current change set of a document against its snapshot. Documents without a
    /// snapshot are compared against an empty one, so every set field shows as changed.
    pub fn change_set(&self, document: &DocumentHandle) -> SessionResult<ChangeSet> {
        let metadata = self.metadata.require(&document.class())?;
        let empty = Snapshot::default();
        let snapshot = self.snapshots.get(&document.oid()).unwrap_or(&empty);

        Ok(ChangeSetComputer::compute(&document.borrow(), snapshot, &metadata))
    }

    /// Recomputes the change set of one document and schedules the result.
    ///
    /// Meant for `onFlush` listeners that altered or created a document and need it written
    /// by the running flush.
    pub fn compute_single_document_change_set(&mut self, document: &DocumentHandle) -> SessionResult<()> {
        match self.scheduler.state(document.oid()) {
            DocumentState::Detached => Err(SessionError::IllegalState(format!(
                "{document:?} must be persisted before its change set can be computed"
            ))),
            DocumentState::ScheduledRemove => Err(SessionError::IllegalState(format!(
                "{document:?} is scheduled for removal"
            ))),
            DocumentState::ScheduledInsert => {
                let metadata = self.metadata.require(&document.class())?;
                self.cascade_persist(document, &metadata)
            }
            DocumentState::Managed | DocumentState::Dirty => self.compute_document(document),
        }
    }

    /// Computes and schedules the change sets of every tracked document.
    pub(crate) fn compute_change_sets(&mut self) -> SessionResult<()> {
        for document in self.identity_map.handles() {
            match self.scheduler.state(document.oid()) {
                DocumentState::Managed => self.compute_document(&document)?,
                DocumentState::ScheduledInsert => {
                    let metadata = self.metadata.require(&document.class())?;
                    self.cascade_persist(&document, &metadata)?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn compute_document(&mut self, document: &DocumentHandle) -> SessionResult<()> {
        let metadata = self.metadata.require(&document.class())?;
        let change_set = self.change_set(document)?;

        self.cascade_persist(document, &metadata)?;
        self.remove_dropped_children(&metadata, &change_set)?;
        self.scheduler.record_change_set(document, change_set);

        Ok(())
    }

    /// Children dropped from a loaded children collection are removed.
    fn remove_dropped_children(&mut self, metadata: &ClassMetadata, change_set: &ChangeSet) -> SessionResult<()> {
        let Some(change) = metadata.children_field().and_then(|field| change_set.get(field)) else {
            return Ok(());
        };

        let (Some(FieldState::Collection(old)), FieldState::Collection(new)) = (&change.old, &change.new)
        else {
            return Ok(());
        };

        let dropped = old
            .iter()
            .filter(|oid| !new.contains(oid))
            .filter(|oid| !self.scheduler.is_scheduled(**oid, OperationKind::Move))
            .filter_map(|oid| self.identity_map.get_by_oid(*oid).cloned())
            .collect::<Vec<_>>();

        for child in dropped {
            if self.scheduler.state(child.oid()) == DocumentState::Managed {
                self.remove(&child)?;
            }
        }

        Ok(())
    }

    /// Documents scheduled for insertion, in scheduling order. Documents persisted through a
    /// cascading reference are scheduled ahead of the document referencing them.
    pub fn scheduled_inserts(&self) -> Vec<DocumentHandle> {
        self.scheduler.inserts()
    }

    /// Managed documents whose change sets are queued for writing. Change sets are computed
    /// when a flush starts, so this is mostly of use to `onFlush` listeners.
    pub fn scheduled_updates(&self) -> Vec<DocumentHandle> {
        self.scheduler
            .updates()
            .into_iter()
            .map(|(document, _)| document)
            .collect()
    }

    /// Documents scheduled for removal, in scheduling order.
    pub fn scheduled_removes(&self) -> Vec<DocumentHandle> {
        self.scheduler.removes()
    }

    /// Pending moves with their source and target paths.
    pub fn scheduled_moves(&self) -> Vec<ScheduledMove> {
        self.scheduler.moves()
    }
}

impl ReferenceResolver for Session {
    fn resolve_uuid(&mut self, uuid: &Uuid) -> SessionResult<Option<DocumentHandle>> {
        self.find_by_uuid(uuid)
    }

    fn resolve_path(&mut self, path: &str) -> SessionResult<Option<DocumentHandle>> {
        self.find(None, path)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("tracked", &self.identity_map.len())
            .field("flushing", &self.flushing)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Session`]. A store is required; mappings default to an empty
/// [`MetadataRegistry`] and hydration to [`BsonHydrator`].
///
/// # Example
///
/// ```ignore
/// use nodelayer::{prelude::*, memory::InMemoryNodeStore};
///
/// let session = Session::builder()
///     .store(InMemoryNodeStore::new())
///     .metadata(MetadataRegistry::from_path("mappings.json")?)
///     .config(SessionConfig::from_path("session.json")?)
///     .build()?;
/// ```
#[derive(Default)]
pub struct SessionBuilder {
    store: Option<Box<dyn NodeStore>>,
    metadata: Option<Arc<dyn MetadataProvider>>,
    hydrator: Option<Rc<dyn Hydrator>>,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn store(mut self, store: impl NodeStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn metadata(mut self, metadata: impl MetadataProvider + 'static) -> Self {
        self.metadata = Some(Arc::new(metadata));
        self
    }

    /// Uses a provider shared with other sessions.
    pub fn shared_metadata(mut self, metadata: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Replaces the default [`BsonHydrator`].
    pub fn hydrator(mut self, hydrator: impl Hydrator + 'static) -> Self {
        self.hydrator = Some(Rc::new(hydrator));
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// # Errors
    ///
    /// [`SessionError::Config`] when no store was given.
    pub fn build(self) -> SessionResult<Session> {
        let store = self
            .store
            .ok_or_else(|| SessionError::Config("a session needs a node store".to_string()))?;

        Ok(Session::with_parts(
            store,
            self.metadata
                .unwrap_or_else(|| Arc::new(MetadataRegistry::new())),
            self.hydrator.unwrap_or_else(|| Rc::new(BsonHydrator::new())),
            self.config,
        ))
    }
}
