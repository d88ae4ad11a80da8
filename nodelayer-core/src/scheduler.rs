//! Classification and ordering of pending writes.
//!
//! The [`Scheduler`] tracks the lifecycle state of every document a session knows about and
//! keeps one queue per operation kind. Each queued entry carries a sequence number taken from
//! a single counter, so the union of all queues has a total order: the order in which the
//! work was scheduled. Pre and post events follow that order; the commit phase reorders by
//! dependency (see [`Scheduler::ordered_inserts`]).

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::{
    changeset::ChangeSet,
    document::{DocumentHandle, Oid},
    error::{SessionError, SessionResult},
    event::Event,
};

/// Lifecycle state of a document relative to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentState {
    /// Unknown to the session, or untracked by `clear` or a committed removal.
    Detached,
    /// Persisted but not yet written.
    ScheduledInsert,
    /// Tracked and synchronized with the store.
    Managed,
    /// Tracked, with field changes not yet written.
    Dirty,
    /// Will be removed by the next flush.
    ScheduledRemove,
}

/// The kind of a [`ScheduledOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Update,
    Remove,
    Move,
}

impl OperationKind {
    pub fn pre_event(&self) -> Event {
        match self {
            OperationKind::Insert => Event::PrePersist,
            OperationKind::Update => Event::PreUpdate,
            OperationKind::Remove => Event::PreRemove,
            OperationKind::Move => Event::PreMove,
        }
    }

    pub fn post_event(&self) -> Event {
        match self {
            OperationKind::Insert => Event::PostPersist,
            OperationKind::Update => Event::PostUpdate,
            OperationKind::Remove => Event::PostRemove,
            OperationKind::Move => Event::PostMove,
        }
    }
}

/// A pending relocation, keyed to the path the document had when the move was requested.
#[derive(Debug, Clone)]
pub struct ScheduledMove {
    pub document: DocumentHandle,
    pub from: String,
    pub to: String,
}

/// One unit of pending work.
#[derive(Debug, Clone)]
pub enum ScheduledOperation {
    Insert(DocumentHandle),
    Update(DocumentHandle, ChangeSet),
    Remove(DocumentHandle),
    Move(ScheduledMove),
}

impl ScheduledOperation {
    pub fn document(&self) -> &DocumentHandle {
        match self {
            ScheduledOperation::Insert(document)
            | ScheduledOperation::Update(document, _)
            | ScheduledOperation::Remove(document) => document,
            ScheduledOperation::Move(scheduled) => &scheduled.document,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            ScheduledOperation::Insert(_) => OperationKind::Insert,
            ScheduledOperation::Update(..) => OperationKind::Update,
            ScheduledOperation::Remove(_) => OperationKind::Remove,
            ScheduledOperation::Move(_) => OperationKind::Move,
        }
    }
}

#[derive(Debug, Clone)]
struct Queued<T> {
    seq: u64,
    item: T,
}

#[derive(Debug, Clone)]
struct PendingUpdate {
    document: DocumentHandle,
    change_set: ChangeSet,
    /// Recorded for a document whose pre event already fired in the running flush. The
    /// changes are written, but no further events are dispatched for it.
    silent: bool,
}

/// Per-session scheduling state.
#[derive(Debug, Default)]
pub struct Scheduler {
    next_seq: u64,
    states: HashMap<Oid, DocumentState>,
    inserts: IndexMap<Oid, Queued<DocumentHandle>>,
    updates: IndexMap<Oid, Queued<PendingUpdate>>,
    removes: IndexMap<Oid, Queued<DocumentHandle>>,
    moves: IndexMap<Oid, Queued<ScheduledMove>>,
    announced: HashSet<Oid>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// The tracked state of a document. Never reports [`DocumentState::Dirty`]; dirtiness is
    /// a property of the change set, which the session computes.
    pub fn state(&self, oid: Oid) -> DocumentState {
        self.states.get(&oid).copied().unwrap_or(DocumentState::Detached)
    }

    /// Starts tracking a loaded document.
    pub fn manage(&mut self, document: &DocumentHandle) {
        self.states.insert(document.oid(), DocumentState::Managed);
    }

    /// Stops tracking a document and drops any work queued for it.
    pub fn untrack(&mut self, oid: Oid) {
        self.states.remove(&oid);
        self.inserts.shift_remove(&oid);
        self.updates.shift_remove(&oid);
        self.removes.shift_remove(&oid);
        self.moves.shift_remove(&oid);
    }

    /// Schedules an insert. Returns `false` when the document is already tracked.
    pub fn schedule_insert(&mut self, document: &DocumentHandle) -> SessionResult<bool> {
        let oid = document.oid();

        match self.state(oid) {
            DocumentState::ScheduledRemove => Err(SessionError::IllegalState(format!(
                "{document:?} is scheduled for removal and cannot be persisted"
            ))),
            DocumentState::Detached => {
                let seq = self.next_seq();
                self.inserts.insert(oid, Queued { seq, item: document.clone() });
                self.states.insert(oid, DocumentState::ScheduledInsert);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Schedules a removal of a managed document, dropping its pending update and move.
    pub fn schedule_remove(&mut self, document: &DocumentHandle) -> SessionResult<()> {
        let oid = document.oid();

        match self.state(oid) {
            DocumentState::Managed | DocumentState::Dirty => {
                self.updates.shift_remove(&oid);
                self.moves.shift_remove(&oid);

                let seq = self.next_seq();
                self.removes.insert(oid, Queued { seq, item: document.clone() });
                self.states.insert(oid, DocumentState::ScheduledRemove);
                Ok(())
            }
            DocumentState::ScheduledRemove => Ok(()),
            state => Err(SessionError::IllegalState(format!(
                "cannot schedule removal of {document:?} in state {state:?}"
            ))),
        }
    }

    /// Records a relocation of a managed document. A later move of the same document keeps
    /// the original source path; moving it back to where it started cancels the move.
    pub fn schedule_move(
        &mut self,
        document: &DocumentHandle,
        from: &str,
        to: &str,
    ) -> SessionResult<()> {
        let oid = document.oid();

        if self.state(oid) != DocumentState::Managed {
            return Err(SessionError::IllegalState(format!(
                "cannot move {document:?} in state {:?}",
                self.state(oid)
            )));
        }

        if let Some(queued) = self.moves.get_mut(&oid) {
            if queued.item.from == to {
                self.moves.shift_remove(&oid);
            } else {
                queued.item.to = to.to_string();
            }
            return Ok(());
        }

        if from != to {
            let seq = self.next_seq();
            let item = ScheduledMove {
                document: document.clone(),
                from: from.to_string(),
                to: to.to_string(),
            };
            self.moves.insert(oid, Queued { seq, item });
        }

        Ok(())
    }

    /// Records the computed change set of a managed document.
    ///
    /// An existing update entry is refreshed; it is dropped when the changes disappear unless
    /// its pre event has already fired. A new entry is only created for a non-empty change
    /// set and is silent when the document was already announced in the running flush.
    pub fn record_change_set(&mut self, document: &DocumentHandle, change_set: ChangeSet) {
        let oid = document.oid();

        if self.state(oid) != DocumentState::Managed {
            return;
        }

        let announced = self.announced.contains(&oid);

        if let Some(queued) = self.updates.get_mut(&oid) {
            if change_set.is_empty() && !announced {
                self.updates.shift_remove(&oid);
            } else {
                queued.item.change_set = change_set;
            }
            return;
        }

        if !change_set.is_empty() {
            let seq = self.next_seq();
            let item = PendingUpdate {
                document: document.clone(),
                change_set,
                silent: announced,
            };
            self.updates.insert(oid, Queued { seq, item });
        }
    }

    pub fn has_update(&self, oid: Oid) -> bool {
        self.updates.contains_key(&oid)
    }

    pub fn is_silent_update(&self, oid: Oid) -> bool {
        self.updates.get(&oid).is_some_and(|queued| queued.item.silent)
    }

    /// Whether an operation of `kind` is still queued for the document.
    pub fn is_scheduled(&self, oid: Oid, kind: OperationKind) -> bool {
        match kind {
            OperationKind::Insert => self.inserts.contains_key(&oid),
            OperationKind::Update => self.updates.contains_key(&oid),
            OperationKind::Remove => self.removes.contains_key(&oid),
            OperationKind::Move => self.moves.contains_key(&oid),
        }
    }

    /// Marks the document as having received its pre event in the running flush.
    pub fn announce(&mut self, oid: Oid) {
        self.announced.insert(oid);
    }

    /// Forgets the per-flush announcements. Silent update entries that survive an aborted
    /// flush become regular ones again.
    pub fn end_flush(&mut self) {
        self.announced.clear();
        for queued in self.updates.values_mut() {
            queued.item.silent = false;
        }
    }

    pub fn has_pending(&self) -> bool {
        !(self.inserts.is_empty()
            && self.updates.is_empty()
            && self.removes.is_empty()
            && self.moves.is_empty())
    }

    pub fn inserts(&self) -> Vec<DocumentHandle> {
        self.inserts.values().map(|q| q.item.clone()).collect()
    }

    pub fn updates(&self) -> Vec<(DocumentHandle, ChangeSet)> {
        self.updates
            .values()
            .map(|q| (q.item.document.clone(), q.item.change_set.clone()))
            .collect()
    }

    pub fn removes(&self) -> Vec<DocumentHandle> {
        self.removes.values().map(|q| q.item.clone()).collect()
    }

    pub fn moves(&self) -> Vec<ScheduledMove> {
        self.moves.values().map(|q| q.item.clone()).collect()
    }

    /// All queued work in scheduling order.
    pub fn operations(&self) -> Vec<ScheduledOperation> {
        let mut ops = Vec::with_capacity(
            self.inserts.len() + self.updates.len() + self.removes.len() + self.moves.len(),
        );

        ops.extend(
            self.inserts
                .values()
                .map(|q| (q.seq, ScheduledOperation::Insert(q.item.clone()))),
        );
        ops.extend(self.updates.values().map(|q| {
            let op = ScheduledOperation::Update(q.item.document.clone(), q.item.change_set.clone());
            (q.seq, op)
        }));
        ops.extend(
            self.removes
                .values()
                .map(|q| (q.seq, ScheduledOperation::Remove(q.item.clone()))),
        );
        ops.extend(
            self.moves
                .values()
                .map(|q| (q.seq, ScheduledOperation::Move(q.item.clone()))),
        );

        ops.sort_by_key(|(seq, _)| *seq);
        ops.into_iter().map(|(_, op)| op).collect()
    }

    /// Queued inserts ordered so that every document comes after the queued documents it
    /// depends on. Independent documents keep scheduling order; dependency cycles are broken
    /// in scheduling order as well.
    pub fn ordered_inserts<F>(&self, dependencies: F) -> Vec<DocumentHandle>
    where
        F: Fn(&DocumentHandle) -> Vec<Oid>,
    {
        let mut visited = HashSet::with_capacity(self.inserts.len());
        let mut ordered = Vec::with_capacity(self.inserts.len());

        for oid in self.inserts.keys() {
            self.visit_insert(*oid, &dependencies, &mut visited, &mut ordered);
        }

        ordered
    }

    fn visit_insert<F>(
        &self,
        oid: Oid,
        dependencies: &F,
        visited: &mut HashSet<Oid>,
        ordered: &mut Vec<DocumentHandle>,
    ) where
        F: Fn(&DocumentHandle) -> Vec<Oid>,
    {
        if !visited.insert(oid) {
            return;
        }

        let Some(queued) = self.inserts.get(&oid) else {
            return;
        };

        let mut deps = dependencies(&queued.item)
            .into_iter()
            .filter(|dep| *dep != oid && self.inserts.contains_key(dep))
            .collect::<Vec<_>>();
        deps.sort_by_key(|dep| self.inserts.get_index_of(dep));

        for dep in deps {
            self.visit_insert(dep, dependencies, visited, ordered);
        }

        ordered.push(queued.item.clone());
    }

    /// Marks committed inserts managed and empties every queue.
    pub fn complete(&mut self) {
        for oid in self.inserts.keys() {
            self.states.insert(*oid, DocumentState::Managed);
        }

        self.inserts.clear();
        self.updates.clear();
        self.removes.clear();
        self.moves.clear();
        self.end_flush();
    }

    /// Forgets every tracked document.
    pub fn clear(&mut self) {
        self.states.clear();
        self.inserts.clear();
        self.updates.clear();
        self.removes.clear();
        self.moves.clear();
        self.announced.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        changeset::ChangeSetComputer,
        document::Document,
        mapping::{ClassMetadata, FieldKind},
    };

    fn handle() -> DocumentHandle {
        Document::new("CmsUser").into_handle()
    }

    fn dirty_change_set() -> ChangeSet {
        let meta = ClassMetadata::builder("CmsUser")
            .field("name", FieldKind::String)
            .build();
        let before = Document::new("CmsUser");
        let after = Document::new("CmsUser").with("name", "x");

        ChangeSetComputer::compute(&after, &ChangeSetComputer::capture(&before, &meta), &meta)
    }

    #[test]
    fn insert_after_remove_is_illegal() {
        let mut scheduler = Scheduler::new();
        let doc = handle();
        scheduler.manage(&doc);

        scheduler.schedule_remove(&doc).unwrap();
        let err = scheduler.schedule_insert(&doc).unwrap_err();

        assert!(err.is_illegal_state());
        assert_eq!(scheduler.state(doc.oid()), DocumentState::ScheduledRemove);
    }

    #[test]
    fn operations_follow_scheduling_order() {
        let mut scheduler = Scheduler::new();
        let managed = handle();
        let fresh = handle();
        scheduler.manage(&managed);

        scheduler.schedule_move(&managed, "/a", "/b").unwrap();
        scheduler.schedule_insert(&fresh).unwrap();
        scheduler.record_change_set(&managed, dirty_change_set());

        let kinds = scheduler
            .operations()
            .iter()
            .map(ScheduledOperation::kind)
            .collect::<Vec<_>>();

        assert_eq!(kinds, vec![OperationKind::Move, OperationKind::Insert, OperationKind::Update]);
    }

    #[test]
    fn remove_drops_pending_update_and_move() {
        let mut scheduler = Scheduler::new();
        let doc = handle();
        scheduler.manage(&doc);
        scheduler.record_change_set(&doc, dirty_change_set());
        scheduler.schedule_move(&doc, "/a", "/b").unwrap();

        scheduler.schedule_remove(&doc).unwrap();

        assert!(!scheduler.has_update(doc.oid()));
        assert!(scheduler.moves().is_empty());
        assert_eq!(scheduler.removes().len(), 1);
    }

    #[test]
    fn moving_back_cancels_the_move() {
        let mut scheduler = Scheduler::new();
        let doc = handle();
        scheduler.manage(&doc);

        scheduler.schedule_move(&doc, "/a", "/b").unwrap();
        scheduler.schedule_move(&doc, "/a", "/c").unwrap();
        assert_eq!(scheduler.moves()[0].to, "/c");

        scheduler.schedule_move(&doc, "/a", "/a").unwrap();
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn updates_recorded_after_announcement_are_silent() {
        let mut scheduler = Scheduler::new();
        let doc = handle();
        scheduler.manage(&doc);

        scheduler.announce(doc.oid());
        scheduler.record_change_set(&doc, dirty_change_set());
        assert!(scheduler.is_silent_update(doc.oid()));

        scheduler.end_flush();
        assert!(!scheduler.is_silent_update(doc.oid()));
    }

    #[test]
    fn empty_change_set_drops_unannounced_update() {
        let mut scheduler = Scheduler::new();
        let doc = handle();
        scheduler.manage(&doc);

        scheduler.record_change_set(&doc, dirty_change_set());
        scheduler.record_change_set(&doc, ChangeSet::default());
        assert!(!scheduler.has_update(doc.oid()));

        scheduler.record_change_set(&doc, dirty_change_set());
        scheduler.announce(doc.oid());
        scheduler.record_change_set(&doc, ChangeSet::default());
        assert!(scheduler.has_update(doc.oid()));
    }

    #[test]
    fn inserts_are_ordered_by_dependency_then_call_order() {
        let mut scheduler = Scheduler::new();
        let child = handle();
        let other = handle();
        let parent = handle();

        for doc in [&child, &other, &parent] {
            scheduler.schedule_insert(doc).unwrap();
        }

        let parent_oid = parent.oid();
        let child_oid = child.oid();
        let ordered = scheduler.ordered_inserts(|doc| {
            if doc.oid() == child_oid { vec![parent_oid] } else { vec![] }
        });

        let oids = ordered.iter().map(DocumentHandle::oid).collect::<Vec<_>>();
        assert_eq!(oids, vec![parent.oid(), child.oid(), other.oid()]);
    }

    #[test]
    fn complete_marks_inserts_managed() {
        let mut scheduler = Scheduler::new();
        let doc = handle();
        scheduler.schedule_insert(&doc).unwrap();

        scheduler.complete();

        assert_eq!(scheduler.state(doc.oid()), DocumentState::Managed);
        assert!(!scheduler.has_pending());
    }
}
