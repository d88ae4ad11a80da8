//! Flushing: the event pipeline around a commit.
//!
//! A flush runs these phases in order:
//!
//! 1. `preFlush`
//! 2. one pre event per scheduled operation, in scheduling order, repeated until listeners
//!    stop introducing new work
//! 3. `onFlush`
//! 4. reconciliation of whatever `onFlush` changed
//! 5. commit: removes (deepest first), inserts (dependencies first), updates, moves
//! 6. one post event per committed operation
//! 7. `postFlush`
//!
//! Snapshots are taken when the commit is planned. Field changes made by pre listeners and by
//! `onFlush` are therefore part of the write, while changes made by post listeners are left
//! for the next flush. A document that becomes dirty after its pre event already fired (a
//! `preMove` listener renaming it, say) has its changes written without further events.

use std::{
    cmp::Reverse,
    collections::HashSet,
};

use bson::{Bson, Document as Properties};
use tracing::{debug, instrument, trace, warn};

use crate::{
    backend::RawNode,
    changeset::{ChangeSet, ChangeSetComputer, Snapshot},
    document::{DocumentHandle, Oid},
    error::{SessionError, SessionResult},
    event::Event,
    hydrate::Hydrator,
    identity_map::IdentityMap,
    mapping::{ClassMetadata, FieldKind, GENERIC_CLASS, MetadataProvider},
    path,
    scheduler::{OperationKind, ScheduledMove, ScheduledOperation},
    session::Session,
    value::Value,
};

impl Session {
    /// Commits all scheduled and dirty work to the store.
    ///
    /// Does nothing when there is no pending work. A failing listener or store write aborts
    /// the flush and returns the error; writes already issued stay in the store, and the
    /// session keeps its queues and snapshots as they were before the commit.
    ///
    /// # Errors
    ///
    /// [`SessionError::IllegalState`] when called from a listener of a running flush.
    #[instrument(skip(self))]
    pub fn flush(&mut self) -> SessionResult<()> {
        if self.flushing {
            return Err(SessionError::IllegalState(
                "flush called while a flush is running".to_string(),
            ));
        }

        self.flushing = true;
        let result = FlushCoordinator::new(self).run();
        self.flushing = false;
        self.scheduler.end_flush();

        if let Err(err) = &result {
            debug!(error = %err, "flush aborted");
        }

        result
    }
}

/// Store writes planned for one commit.
#[derive(Default)]
struct FlushPlan {
    removes: Vec<(DocumentHandle, String)>,
    inserts: Vec<RawNode>,
    updates: Vec<(String, Properties)>,
    moves: Vec<ScheduledMove>,
    snapshots: Vec<(Oid, Snapshot)>,
    operations: Vec<ScheduledOperation>,
}

/// Drives a single flush of a session.
pub(crate) struct FlushCoordinator<'s> {
    session: &'s mut Session,
}

impl<'s> FlushCoordinator<'s> {
    pub(crate) fn new(session: &'s mut Session) -> Self {
        Self { session }
    }

    fn run(self) -> SessionResult<()> {
        let session = self.session;

        session.compute_change_sets()?;
        if !session.scheduler.has_pending() {
            debug!("nothing to flush");
            return Ok(());
        }

        session.dispatch(Event::PreFlush, None)?;
        session.compute_change_sets()?;
        dispatch_pre_events(session)?;

        session.dispatch(Event::OnFlush, None)?;
        session.compute_change_sets()?;

        let plan = build_plan(session)?;
        debug!(
            removes = plan.removes.len(),
            inserts = plan.inserts.len(),
            updates = plan.updates.len(),
            moves = plan.moves.len(),
            "committing"
        );

        commit(session, &plan)?;
        let committed = complete(session, plan);

        for operation in &committed {
            session.dispatch(operation.kind().post_event(), Some(operation.document()))?;
        }

        session.dispatch(Event::PostFlush, None)
    }
}

/// Dispatches pre events until no unannounced operation is left. Listeners may schedule new
/// work, which gets its own pre event in the next round.
fn dispatch_pre_events(session: &mut Session) -> SessionResult<()> {
    let mut announced: HashSet<(Oid, OperationKind)> = HashSet::new();

    loop {
        let pending = session
            .scheduler
            .operations()
            .into_iter()
            .filter(|op| !announced.contains(&(op.document().oid(), op.kind())))
            .filter(|op| {
                op.kind() != OperationKind::Update
                    || !session.scheduler.is_silent_update(op.document().oid())
            })
            .collect::<Vec<_>>();

        if pending.is_empty() {
            return Ok(());
        }

        for op in pending {
            let oid = op.document().oid();
            announced.insert((oid, op.kind()));

            // an earlier listener of this round may have unscheduled it
            if !session.scheduler.is_scheduled(oid, op.kind()) {
                continue;
            }

            session.scheduler.announce(oid);
            session.dispatch(op.kind().pre_event(), Some(op.document()))?;
        }

        session.compute_change_sets()?;
    }
}

/// Builds every store write before any is issued, so that a mapping error leaves the store
/// untouched.
fn build_plan(session: &Session) -> SessionResult<FlushPlan> {
    let mut plan = FlushPlan::default();
    let metadata = session.metadata();
    let hydrator = session.hydrator.as_ref();

    let mut removes = session
        .scheduler
        .removes()
        .into_iter()
        .filter_map(|document| document.id().map(|id| (document, id)))
        .collect::<Vec<_>>();
    removes.sort_by_key(|(_, id)| Reverse(path::depth(id)));
    plan.removes = removes;

    let identity_map = &session.identity_map;
    let inserts = session
        .scheduler
        .ordered_inserts(|document| dependencies(identity_map, metadata, document));

    for document in inserts {
        let class = metadata.require(&document.class())?;
        let id = require_id(&document)?;

        let mut properties = hydrator.dehydrate(&document.borrow(), &class)?;
        if class.name != GENERIC_CLASS {
            properties.insert(session.config().class_property.clone(), class.name.clone());
        }

        plan.inserts.push(
            RawNode::new(id, class.node_type.clone())
                .with_uuid(document.uuid())
                .with_properties(properties),
        );
        plan.snapshots
            .push((document.oid(), ChangeSetComputer::capture(&document.borrow(), &class)));
    }

    for (document, change_set) in session.scheduler.updates() {
        let class = metadata.require(&document.class())?;
        let properties = changed_properties(hydrator, &document, &class, &change_set)?;

        if !properties.is_empty() {
            plan.updates.push((require_id(&document)?, properties));
        }
        plan.snapshots
            .push((document.oid(), ChangeSetComputer::capture(&document.borrow(), &class)));
    }

    for mut scheduled in session.scheduler.moves() {
        // earlier moves may have relocated the source already
        for earlier in &plan.moves {
            if let Some(rebased) = path::rebase(&scheduled.from, &earlier.from, &earlier.to) {
                scheduled.from = rebased;
            }
        }

        let class = metadata.require(&scheduled.document.class())?;
        let snapshot = ChangeSetComputer::capture(&scheduled.document.borrow(), &class);
        plan.snapshots.push((scheduled.document.oid(), snapshot));
        plan.moves.push(scheduled);
    }

    plan.operations = session
        .scheduler
        .operations()
        .into_iter()
        .filter(|op| {
            op.kind() != OperationKind::Update
                || !session.scheduler.is_silent_update(op.document().oid())
        })
        .collect();

    Ok(plan)
}

fn require_id(document: &DocumentHandle) -> SessionResult<String> {
    document
        .id()
        .ok_or_else(|| SessionError::InvalidDocument(format!("{document:?} has no id")))
}

/// Queued documents an insert has to wait for: its parent node and the targets of its
/// references.
fn dependencies(
    identity_map: &IdentityMap,
    metadata: &dyn MetadataProvider,
    document: &DocumentHandle,
) -> Vec<Oid> {
    let doc = document.borrow();
    let mut deps = Vec::new();

    if let Some(parent) = doc.id().and_then(path::parent).and_then(|p| identity_map.get(p)) {
        deps.push(parent.oid());
    }

    let Some(class) = metadata.class_metadata(doc.class()) else {
        return deps;
    };

    for (name, mapping) in &class.fields {
        if !matches!(
            mapping.kind,
            FieldKind::Parent | FieldKind::ReferenceOne | FieldKind::ReferenceMany
        ) {
            continue;
        }

        match doc.get(name) {
            Some(Value::Reference(target)) => deps.push(target.oid()),
            Some(Value::Collection(collection)) => {
                deps.extend(collection.oids().unwrap_or_default())
            }
            _ => {}
        }
    }

    deps
}

/// The node properties of the changed property fields. Fields that were unset are written
/// as `Null`, which removes the property.
fn changed_properties(
    hydrator: &dyn Hydrator,
    document: &DocumentHandle,
    class: &ClassMetadata,
    change_set: &ChangeSet,
) -> SessionResult<Properties> {
    let full = hydrator.dehydrate(&document.borrow(), class)?;
    let mut properties = Properties::new();

    for field in change_set.fields() {
        let Some(mapping) = class.field(field) else {
            continue;
        };
        if !mapping.kind.is_property() {
            continue;
        }

        let property = mapping.property_name(field);
        properties.insert(
            property.to_string(),
            full.get(property).cloned().unwrap_or(Bson::Null),
        );
    }

    Ok(properties)
}

fn commit(session: &Session, plan: &FlushPlan) -> SessionResult<()> {
    let store = session.store();

    for (_, path) in &plan.removes {
        trace!(%path, "remove node");
        store.remove_node(path)?;
    }

    for node in &plan.inserts {
        trace!(path = %node.path, "create node");
        store.create_node(node.clone())?;
    }

    for (path, properties) in &plan.updates {
        trace!(%path, properties = properties.len(), "write node");
        store.write_node(path, properties.clone())?;
    }

    for scheduled in &plan.moves {
        trace!(from = %scheduled.from, to = %scheduled.to, "move node");
        store.move_node(&scheduled.from, &scheduled.to)?;
    }

    Ok(())
}

/// Session bookkeeping after every write succeeded. Returns the operations that get post
/// events.
fn complete(session: &mut Session, plan: FlushPlan) -> Vec<ScheduledOperation> {
    for (document, path) in &plan.removes {
        for tracked in session.identity_map.subtree(path) {
            session.untrack(&tracked);
        }
        session.untrack(document);
    }

    for (oid, snapshot) in plan.snapshots {
        session.snapshots.insert(oid, snapshot);
    }

    session.scheduler.complete();

    for scheduled in &plan.moves {
        session.identity_map.rekey(&scheduled.from, &scheduled.to);

        let transferred =
            session.transfer_child(&scheduled.document, &scheduled.from, &scheduled.to, true);
        if let Err(err) = transferred {
            warn!(path = %scheduled.to, error = %err, "could not update children of moved document");
        }
        if let Err(err) = session.relink(&scheduled.document, &scheduled.to) {
            warn!(path = %scheduled.to, error = %err, "could not relink moved document");
        }
    }

    plan.operations
}
