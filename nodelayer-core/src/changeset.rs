//! Snapshots and field-level change sets.
//!
//! A [`Snapshot`] is the captured state of a document's tracked fields at the last point it was
//! known to match the store. [`ChangeSetComputer::compute`] diffs the live document against it:
//! scalars by value, single references by instance identity, collections by order and
//! membership. A collection that is still unloaded cannot have been modified and never shows
//! up as a change.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::{
    document::{Document, Oid},
    mapping::ClassMetadata,
    reference::LoadState,
    value::Value,
};

/// Captured representation of one tracked field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldState {
    /// A scalar value (or `Null` for an unset field).
    Value(Value),
    /// A single reference, by instance identity.
    Reference(Oid),
    /// A collection whose members were not loaded when captured.
    Unloaded,
    /// The oids of a loaded collection, in order.
    Collection(Vec<Oid>),
}

impl FieldState {
    fn capture(value: Option<&Value>) -> Self {
        match value {
            None => FieldState::Value(Value::Null),
            Some(Value::Reference(target)) => FieldState::Reference(target.oid()),
            Some(Value::Collection(collection)) => match collection.state() {
                LoadState::Unloaded(_) => FieldState::Unloaded,
                LoadState::Loaded(docs) => {
                    FieldState::Collection(docs.iter().map(|d| d.oid()).collect())
                }
            },
            Some(scalar) => FieldState::Value(scalar.clone()),
        }
    }
}

/// Last-known-synchronized field values of a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    fields: BTreeMap<String, FieldState>,
}

impl Snapshot {
    pub fn get(&self, field: &str) -> Option<&FieldState> {
        self.fields.get(field)
    }

    /// Replaces an unloaded collection entry with its loaded membership. Loading does not
    /// change what the store holds, so the snapshot stays synchronized.
    pub fn mark_loaded(&mut self, field: &str, members: Vec<Oid>) {
        if let Some(state) = self.fields.get_mut(field) {
            if *state == FieldState::Unloaded {
                *state = FieldState::Collection(members);
            }
        }
    }

    /// Drops a member from a loaded collection entry.
    pub fn forget_member(&mut self, field: &str, member: Oid) {
        if let Some(FieldState::Collection(members)) = self.fields.get_mut(field) {
            members.retain(|oid| *oid != member);
        }
    }

    /// Appends a member to a loaded collection entry unless it is already listed.
    pub fn add_member(&mut self, field: &str, member: Oid) {
        if let Some(FieldState::Collection(members)) = self.fields.get_mut(field) {
            if !members.contains(&member) {
                members.push(member);
            }
        }
    }
}

/// Old and new state of a changed field. `old` is `None` when the field was never captured.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub old: Option<FieldState>,
    pub new: FieldState,
}

/// Ordered mapping of field name to change; empty means nothing to write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: IndexMap<String, FieldChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.changes.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.changes.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldChange)> {
        self.changes.iter().map(|(name, change)| (name.as_str(), change))
    }
}

/// Computes snapshots and change sets from mapping metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeSetComputer;

impl ChangeSetComputer {
    /// Captures the tracked fields of `document`.
    pub fn capture(document: &Document, metadata: &ClassMetadata) -> Snapshot {
        let fields = metadata
            .tracked_fields()
            .map(|(name, _)| (name.to_string(), FieldState::capture(document.get(name))))
            .collect();

        Snapshot { fields }
    }

    /// Diffs `document` against `snapshot`, in field declaration order.
    pub fn compute(document: &Document, snapshot: &Snapshot, metadata: &ClassMetadata) -> ChangeSet {
        let mut changes = IndexMap::new();

        for (name, _) in metadata.tracked_fields() {
            let new = FieldState::capture(document.get(name));

            if new == FieldState::Unloaded {
                continue;
            }

            let old = snapshot.get(name).cloned();
            let unchanged = match &old {
                Some(old) => *old == new,
                None => new == FieldState::Value(Value::Null),
            };

            if !unchanged {
                changes.insert(name.to_string(), FieldChange { old, new });
            }
        }

        ChangeSet { changes }
    }
}
