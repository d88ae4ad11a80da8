//! Mapping metadata: how document classes map onto store nodes.
//!
//! Metadata is supplied by a [`MetadataProvider`]. [`MetadataRegistry`] is the provided
//! implementation; it can be assembled with [`ClassMetadata::builder`] or loaded from JSON.
//!
//! # Example
//!
//! ```ignore
//! use nodelayer::mapping::{ClassMetadata, FieldKind, IdStrategy, MetadataRegistry};
//!
//! let registry = MetadataRegistry::builder()
//!     .class(
//!         ClassMetadata::builder("CmsTag")
//!             .referenceable(true)
//!             .id_strategy(IdStrategy::Parent)
//!             .field("name", FieldKind::NodeName)
//!             .field("parent", FieldKind::Parent)
//!             .field("references", FieldKind::ReferenceMany)
//!             .build(),
//!     )
//!     .build();
//! ```

use std::{collections::HashMap, fmt::Debug, path::Path, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// Class used for nodes that carry no class marker.
pub const GENERIC_CLASS: &str = "Generic";

/// How the path identity of a newly persisted document is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// The application sets the id before persisting.
    #[default]
    Assigned,
    /// `parent.id + "/" + nodename`.
    Parent,
    /// `parent.id + "/" + <random uuid>`, or directly below the root without a parent.
    Generated,
}

/// The kind of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Long,
    Double,
    Boolean,
    Date,
    Binary,
    ReferenceOne,
    ReferenceMany,
    /// The parent document, derived from the path.
    Parent,
    /// The last path segment.
    NodeName,
    /// The ordered child documents.
    Children,
}

impl FieldKind {
    /// Whether the field is written to a node property.
    pub fn is_property(&self) -> bool {
        !matches!(self, FieldKind::Parent | FieldKind::NodeName | FieldKind::Children)
    }

    /// Whether the field is part of the change-tracked state.
    pub fn is_tracked(&self) -> bool {
        self.is_property() || matches!(self, FieldKind::Children)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldKind::ReferenceOne | FieldKind::ReferenceMany)
    }
}

/// Which scheduling operations propagate through a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Cascade {
    pub persist: bool,
    pub remove: bool,
}

impl Cascade {
    pub const NONE: Cascade = Cascade { persist: false, remove: false };
    pub const PERSIST: Cascade = Cascade { persist: true, remove: false };
    pub const ALL: Cascade = Cascade { persist: true, remove: true };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub kind: FieldKind,
    /// Node property name; defaults to the field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cascade: Option<Cascade>,
}

impl FieldMapping {
    pub fn new(kind: FieldKind) -> Self {
        Self { kind, property: None, cascade: None }
    }

    pub fn property_name<'a>(&'a self, field: &'a str) -> &'a str {
        self.property.as_deref().unwrap_or(field)
    }

    /// The effective cascade policy. References and children cascade persist unless told
    /// otherwise; nothing cascades remove by default.
    pub fn cascade(&self) -> Cascade {
        self.cascade.unwrap_or(match self.kind {
            FieldKind::ReferenceOne | FieldKind::ReferenceMany | FieldKind::Children => {
                Cascade::PERSIST
            }
            _ => Cascade::NONE,
        })
    }
}

/// Mapping of one document class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetadata {
    pub name: String,
    #[serde(default = "default_node_type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default)]
    pub referenceable: bool,
    #[serde(default)]
    pub id_strategy: IdStrategy,
    #[serde(default)]
    pub fields: IndexMap<String, FieldMapping>,
}

fn default_node_type() -> String {
    "nt:unstructured".to_string()
}

impl ClassMetadata {
    pub fn builder(name: impl Into<String>) -> ClassMetadataBuilder {
        ClassMetadataBuilder {
            metadata: ClassMetadata {
                name: name.into(),
                node_type: default_node_type(),
                extends: None,
                referenceable: false,
                id_strategy: IdStrategy::Assigned,
                fields: IndexMap::new(),
            },
        }
    }

    /// Metadata for nodes without a class marker: only the node name is mapped.
    pub fn generic() -> Self {
        ClassMetadata::builder(GENERIC_CLASS)
            .field("nodename", FieldKind::NodeName)
            .build()
    }

    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.fields.get(name)
    }

    fn first_of(&self, kind: FieldKind) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, mapping)| mapping.kind == kind)
            .map(|(name, _)| name.as_str())
    }

    pub fn parent_field(&self) -> Option<&str> {
        self.first_of(FieldKind::Parent)
    }

    pub fn node_name_field(&self) -> Option<&str> {
        self.first_of(FieldKind::NodeName)
    }

    pub fn children_field(&self) -> Option<&str> {
        self.first_of(FieldKind::Children)
    }

    /// Fields whose values are written to node properties, in declaration order.
    pub fn property_fields(&self) -> impl Iterator<Item = (&str, &FieldMapping)> {
        self.fields
            .iter()
            .filter(|(_, mapping)| mapping.kind.is_property())
            .map(|(name, mapping)| (name.as_str(), mapping))
    }

    /// Fields that take part in change tracking, in declaration order.
    pub fn tracked_fields(&self) -> impl Iterator<Item = (&str, &FieldMapping)> {
        self.fields
            .iter()
            .filter(|(_, mapping)| mapping.kind.is_tracked())
            .map(|(name, mapping)| (name.as_str(), mapping))
    }

    /// Single and many reference fields together with their cascade policy.
    pub fn reference_fields(&self) -> impl Iterator<Item = (&str, &FieldMapping)> {
        self.fields
            .iter()
            .filter(|(_, mapping)| mapping.kind.is_reference())
            .map(|(name, mapping)| (name.as_str(), mapping))
    }
}

pub struct ClassMetadataBuilder {
    metadata: ClassMetadata,
}

impl ClassMetadataBuilder {
    pub fn node_type(mut self, node_type: impl Into<String>) -> Self {
        self.metadata.node_type = node_type.into();
        self
    }

    pub fn extends(mut self, class: impl Into<String>) -> Self {
        self.metadata.extends = Some(class.into());
        self
    }

    pub fn referenceable(mut self, referenceable: bool) -> Self {
        self.metadata.referenceable = referenceable;
        self
    }

    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.metadata.id_strategy = strategy;
        self
    }

    pub fn field(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.mapped(name, FieldMapping::new(kind))
    }

    pub fn mapped(mut self, name: impl Into<String>, mapping: FieldMapping) -> Self {
        self.metadata.fields.insert(name.into(), mapping);
        self
    }

    pub fn build(self) -> ClassMetadata {
        self.metadata
    }
}

/// Source of mapping metadata consumed by the session.
pub trait MetadataProvider: Debug {
    /// Metadata for the class, if mapped.
    fn class_metadata(&self, class: &str) -> Option<Arc<ClassMetadata>>;

    /// Type guard: whether `class` is `of` or extends it, directly or transitively.
    fn is_instance(&self, class: &str, of: &str) -> bool {
        let mut current = Some(class.to_string());
        let mut hops = 0;

        while let Some(name) = current {
            if name == of {
                return true;
            }

            // guards against cyclic `extends` declarations
            hops += 1;
            if hops > 64 {
                return false;
            }

            current = self
                .class_metadata(&name)
                .and_then(|meta| meta.extends.clone());
        }

        false
    }

    /// Metadata for the class, or [`SessionError::Mapping`].
    fn require(&self, class: &str) -> SessionResult<Arc<ClassMetadata>> {
        self.class_metadata(class)
            .ok_or_else(|| SessionError::Mapping(class.to_string()))
    }
}

/// In-memory registry of class mappings. The generic class is always present.
#[derive(Debug, Clone)]
pub struct MetadataRegistry {
    classes: HashMap<String, Arc<ClassMetadata>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        let generic = ClassMetadata::generic();
        Self {
            classes: HashMap::from([(generic.name.clone(), Arc::new(generic))]),
        }
    }

    pub fn builder() -> MetadataRegistryBuilder {
        MetadataRegistryBuilder { registry: MetadataRegistry::new() }
    }

    pub fn register(&mut self, metadata: ClassMetadata) {
        self.classes.insert(metadata.name.clone(), Arc::new(metadata));
    }

    /// Loads a registry from a JSON array of class mappings.
    pub fn from_json(json: &str) -> SessionResult<Self> {
        let classes: Vec<ClassMetadata> = serde_json::from_str(json)?;
        let mut registry = MetadataRegistry::new();

        for class in classes {
            registry.register(class);
        }

        Ok(registry)
    }

    pub fn from_path(path: impl AsRef<Path>) -> SessionResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SessionError::Config(format!("{}: {e}", path.as_ref().display())))?;

        Self::from_json(&json)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassMetadata> {
        self.classes.values().map(AsRef::as_ref)
    }
}

impl Default for MetadataRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataProvider for MetadataRegistry {
    fn class_metadata(&self, class: &str) -> Option<Arc<ClassMetadata>> {
        self.classes.get(class).cloned()
    }
}

pub struct MetadataRegistryBuilder {
    registry: MetadataRegistry,
}

impl MetadataRegistryBuilder {
    pub fn class(mut self, metadata: ClassMetadata) -> Self {
        self.registry.register(metadata);
        self
    }

    pub fn build(self) -> MetadataRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_mappings_from_json() {
        let registry = MetadataRegistry::from_json(
            r#"[
                {
                    "name": "CmsTag",
                    "referenceable": true,
                    "id_strategy": "parent",
                    "fields": {
                        "name": { "kind": "node_name" },
                        "parent": { "kind": "parent" },
                        "references": { "kind": "reference_many", "cascade": { "persist": false } }
                    }
                }
            ]"#,
        )
        .unwrap();

        let tag = registry.class_metadata("CmsTag").unwrap();
        assert_eq!(tag.id_strategy, IdStrategy::Parent);
        assert_eq!(tag.parent_field(), Some("parent"));
        assert_eq!(tag.node_name_field(), Some("name"));
        assert_eq!(tag.field("references").unwrap().cascade(), Cascade::NONE);
        assert!(registry.class_metadata(GENERIC_CLASS).is_some());
    }

    #[test]
    fn type_guard_follows_extends() {
        let registry = MetadataRegistry::builder()
            .class(ClassMetadata::builder("CmsItem").build())
            .class(ClassMetadata::builder("CmsSpecialItem").extends("CmsItem").build())
            .build();

        assert!(registry.is_instance("CmsSpecialItem", "CmsItem"));
        assert!(registry.is_instance("CmsItem", "CmsItem"));
        assert!(!registry.is_instance("CmsItem", "CmsSpecialItem"));
    }

    #[test]
    fn default_cascade_by_kind() {
        assert_eq!(FieldMapping::new(FieldKind::ReferenceMany).cascade(), Cascade::PERSIST);
        assert_eq!(FieldMapping::new(FieldKind::String).cascade(), Cascade::NONE);
        assert!(!FieldKind::Parent.is_tracked());
        assert!(FieldKind::Children.is_tracked());
        assert!(!FieldKind::Children.is_property());
    }
}
