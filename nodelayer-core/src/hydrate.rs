//! Conversion between store nodes and documents.
//!
//! A [`Hydrator`] turns a [`RawNode`] into document fields and a document back into node
//! properties, driven by [`ClassMetadata`]. References are resolved through a
//! [`ReferenceResolver`], which the session implements on top of its identity map so that
//! reference cycles resolve to the instance already being hydrated.

use bson::{Binary, Bson, Document as Properties, spec::BinarySubtype};
use tracing::warn;
use uuid::Uuid;

use crate::{
    backend::RawNode,
    document::{Document, DocumentHandle, Fields},
    error::{SessionError, SessionResult},
    mapping::{ClassMetadata, FieldKind},
    path,
    reference::{LoadState, ReferenceMany, Source},
    value::Value,
};

/// Resolves references encountered while hydrating.
pub trait ReferenceResolver {
    fn resolve_uuid(&mut self, uuid: &Uuid) -> SessionResult<Option<DocumentHandle>>;

    fn resolve_path(&mut self, path: &str) -> SessionResult<Option<DocumentHandle>>;
}

/// Maps nodes to documents and back.
pub trait Hydrator {
    /// Builds the field values of a document from a node.
    fn hydrate(
        &self,
        node: &RawNode,
        metadata: &ClassMetadata,
        resolver: &mut dyn ReferenceResolver,
    ) -> SessionResult<Fields>;

    /// Produces the node properties of a document. Properties of unset fields are omitted.
    fn dehydrate(&self, document: &Document, metadata: &ClassMetadata) -> SessionResult<Properties>;
}

/// Hydrator storing scalars as BSON scalars and references as uuid strings.
#[derive(Debug, Clone, Default)]
pub struct BsonHydrator;

impl BsonHydrator {
    pub fn new() -> Self {
        Self
    }

    fn scalar_from_bson(
        node: &RawNode,
        property: &str,
        kind: FieldKind,
        bson: &Bson,
    ) -> SessionResult<Value> {
        let value = match (kind, bson) {
            (_, Bson::Null) => Value::Null,
            (FieldKind::String, Bson::String(s)) => Value::String(s.clone()),
            (FieldKind::Long, Bson::Int64(v)) => Value::Long(*v),
            (FieldKind::Long, Bson::Int32(v)) => Value::Long(*v as i64),
            (FieldKind::Double, Bson::Double(v)) => Value::Double(*v),
            (FieldKind::Double, Bson::Int64(v)) => Value::Double(*v as f64),
            (FieldKind::Boolean, Bson::Boolean(v)) => Value::Boolean(*v),
            (FieldKind::Date, Bson::DateTime(dt)) => Value::Date(dt.to_chrono()),
            (FieldKind::Binary, Bson::Binary(bin)) => Value::Binary(bin.bytes.clone()),
            _ => {
                return Err(SessionError::InvalidDocument(format!(
                    "property {property} of {} does not hold a {kind:?}",
                    node.path
                )));
            }
        };

        Ok(value)
    }

    fn scalar_to_bson(field: &str, kind: FieldKind, value: &Value) -> SessionResult<Bson> {
        let bson = match (kind, value) {
            (FieldKind::String, Value::String(s)) => Bson::String(s.clone()),
            (FieldKind::Long, Value::Long(v)) => Bson::Int64(*v),
            (FieldKind::Double, Value::Double(v)) => Bson::Double(*v),
            (FieldKind::Double, Value::Long(v)) => Bson::Double(*v as f64),
            (FieldKind::Boolean, Value::Boolean(v)) => Bson::Boolean(*v),
            (FieldKind::Date, Value::Date(dt)) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
            (FieldKind::Binary, Value::Binary(bytes)) => Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: bytes.clone(),
            }),
            _ => {
                return Err(SessionError::InvalidDocument(format!(
                    "field {field} is mapped as {kind:?} but holds {value:?}"
                )));
            }
        };

        Ok(bson)
    }

    fn uuid_of(field: &str, target: &DocumentHandle) -> SessionResult<Bson> {
        target
            .uuid()
            .map(|uuid| Bson::String(uuid.to_string()))
            .ok_or_else(|| {
                SessionError::InvalidDocument(format!(
                    "field {field} references {target:?}, which has no uuid; \
                     only referenceable documents can be referenced"
                ))
            })
    }

    fn parse_uuid(node: &RawNode, property: &str, bson: &Bson) -> SessionResult<Uuid> {
        match bson {
            Bson::String(s) => Uuid::parse_str(s).map_err(|e| {
                SessionError::InvalidDocument(format!(
                    "property {property} of {} holds an invalid uuid: {e}",
                    node.path
                ))
            }),
            other => Err(SessionError::InvalidDocument(format!(
                "property {property} of {} holds {other:?} instead of a reference",
                node.path
            ))),
        }
    }
}

impl Hydrator for BsonHydrator {
    fn hydrate(
        &self,
        node: &RawNode,
        metadata: &ClassMetadata,
        resolver: &mut dyn ReferenceResolver,
    ) -> SessionResult<Fields> {
        let mut fields = Fields::new();

        for (name, mapping) in &metadata.fields {
            let property = mapping.property_name(name);

            let value = match mapping.kind {
                FieldKind::Parent => match path::parent(&node.path) {
                    Some(parent) => resolver.resolve_path(parent)?.map(Value::Reference),
                    None => None,
                },
                FieldKind::NodeName => Some(Value::String(path::name(&node.path).to_string())),
                FieldKind::Children => Some(Value::Collection(ReferenceMany::unloaded(
                    Source::Children(node.path.clone()),
                ))),
                FieldKind::ReferenceOne => match node.property(property) {
                    None | Some(Bson::Null) => None,
                    Some(bson) => {
                        let uuid = Self::parse_uuid(node, property, bson)?;
                        let target = resolver.resolve_uuid(&uuid)?;

                        if target.is_none() {
                            warn!(path = %node.path, %property, %uuid, "dangling reference");
                        }

                        target.map(Value::Reference)
                    }
                },
                FieldKind::ReferenceMany => {
                    let uuids = match node.property(property) {
                        None | Some(Bson::Null) => Vec::new(),
                        Some(Bson::Array(items)) => items
                            .iter()
                            .map(|item| Self::parse_uuid(node, property, item))
                            .collect::<SessionResult<Vec<_>>>()?,
                        Some(other) => {
                            return Err(SessionError::InvalidDocument(format!(
                                "property {property} of {} holds {other:?} instead of a reference list",
                                node.path
                            )));
                        }
                    };

                    Some(Value::Collection(ReferenceMany::unloaded(Source::References(uuids))))
                }
                kind => match node.property(property) {
                    None => None,
                    Some(bson) => Some(Self::scalar_from_bson(node, property, kind, bson)?)
                        .filter(|value| !value.is_null()),
                },
            };

            if let Some(value) = value {
                fields.insert(name.clone(), value);
            }
        }

        Ok(fields)
    }

    fn dehydrate(&self, document: &Document, metadata: &ClassMetadata) -> SessionResult<Properties> {
        let mut properties = Properties::new();

        for (name, mapping) in metadata.property_fields() {
            let property = mapping.property_name(name);

            let value = match document.get(name) {
                None | Some(Value::Null) => continue,
                Some(value) => value,
            };

            let bson = match (mapping.kind, value) {
                (FieldKind::ReferenceOne, Value::Reference(target)) => Self::uuid_of(name, target)?,
                (FieldKind::ReferenceMany, Value::Collection(collection)) => {
                    let items = match collection.state() {
                        LoadState::Loaded(targets) => targets
                            .iter()
                            .map(|target| Self::uuid_of(name, target))
                            .collect::<SessionResult<Vec<_>>>()?,
                        LoadState::Unloaded(Source::References(uuids)) => uuids
                            .iter()
                            .map(|uuid| Bson::String(uuid.to_string()))
                            .collect(),
                        LoadState::Unloaded(Source::Children(_)) => {
                            return Err(SessionError::InvalidDocument(format!(
                                "field {name} holds a children collection but is mapped as references"
                            )));
                        }
                    };

                    Bson::Array(items)
                }
                (kind, value) => Self::scalar_to_bson(name, kind, value)?,
            };

            properties.insert(property.to_string(), bson);
        }

        Ok(properties)
    }
}
