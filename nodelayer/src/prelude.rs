//! Convenient re-exports of commonly used types from nodelayer.
//!
//! ```ignore
//! use nodelayer::prelude::*;
//! ```
//!
//! This provides access to:
//! - Sessions and their configuration
//! - Documents, values and collections
//! - Mapping metadata
//! - Events and listeners
//! - Store traits and error types

pub use nodelayer_core::{
    backend::{NodeStore, NodeStoreBuilder, RawNode},
    changeset::{ChangeSet, FieldChange, FieldState},
    config::SessionConfig,
    document::{Document, DocumentHandle, Oid},
    error::{SessionError, SessionResult, StoreError, StoreResult},
    event::{Event, EventArgs, EventListener, EventManager, EventSubscriber},
    hydrate::{BsonHydrator, Hydrator},
    mapping::{Cascade, ClassMetadata, FieldKind, FieldMapping, IdStrategy, MetadataProvider, MetadataRegistry},
    reference::{LoadState, ReferenceMany, Source},
    scheduler::{DocumentState, ScheduledMove},
    session::{Session, SessionBuilder},
    value::Value,
};
