//! Main nodelayer crate: a unit of work for documents stored in a hierarchical node store.
//!
//! This crate is the primary entry point for users of nodelayer. It re-exports the core types
//! from `nodelayer-core` and gives access to the bundled store backends.
//!
//! # Features
//!
//! - **Identity map** - One instance per path within a session
//! - **Change tracking** - Snapshots and field-level change sets decide what gets written
//! - **Ordered commits** - Removes, inserts, updates and moves are written in a safe order
//! - **Lifecycle events** - Listeners hook into every phase of a flush and may schedule more work
//!
//! # Quick Start
//!
//! ```ignore
//! use nodelayer::{prelude::*, memory::InMemoryNodeStore};
//!
//! let registry = MetadataRegistry::builder()
//!     .class(
//!         ClassMetadata::builder("CmsUser")
//!             .field("name", FieldKind::String)
//!             .field("username", FieldKind::String)
//!             .build(),
//!     )
//!     .build();
//!
//! let mut session = Session::new(InMemoryNodeStore::new(), registry);
//! session.ensure_path("/functional")?;
//!
//! session.event_manager().listen(&[Event::PrePersist], |args: &mut EventArgs<'_>| {
//!     if let Some(user) = args.document() {
//!         user.set("name", "prepersist");
//!     }
//!     Ok(())
//! })?;
//!
//! let user = Document::new("CmsUser")
//!     .with_id("/functional/user")
//!     .with("username", "lsmith")
//!     .into_handle();
//!
//! session.persist(&user)?;
//! session.flush()?;
//!
//! // Later lookups after a clear hydrate fresh instances from the store.
//! session.clear()?;
//! let user = session.find(Some("CmsUser"), "/functional/user")?;
//! ```
//!
//! # Listeners with state
//!
//! Listeners that need configuration or bookkeeping implement [`event::EventSubscriber`]:
//!
//! ```ignore
//! use nodelayer::prelude::*;
//!
//! struct Audit;
//!
//! impl EventListener for Audit {
//!     fn on_event(&self, args: &mut EventArgs<'_>) -> SessionResult<()> {
//!         let session = args.session();
//!         for document in session.scheduled_inserts() {
//!             tracing::info!(?document, "inserting");
//!         }
//!         Ok(())
//!     }
//! }
//!
//! impl EventSubscriber for Audit {
//!     fn subscribed_events(&self) -> Vec<Event> {
//!         vec![Event::OnFlush]
//!     }
//! }
//!
//! session.event_manager().add_subscriber(std::rc::Rc::new(Audit))?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory node tree for development and testing

pub mod prelude;

pub use nodelayer_core::{
    backend, changeset, config, document, error, event, flush, hydrate, identity_map, mapping,
    path, reference, scheduler, session, value,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory store backend implementations.
pub mod memory {
    pub use nodelayer_memory::{InMemoryNodeStore, InMemoryNodeStoreBuilder};
}
