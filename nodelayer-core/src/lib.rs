//! A unit of work for documents mapped onto a hierarchical, path-addressed node store.
//!
//! This crate is the core of the nodelayer project and provides:
//!
//! - **Documents** ([`document`], [`value`], [`reference`]) - Dynamic documents, shared handles and lazily loaded collections
//! - **Mapping metadata** ([`mapping`]) - How document classes map onto nodes
//! - **Store driver abstraction** ([`backend`]) - Traits for implementing node stores
//! - **Hydration** ([`hydrate`]) - Conversion between nodes and documents
//! - **Change tracking** ([`identity_map`], [`changeset`], [`scheduler`]) - Identity, snapshots and pending work
//! - **Lifecycle events** ([`event`]) - Listener registration and dispatch
//! - **Sessions** ([`session`], [`flush`]) - The public API and the flush pipeline
//! - **Configuration** ([`config`]) and **error handling** ([`error`])
//!
//! # Example
//!
//! ```ignore
//! use nodelayer_core::{
//!     document::Document,
//!     mapping::{ClassMetadata, FieldKind, MetadataRegistry},
//!     session::Session,
//! };
//!
//! let registry = MetadataRegistry::builder()
//!     .class(
//!         ClassMetadata::builder("CmsUser")
//!             .field("username", FieldKind::String)
//!             .build(),
//!     )
//!     .build();
//!
//! let mut session = Session::new(store, registry);
//! let user = Document::new("CmsUser")
//!     .with_id("/functional/user")
//!     .with("username", "lsmith")
//!     .into_handle();
//!
//! session.persist(&user)?;
//! session.flush()?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as nodelayer_core;

pub mod backend;
pub mod changeset;
pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod flush;
pub mod hydrate;
pub mod identity_map;
pub mod mapping;
pub mod path;
pub mod reference;
pub mod scheduler;
pub mod session;
pub mod value;
