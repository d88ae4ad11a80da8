//! In-memory node store for nodelayer.
//!
//! This crate provides a thread-safe, in-memory implementation of the `NodeStore` trait.
//! Nodes live in a single ordered tree behind a read-write lock, which makes it a good fit
//! for development, tests and short-lived tools.
//!
//! # Features
//!
//! - **Shared handles** - Clones of a store see the same tree
//! - **Hierarchical paths** - Parents must exist; moves and removals carry whole subtrees
//! - **Ordered children** - Siblings keep the order in which they were created or moved in
//! - **Uuid lookups** - Referenceable nodes are indexed by uuid
//!
//! # Quick Start
//!
//! ```ignore
//! use nodelayer::{prelude::*, memory::InMemoryNodeStore};
//!
//! let store = InMemoryNodeStore::builder().build()?;
//! let mut session = Session::new(store.clone(), registry);
//!
//! session.ensure_path("/functional")?;
//! assert!(store.node_exists("/functional")?);
//! ```

#[allow(unused_extern_crates)]
extern crate self as nodelayer_memory;

pub mod store;

pub use store::{InMemoryNodeStore, InMemoryNodeStoreBuilder};
