//! Error types and result types for sessions and node stores.
//!
//! Two layers of errors exist. [`StoreError`] is what a [`NodeStore`](crate::backend::NodeStore)
//! driver reports; [`SessionError`] is what the unit of work reports and wraps store errors
//! without altering them.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use uuid::Uuid;

use crate::event::Event;

/// Errors raised by a node store driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// No node exists at the given path.
    #[error("Node not found: {0}")]
    NotFound(String),
    /// A node already exists at the given path.
    #[error("Node already exists: {0}")]
    AlreadyExists(String),
    /// The parent of the given path does not exist.
    #[error("Parent node not found for {0}")]
    ParentNotFound(String),
    /// The path is not an absolute, normalized store path.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    /// Another node already carries this uuid.
    #[error("Duplicate node uuid {0}")]
    DuplicateUuid(Uuid),
    /// Properties could not be encoded or decoded by the store.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Any other failure of the underlying storage.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for node store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Represents all errors a [`Session`](crate::session::Session) can report.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The requested operation conflicts with the current scheduling state,
    /// e.g. persisting a document that is scheduled for removal.
    #[error("Illegal state: {0}")]
    IllegalState(String),
    /// The backing store failed. The store error is passed through untouched.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A listener returned an error while handling `event`. Remaining dispatch
    /// for the flush was aborted.
    #[error("Listener for {event} failed: {source}")]
    Listener {
        event: Event,
        #[source]
        source: Box<SessionError>,
    },
    /// No mapping metadata is registered for the class.
    #[error("No mapping for class {0}")]
    Mapping(String),
    /// The document cannot be mapped to a node as it currently stands.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// A listener registration was rejected.
    #[error("Invalid listener: {0}")]
    InvalidListener(String),
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Serialization error when converting between representations.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SessionError {
    /// Returns `true` for [`SessionError::IllegalState`].
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, SessionError::IllegalState(_))
    }

    /// Returns the store error when this is a store failure.
    pub fn as_store_error(&self) -> Option<&StoreError> {
        match self {
            SessionError::Store(err) => Some(err),
            _ => None,
        }
    }
}

/// A specialized `Result` type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

impl From<BsonError> for SessionError {
    fn from(err: BsonError) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for SessionError {
    fn from(err: SerdeJsonError) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

impl From<BsonError> for StoreError {
    fn from(err: BsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
