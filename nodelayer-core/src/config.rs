//! Session configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// Tunables of a [`Session`](crate::session::Session).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```ignore
/// let config = SessionConfig::from_json(r#"{ "cascade_remove_descendants": false }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Node property recording the mapped class of a stored document.
    pub class_property: String,
    /// Node type of intermediate nodes created by `ensure_path`.
    pub default_node_type: String,
    /// Whether removing a document also schedules removal of its tracked descendants.
    pub cascade_remove_descendants: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            class_property: "nodelayer:class".to_string(),
            default_node_type: "nt:unstructured".to_string(),
            cascade_remove_descendants: true,
        }
    }
}

impl SessionConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// [`SessionError::Config`] for malformed JSON or fields of the wrong type.
    pub fn from_json(json: &str) -> SessionResult<Self> {
        serde_json::from_str(json).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> SessionResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SessionError::Config(format!("{}: {e}", path.as_ref().display())))?;

        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SessionConfig::from_json(r#"{ "cascade_remove_descendants": false }"#).unwrap();

        assert!(!config.cascade_remove_descendants);
        assert_eq!(config.class_property, "nodelayer:class");
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = SessionConfig::from_json("{ nope").unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }
}
