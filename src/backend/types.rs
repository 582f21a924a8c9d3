//! Records and addressing shared by every backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, ValidationError};
use crate::model::{Scope, VariableIdentity, is_valid_service_name, validate_key};

/// Record collections held by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// Current encrypted value per identity.
    Variables,
    /// Version history per identity.
    Versions,
}

/// Address of a record within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Scope of the variable.
    pub scope: Scope,
    /// Variable name.
    pub key: String,
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Address of the record.
    pub id: RecordKey,
    /// Stored payload: an encryption envelope for variables, JSON for versions.
    pub value: String,
    /// Whether the variable is a secret.
    #[serde(default)]
    pub sensitive: bool,
    /// Latest version number of the variable.
    #[serde(default)]
    pub version: u64,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
    /// Who performed the last write.
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl Collection {
    /// Returns the storage name of the collection.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Variables => "variables",
            Self::Versions => "versions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl RecordKey {
    /// Creates a record key.
    #[must_use]
    pub fn new(project: &str, environment: &str, scope: Scope, key: &str) -> Self {
        Self {
            project: project.to_string(),
            environment: environment.to_string(),
            scope,
            key: key.to_string(),
        }
    }

    /// Returns the storage path below the collection root:
    /// `<project>/<environment>/<scope marker>/<key>`.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment could escape its directory.
    pub fn storage_path(&self) -> Result<String> {
        if !is_valid_service_name(&self.project) {
            return Err(ValidationError::InvalidKey {
                key: self.project.clone(),
                reason: String::from("project name is not a valid path segment"),
            }
            .into());
        }
        if !is_valid_service_name(&self.environment) {
            return Err(ValidationError::InvalidEnvironment {
                name: self.environment.clone(),
            }
            .into());
        }
        validate_key(&self.key)?;

        Ok(format!(
            "{}/{}/{}/{}",
            self.project,
            self.environment,
            self.scope.storage_marker(),
            self.key
        ))
    }
}

impl From<&VariableIdentity> for RecordKey {
    fn from(identity: &VariableIdentity) -> Self {
        Self {
            project: identity.project.clone(),
            environment: identity.environment.clone(),
            scope: identity.scope.clone(),
            key: identity.key.clone(),
        }
    }
}

impl From<&RecordKey> for VariableIdentity {
    fn from(key: &RecordKey) -> Self {
        Self {
            project: key.project.clone(),
            environment: key.environment.clone(),
            scope: key.scope.clone(),
            key: key.key.clone(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.project, self.environment, self.scope, self.key
        )
    }
}

impl StoredRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(id: RecordKey, value: impl Into<String>, sensitive: bool, version: u64) -> Self {
        Self {
            id,
            value: value.into(),
            sensitive,
            version,
            updated_at: Utc::now(),
            updated_by: None,
        }
    }

    /// Sets the writer.
    #[must_use]
    pub fn with_updated_by(mut self, actor: impl Into<String>) -> Self {
        self.updated_by = Some(actor.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_path_uses_scope_marker() {
        let shared = RecordKey::new("app", "prd", Scope::Shared, "DB_URL");
        assert_eq!(shared.storage_path().expect("path"), "app/prd/__shared__/DB_URL");

        let service = RecordKey::new("app", "prd", Scope::Service(String::from("api")), "PORT");
        assert_eq!(service.storage_path().expect("path"), "app/prd/api/PORT");
    }

    #[test]
    fn test_storage_path_rejects_traversal() {
        assert!(RecordKey::new("app", "..", Scope::Shared, "A").storage_path().is_err());
        assert!(RecordKey::new("../app", "dev", Scope::Shared, "A").storage_path().is_err());
        assert!(RecordKey::new("app", "dev", Scope::Shared, "A/B").storage_path().is_err());
    }

    #[test]
    fn test_identity_conversion() {
        let identity = VariableIdentity::new("app", "dev", Scope::Shared, "A");
        let key = RecordKey::from(&identity);
        assert_eq!(VariableIdentity::from(&key), identity);
        assert_eq!(key.to_string(), identity.to_string());
    }
}
