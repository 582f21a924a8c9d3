//! Variable scopes.
//!
//! A scope partitions the variable namespace of an environment: values either
//! apply to every service (`shared`) or to one named service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Marker used in storage paths for the shared scope.
///
/// Service names cannot start with an underscore, so the marker never
/// collides with a service.
pub const SHARED_MARKER: &str = "__shared__";

/// Prefix of the canonical service scope form.
const SERVICE_PREFIX: &str = "service:";

/// Partition of the variable namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    /// Applies to every service of the project.
    Shared,
    /// Applies to a single named service.
    Service(String),
}

/// Parses a scope from `shared`, `service:<name>` or a bare service name.
///
/// Returns `None` on malformed input; callers must turn that into an explicit
/// error rather than defaulting to a scope.
#[must_use]
pub fn parse_scope(raw: &str) -> Option<Scope> {
    let raw = raw.trim();
    if raw == "shared" {
        return Some(Scope::Shared);
    }

    let name = raw.strip_prefix(SERVICE_PREFIX).unwrap_or(raw);
    if is_valid_service_name(name) {
        Some(Scope::Service(name.to_string()))
    } else {
        None
    }
}

/// Checks a service name against `[A-Za-z0-9][A-Za-z0-9._-]*`.
#[must_use]
pub fn is_valid_service_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

impl Scope {
    /// Creates a service scope, validating the name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid service name.
    pub fn service(name: &str) -> Result<Self, ValidationError> {
        if is_valid_service_name(name) {
            Ok(Self::Service(name.to_string()))
        } else {
            Err(ValidationError::InvalidScope {
                raw: name.to_string(),
            })
        }
    }

    /// Returns true for the shared scope.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        matches!(self, Self::Shared)
    }

    /// Returns the service name, if this is a service scope.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        match self {
            Self::Shared => None,
            Self::Service(name) => Some(name),
        }
    }

    /// Returns the path segment used by storage backends.
    #[must_use]
    pub fn storage_marker(&self) -> &str {
        match self {
            Self::Shared => SHARED_MARKER,
            Self::Service(name) => name,
        }
    }

    /// Rebuilds a scope from a storage path segment.
    #[must_use]
    pub fn from_storage_marker(marker: &str) -> Option<Self> {
        if marker == SHARED_MARKER {
            Some(Self::Shared)
        } else if is_valid_service_name(marker) {
            Some(Self::Service(marker.to_string()))
        } else {
            None
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::Service(name) => write!(f, "{SERVICE_PREFIX}{name}"),
        }
    }
}

impl FromStr for Scope {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_scope(s).ok_or_else(|| ValidationError::InvalidScope { raw: s.to_string() })
    }
}

impl TryFrom<String> for Scope {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_forms() {
        assert_eq!(parse_scope("shared"), Some(Scope::Shared));
        assert_eq!(
            parse_scope("service:api"),
            Some(Scope::Service(String::from("api")))
        );
        assert_eq!(
            parse_scope("  worker-2 "),
            Some(Scope::Service(String::from("worker-2")))
        );
    }

    #[test]
    fn test_parse_malformed_returns_none() {
        assert_eq!(parse_scope(""), None);
        assert_eq!(parse_scope("service:"), None);
        assert_eq!(parse_scope("service:a:b"), None);
        assert_eq!(parse_scope("_hidden"), None);
        assert_eq!(parse_scope("svc/api"), None);
        assert!("service:".parse::<Scope>().is_err());
    }

    #[test]
    fn test_format_round_trip() {
        for raw in ["shared", "service:api", "service:web.front"] {
            let scope: Scope = raw.parse().expect("valid scope");
            assert_eq!(scope.to_string(), raw);
        }
    }

    #[test]
    fn test_bare_name_formats_canonically() {
        let scope: Scope = "api".parse().expect("valid scope");
        assert_eq!(scope.to_string(), "service:api");
        assert_eq!(scope, Scope::Service(String::from("api")));
    }

    #[test]
    fn test_storage_marker() {
        assert_eq!(Scope::Shared.storage_marker(), SHARED_MARKER);
        assert_eq!(Scope::from_storage_marker(SHARED_MARKER), Some(Scope::Shared));
        assert_eq!(
            Scope::from_storage_marker("api"),
            Some(Scope::Service(String::from("api")))
        );
        assert_eq!(Scope::from_storage_marker("__other__"), None);
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let json = serde_json::to_string(&Scope::Service(String::from("api"))).expect("serialize");
        assert_eq!(json, "\"service:api\"");
        let parsed: Scope = serde_json::from_str("\"shared\"").expect("deserialize");
        assert_eq!(parsed, Scope::Shared);
        assert!(serde_json::from_str::<Scope>("\"bad scope\"").is_err());
    }
}
