//! Scope and variable model.
//!
//! This module holds the identity and classification rules shared by every
//! other component: scopes, keys, write syntax and the sensitivity heuristic.

mod scope;
mod variable;

pub use scope::{is_valid_service_name, parse_scope, Scope, SHARED_MARKER};
pub use variable::{
    glob_match, is_probably_sensitive, parse_assignment, validate_key, Assignment,
    SensitivityChoice, Variable, VariableIdentity,
};
