//! Configuration module for the Vaulter sync core.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `vaulter.yaml`
//! - Applying `VAULTER_*` environment overrides
//! - Validation of configuration values

mod spec;
mod parser;
mod validator;

pub use spec::{
    BackendConfig, BackendType, ConflictStrategy, EncryptionConfig, EncryptionMode,
    ExpectedScope, ForbiddenRules, KdfConfig, LocalConfig, PolicyConfig, PolicyMode,
    RequiredVariable, RetentionMode, RotationRule, ScopeRule, SyncConfig, VaulterConfig,
    VersioningConfig,
};
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use validator::{ConfigValidator, ValidationIssue, ValidationResult};
