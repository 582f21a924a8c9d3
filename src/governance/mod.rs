//! Write policy: scope rules, forbidden keys, sensitivity classification and
//! encoded-value detection.

mod checker;
mod encoding;

pub use checker::{GovernanceResult, VariableCheck, check_single_variable};
pub use encoding::{Confidence, EncodingDetection, EncodingKind, detect_encoding};
