//! Encryption key resolution and envelope encryption.
//!
//! Every value written to a backend is encrypted with key material resolved
//! per environment. Shared-scope values use the key of the configured shared
//! key environment.

mod cipher;
mod resolver;

pub use cipher::{
    KEY_SIZE, KeyMaterial, NONCE_SIZE, envelope_mode, generate_age_keypair, generate_passphrase,
};
pub use resolver::{GeneratedKey, KeyResolver};
