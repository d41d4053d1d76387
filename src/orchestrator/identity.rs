//! Session identity derivation.
//!
//! An identity is the leading hex characters of a SHA-256 digest over the
//! concatenated `name`, `version`, and worker type. Equal configurations
//! always map to the same identity; the registry treats a second request
//! for a live identity as a duplicate.

use sha2::{Digest, Sha256};

use crate::models::session::SessionConfig;

/// Compute the full SHA-256 hex digest of the given text.
fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Derive the identity token for a session configuration.
///
/// `length` is clamped to the digest width (64 hex characters).
#[must_use]
pub fn derive_identity(config: &SessionConfig, length: usize) -> String {
    let mut digest = sha256_hex(&format!("{}{}{}", config.name, config.version, config.kind));
    digest.truncate(length.min(64));
    digest
}

/// Whether two configurations hash to the same identity key.
///
/// Port and memory are not part of the identity.
#[must_use]
pub fn same_identity_key(a: &SessionConfig, b: &SessionConfig) -> bool {
    a.name == b.name && a.version == b.version && a.kind == b.kind
}
