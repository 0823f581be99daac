//! Contributor identity derivation.

use sha2::{Digest, Sha256};

/// Stable contributor id derived from profile fields.
///
/// Each field is length-prefixed before hashing, so no two distinct field
/// tuples can collide by shifting characters between fields.
pub fn derive_unique_id(name: &str, organization: &str, identity_key: &str) -> String {
    let mut hasher = Sha256::new();
    for field in [name, organization, identity_key] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    format!("uid-{}", hex::encode(hasher.finalize()))
}
