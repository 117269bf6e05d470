use sha2::{Digest, Sha256};

/// Hex encoded SHA-256 digest of a password. This is the only form in which a password is logged,
/// replicated or stored.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
