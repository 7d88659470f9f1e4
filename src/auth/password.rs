//! Password hashing for principals: salted HMAC-SHA256, hex-encoded,
//! verified with a constant-time comparison.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Returns `(hash_hex, salt_hex)` for a new password.
pub fn hash_password(password: &str) -> (String, String) {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let salt_hex = hex::encode(salt);
    (digest(password, &salt_hex), salt_hex)
}

pub fn verify_password(password: &str, hash_hex: &str, salt_hex: &str) -> bool {
    let computed = digest(password, salt_hex);
    computed.as_bytes().ct_eq(hash_hex.as_bytes()).into()
}

fn digest(password: &str, salt_hex: &str) -> String {
    // new_from_slice only fails on unusable key lengths; any length is fine
    // for HMAC-SHA256, so this cannot panic for a hex salt.
    let mut mac = Hmac::<Sha256>::new_from_slice(salt_hex.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(password.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time equality for configured API keys.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
