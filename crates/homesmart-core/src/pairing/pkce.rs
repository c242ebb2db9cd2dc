// ── PKCE verifier / challenge ──

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of a generated code verifier.
pub const VERIFIER_LEN: usize = 128;

/// A fresh alphanumeric code verifier drawn from the OS CSPRNG.
pub fn generate_verifier() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(VERIFIER_LEN)
        .map(char::from)
        .collect()
}

/// Unpadded base64url SHA-256 digest of the verifier.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
