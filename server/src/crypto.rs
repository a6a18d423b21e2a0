//! Token and identifier helpers
//!
//! Bearer tokens are random 32-byte values handed to the client once; only
//! their SHA-256 hash is stored.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use ring::{digest, rand::{SecureRandom, SystemRandom}};

const SESSION_TOKEN_LENGTH: usize = 32;
const UPLOAD_SUFFIX_LENGTH: usize = 6;

/// Generate a new bearer token (base64url, 32 bytes)
pub fn generate_session_token() -> anyhow::Result<String> {
    let bytes = random_bytes::<SESSION_TOKEN_LENGTH>()?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a token for storage (SHA-256, hex)
pub fn hash_token(token: &str) -> String {
    let hash = digest::digest(&digest::SHA256, token.as_bytes());
    hex::encode(hash.as_ref())
}

/// Short random hex suffix used to disambiguate uploaded file names
pub fn upload_suffix() -> anyhow::Result<String> {
    let bytes = random_bytes::<UPLOAD_SUFFIX_LENGTH>()?;
    Ok(hex::encode(bytes))
}

fn random_bytes<const N: usize>() -> anyhow::Result<[u8; N]> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; N];
    rng.fill(&mut bytes)
        .map_err(|_| anyhow::anyhow!("Failed to generate random bytes"))?;
    Ok(bytes)
}
