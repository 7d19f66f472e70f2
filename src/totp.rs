//! RFC 6238 time-based one-time passwords over HMAC-SHA1.
//!
//! Verification accepts the single current 30-second step only. There is no
//! tolerance for clock skew, so a code generated right before a step
//! boundary is rejected once the boundary passes. Most TOTP deployments
//! accept one adjacent step on either side; widening the check here is a
//! security/compatibility trade-off to decide explicitly, not a bug fix.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::StoreError;

type HmacSha1 = Hmac<Sha1>;

pub const STEP_SECS: u64 = 30;
pub const CODE_DIGITS: u32 = 6;
/// 160 bits of secret material, matching the HMAC-SHA1 block.
pub const SECRET_BYTES: usize = 20;

const B32: base32::Alphabet = base32::Alphabet::RFC4648 { padding: false };

/// Fresh secret from the OS RNG, Base32 uppercase without padding so it can
/// be typed or pasted into an authenticator app.
pub fn new_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    base32::encode(B32, &bytes)
}

/// Code for the step containing `unix_secs`.
pub fn generate_at(secret_b32: &str, unix_secs: u64) -> Result<String, StoreError> {
    let key = decode_secret(secret_b32)?;
    let counter = unix_secs / STEP_SECS;
    let mut mac = HmacSha1::new_from_slice(&key).map_err(|_| StoreError::SecretFormat)?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // RFC 4226 dynamic truncation.
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);
    Ok(format!("{:01$}", binary % 10u32.pow(CODE_DIGITS), CODE_DIGITS as usize))
}

pub fn generate_now(secret_b32: &str) -> Result<String, StoreError> {
    generate_at(secret_b32, unix_now())
}

/// Exact match against the current step only.
pub fn verify_at(secret_b32: &str, candidate: &str, unix_secs: u64) -> Result<bool, StoreError> {
    let expected = generate_at(secret_b32, unix_secs)?;
    Ok(expected == candidate)
}

pub fn verify_now(secret_b32: &str, candidate: &str) -> Result<bool, StoreError> {
    verify_at(secret_b32, candidate, unix_now())
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn decode_secret(secret_b32: &str) -> Result<Vec<u8>, StoreError> {
    // The error stays opaque so the secret text never reaches a log or client.
    let bytes = base32::decode(B32, secret_b32.trim()).ok_or(StoreError::SecretFormat)?;
    if bytes.is_empty() {
        return Err(StoreError::SecretFormat);
    }
    Ok(bytes)
}
