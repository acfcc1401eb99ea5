use crate::error::{Result, SquashError};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Number of characters of a layer id shown in log output.
const SHORT_ID_LEN: usize = 12;

const MAX_ATTEMPTS: usize = 32;

/// Generate a fresh 64-hex layer id.
///
/// The id is derived by hashing 32 bytes of OS randomness. An id whose first
/// 12 characters would parse as a decimal integer is rejected and drawn
/// again, so that short ids can never be confused with numeric arguments.
pub fn generate() -> Result<String> {
    for _ in 0..MAX_ATTEMPTS {
        let mut seed = [0u8; 32];
        seed[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        seed[16..].copy_from_slice(Uuid::new_v4().as_bytes());

        let id = format!("{:x}", Sha256::digest(seed));
        if short_id(&id).parse::<i64>().is_err() {
            return Ok(id);
        }
    }

    Err(SquashError::IdGen(format!(
        "no acceptable id after {} attempts",
        MAX_ATTEMPTS
    )))
}

/// Truncate a layer id to the customary 12-character short form.
pub fn short_id(id: &str) -> &str {
    &id[..id.len().min(SHORT_ID_LEN)]
}
