use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use super::{fill_random, CryptoError};

/// PBKDF2 iteration count. Changing it changes every stored address.
pub const WORK_ITERATIONS: u32 = 100_000;
/// PBKDF2 output size in bytes
pub const WORK_KEY_SIZE: usize = 64;

/// Slow salted hash: PBKDF2-HMAC-SHA256
///
/// Output is unpadded base64url so it can be used directly as a path segment.
pub fn work(data: &str, salt: &str) -> String {
    let mut out = [0u8; WORK_KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(data.as_bytes(), salt.as_bytes(), WORK_ITERATIONS, &mut out);
    URL_SAFE_NO_PAD.encode(out)
}

/// Fast salted hash: SHA-256 over `data || salt`
pub fn hash(data: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hasher.update(salt.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

pub fn random_bytes(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buff = vec![0u8; len];
    fill_random(&mut buff)?;
    Ok(buff)
}

/// Random alphanumeric string, used for salts and store locations
pub fn random_string(len: usize) -> Result<String, CryptoError> {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    // bytes at or above this would favour the start of the alphabet
    const LIMIT: usize = 256 - 256 % ALPHABET.len();

    let mut out = String::with_capacity(len);
    while out.len() < len {
        for b in random_bytes(len - out.len())? {
            let b = b as usize;
            if b < LIMIT {
                out.push(ALPHABET[b % ALPHABET.len()] as char);
            }
        }
    }
    Ok(out)
}
