use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::keys::{SignPublicKey, SignSecretKey};
use super::{envelope_body, CryptoError, ENVELOPE_PREFIX};

/// Marks a stored value as signed-and-encrypted
pub const SIGNED_PREFIX: char = '@';

#[derive(Debug, Serialize, Deserialize)]
struct SignedMessage {
    m: String,
    s: String,
}

/// Sign `data`, producing `SEA{"m":data,"s":signature}`
pub fn sign(data: &str, key: &SignSecretKey) -> Result<String, CryptoError> {
    let signature = key.sign(data.as_bytes());
    let signed = SignedMessage {
        m: data.to_string(),
        s: STANDARD.encode(signature.to_bytes()),
    };
    let body = serde_json::to_string(&signed).map_err(anyhow::Error::from)?;
    Ok(format!("{ENVELOPE_PREFIX}{body}"))
}

/// Verify a signed message and return the payload it carries
///
/// A leading [`SIGNED_PREFIX`] is accepted and ignored.
pub fn verify(signed: &str, key: &SignPublicKey) -> Result<String, CryptoError> {
    let signed = signed.strip_prefix(SIGNED_PREFIX).unwrap_or(signed);
    let body = envelope_body(signed)?;
    let message: SignedMessage =
        serde_json::from_str(body).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;

    let raw = STANDARD
        .decode(&message.s)
        .map_err(|_| CryptoError::SignatureInvalid)?;
    let raw: [u8; 64] = raw
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::SignatureInvalid)?;
    let signature = ed25519_dalek::Signature::from_bytes(&raw);

    key.verify(message.m.as_bytes(), &signature)?;
    Ok(message.m)
}
