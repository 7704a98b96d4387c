//! Key stretching and the byte-additive stream cipher.
//!
//! Every value produced here is text over the standard base64 alphabet, so it
//! can travel inside protocol payloads and persisted tables unchanged.
//!
//! ## Compatibility
//! `derive_key` is the historical transform used both for symmetric keys and
//! for password-verification hashes. It is unsalted and deterministic, which
//! makes it searchable for short inputs; it is kept bit-for-bit so existing
//! `users.db` / `sessions.db` files and deployed clients keep working. Do not
//! treat it as a password hash with any real strength.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Suffix appended to every seed before stretching.
const KEY_SUFFIX: &str = "codified in irreversibleDeme is good, very good!\n\r8@@";

/// Errors returned when a cipher text cannot be turned back into a message.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("invalid base64 in cipher text: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decoded message is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Returns `len` base64 characters deterministically derived from `seed`.
pub fn derive_key(seed: &str, len: usize) -> String {
    let mut material = Vec::with_capacity(seed.len() + KEY_SUFFIX.len());
    material.extend_from_slice(seed.as_bytes());
    material.extend_from_slice(KEY_SUFFIX.as_bytes());
    let material_len = material.len();

    let mut sum: usize = material.iter().map(|b| usize::from(*b)).sum();

    let out_len = len + material_len;
    let mut first = vec![0u8; out_len];
    let mut second = vec![0u8; out_len];
    let mut result = vec![0u8; out_len];

    for i in 0..out_len {
        let v1 = usize::from(material[i % material_len]);
        let v2 = v1 + usize::from(material[v1 % material_len]);
        let v3 = v2 + usize::from(material[v2 % material_len]);
        let v4 = v3 + usize::from(material[v3 % material_len]);
        sum = (sum + i + v4) & 255;
        first[i] = sum as u8;
        second[i] = sum as u8;
    }

    for i in 0..out_len {
        let v1 = usize::from(second[i]);
        let v2 = v1 + usize::from(second[v1 % out_len]);
        let v3 = v2 + usize::from(second[v2 % out_len]);
        let v4 = v3 + usize::from(second[v3 % out_len]);
        sum = (sum + v4) & 255;
        second[i] = sum as u8;
        result[i] = ((sum + usize::from(first[i])) & 255) as u8;
    }

    let mut encoded = STANDARD.encode(result);
    encoded.truncate(len);
    encoded
}

/// Returns `len` base64 characters built from cryptographically random bytes.
pub fn generate_key(len: usize) -> String {
    let bytes: Vec<u8> = (0..len).map(|_| rand::random::<u8>()).collect();
    let mut encoded = STANDARD.encode(bytes);
    encoded.truncate(len);
    encoded
}

/// Encrypts `message` with `key`. An empty message encodes to an empty string.
pub fn encode(key: &str, message: &str) -> String {
    let plain = STANDARD.encode(message.as_bytes());
    let stream = derive_key(key, plain.len());
    let mixed: Vec<u8> = plain
        .bytes()
        .zip(stream.bytes())
        .map(|(m, k)| m.wrapping_add(k))
        .collect();
    STANDARD.encode(mixed)
}

/// Reverses [`encode`].
pub fn decode(key: &str, cipher_text: &str) -> Result<String, CipherError> {
    let mixed = STANDARD.decode(cipher_text.as_bytes())?;
    let stream = derive_key(key, mixed.len());
    let plain: Vec<u8> = mixed
        .iter()
        .zip(stream.bytes())
        .map(|(c, k)| c.wrapping_sub(k))
        .collect();
    let message = STANDARD.decode(plain)?;
    Ok(String::from_utf8(message)?)
}
