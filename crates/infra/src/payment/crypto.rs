//! AEAD handling for the notify resource (AES-256-GCM, provider scheme).

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;

use super::PayError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Decrypt a base64 ciphertext with the shared 32-byte API key.
pub fn decrypt_resource(
    api_key: &str,
    associated_data: &str,
    nonce: &str,
    ciphertext_b64: &str,
) -> Result<Vec<u8>, PayError> {
    let cipher = cipher_for(api_key)?;
    if nonce.len() != NONCE_LEN {
        return Err(PayError::Crypto(format!(
            "nonce 长度必须为 {NONCE_LEN} 字节"
        )));
    }
    let ct = base64::engine::general_purpose::STANDARD
        .decode(ciphertext_b64)
        .map_err(|e| PayError::Crypto(e.to_string()))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce.as_bytes()),
            Payload {
                msg: &ct,
                aad: associated_data.as_bytes(),
            },
        )
        .map_err(|e| PayError::Crypto(e.to_string()))
}

/// Provider-side encryption; used by the mock provider and tests to forge
/// notifications.
pub fn encrypt_resource(
    api_key: &str,
    associated_data: &str,
    nonce: &str,
    plaintext: &[u8],
) -> Result<String, PayError> {
    let cipher = cipher_for(api_key)?;
    if nonce.len() != NONCE_LEN {
        return Err(PayError::Crypto(format!(
            "nonce 长度必须为 {NONCE_LEN} 字节"
        )));
    }
    let ct = cipher
        .encrypt(
            Nonce::from_slice(nonce.as_bytes()),
            Payload {
                msg: plaintext,
                aad: associated_data.as_bytes(),
            },
        )
        .map_err(|e| PayError::Crypto(e.to_string()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(ct))
}

fn cipher_for(api_key: &str) -> Result<Aes256Gcm, PayError> {
    if api_key.len() != KEY_LEN {
        return Err(PayError::Crypto(format!(
            "APIv3Key 长度必须为 {KEY_LEN} 字节"
        )));
    }
    Aes256Gcm::new_from_slice(api_key.as_bytes()).map_err(|e| PayError::Crypto(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn roundtrips_with_associated_data() {
        let ct = encrypt_resource(KEY, "transaction", "abcdefghijkl", b"payload").unwrap();
        let plain = decrypt_resource(KEY, "transaction", "abcdefghijkl", &ct).unwrap();
        assert_eq!(plain, b"payload");
    }

    #[test]
    fn tampered_associated_data_fails() {
        let ct = encrypt_resource(KEY, "transaction", "abcdefghijkl", b"payload").unwrap();
        assert!(decrypt_resource(KEY, "other", "abcdefghijkl", &ct).is_err());
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        assert!(matches!(
            decrypt_resource("short", "", "abcdefghijkl", ""),
            Err(PayError::Crypto(_))
        ));
    }
}
