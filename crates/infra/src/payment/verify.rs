//! Notify envelope signature verification.
//!
//! The provider signs `timestamp\nnonce\nbody\n` with its platform RSA key
//! (PKCS#1 v1.5, SHA-256).

use base64::Engine;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::sha2::Sha256;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;

use super::PayError;

/// Signature headers accompanying a notify request.
#[derive(Debug, Clone)]
pub struct NotifySignature {
    pub timestamp: String,
    pub nonce: String,
    /// Base64 signature.
    pub signature: String,
    pub serial: String,
}

impl NotifySignature {
    pub fn is_complete(&self) -> bool {
        !self.timestamp.is_empty()
            && !self.nonce.is_empty()
            && !self.signature.is_empty()
            && !self.serial.is_empty()
    }
}

pub trait NotifyVerifier: Send + Sync {
    fn verify(&self, sig: &NotifySignature, body: &[u8]) -> Result<(), PayError>;
}

pub struct RsaNotifyVerifier {
    key: VerifyingKey<Sha256>,
}

impl RsaNotifyVerifier {
    pub fn from_public_key_pem(pem: &str) -> Result<Self, PayError> {
        let key = RsaPublicKey::from_public_key_pem(pem.trim())
            .map_err(|e| PayError::Config(format!("解析平台公钥失败: {e}")))?;
        Ok(Self {
            key: VerifyingKey::new(key),
        })
    }

    pub fn from_public_key(key: RsaPublicKey) -> Self {
        Self {
            key: VerifyingKey::new(key),
        }
    }
}

impl NotifyVerifier for RsaNotifyVerifier {
    fn verify(&self, sig: &NotifySignature, body: &[u8]) -> Result<(), PayError> {
        if !sig.is_complete() {
            return Err(PayError::Signature("缺少验签头".to_string()));
        }
        let raw = base64::engine::general_purpose::STANDARD
            .decode(&sig.signature)
            .map_err(|e| PayError::Signature(e.to_string()))?;
        let signature =
            Signature::try_from(raw.as_slice()).map_err(|e| PayError::Signature(e.to_string()))?;

        let mut message =
            Vec::with_capacity(sig.timestamp.len() + sig.nonce.len() + body.len() + 3);
        message.extend_from_slice(sig.timestamp.as_bytes());
        message.push(b'\n');
        message.extend_from_slice(sig.nonce.as_bytes());
        message.push(b'\n');
        message.extend_from_slice(body);
        message.push(b'\n');

        self.key
            .verify(&message, &signature)
            .map_err(|_| PayError::Signature("平台公钥验证未通过".to_string()))
    }
}

/// Stands in when no platform verification material is configured: every
/// notification is refused as a server-side configuration error.
pub struct MissingMaterialVerifier;

impl NotifyVerifier for MissingMaterialVerifier {
    fn verify(&self, _sig: &NotifySignature, _body: &[u8]) -> Result<(), PayError> {
        Err(PayError::Config("缺少平台验签材料".to_string()))
    }
}

/// Accepts everything. Only wired together with the mock payment provider
/// (dev mode and tests).
pub struct InsecureAcceptAllVerifier;

impl NotifyVerifier for InsecureAcceptAllVerifier {
    fn verify(&self, _sig: &NotifySignature, _body: &[u8]) -> Result<(), PayError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::RsaPrivateKey;

    fn signed(body: &[u8], ts: &str, nonce: &str) -> (RsaNotifyVerifier, NotifySignature) {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = private.to_public_key();
        let signer = SigningKey::<Sha256>::new(private);

        let mut message = Vec::new();
        message.extend_from_slice(ts.as_bytes());
        message.push(b'\n');
        message.extend_from_slice(nonce.as_bytes());
        message.push(b'\n');
        message.extend_from_slice(body);
        message.push(b'\n');
        let signature = signer.sign(&message);

        (
            RsaNotifyVerifier::from_public_key(public),
            NotifySignature {
                timestamp: ts.to_string(),
                nonce: nonce.to_string(),
                signature: base64::engine::general_purpose::STANDARD.encode(signature.to_vec()),
                serial: "SERIAL".to_string(),
            },
        )
    }

    #[test]
    fn valid_signature_verifies() {
        let (verifier, sig) = signed(b"{\"a\":1}", "123", "nonce");
        verifier.verify(&sig, b"{\"a\":1}").unwrap();
    }

    #[test]
    fn tampered_body_is_rejected() {
        let (verifier, sig) = signed(b"{\"a\":1}", "123", "nonce");
        assert!(verifier.verify(&sig, b"{\"a\":2}").is_err());
    }

    #[test]
    fn missing_headers_are_rejected() {
        let (verifier, mut sig) = signed(b"x", "123", "nonce");
        sig.serial.clear();
        assert!(matches!(
            verifier.verify(&sig, b"x"),
            Err(PayError::Signature(_))
        ));
    }
}
