//! Detached signature verification over announcement bodies.
//!
//! A site signs the exact bytes of its request body with its private key and
//! sends the signature, base64 encoded, in the `Authorization` header. The
//! registry verifies it against the PEM public key on file for the site.
//!
//! Supported keys:
//! - Ed25519, SubjectPublicKeyInfo PEM (`BEGIN PUBLIC KEY`).
//! - RSA, either SubjectPublicKeyInfo or PKCS#1 (`BEGIN RSA PUBLIC KEY`),
//!   verified as PKCS#1 v1.5 with SHA-1 or SHA-256.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;

/// Errors produced while parsing keys or checking signatures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("public key is not a supported PEM key")]
    UnsupportedKey,
    #[error("signature header is not valid base64")]
    InvalidEncoding,
    #[error("signature has the wrong shape for the key type")]
    Malformed,
    #[error("signature does not match message")]
    Mismatch,
}

/// A parsed site public key.
#[derive(Debug, Clone)]
pub enum SitePublicKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    Rsa(rsa::RsaPublicKey),
}

impl SitePublicKey {
    /// Parses a PEM public key, detecting its type.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::UnsupportedKey`] if the PEM is neither an
    /// Ed25519 nor an RSA public key.
    pub fn from_pem(pem: &str) -> Result<Self, SignatureError> {
        let pem = pem.trim();

        if pem.contains("BEGIN RSA PUBLIC KEY") {
            return <rsa::RsaPublicKey as rsa::pkcs1::DecodeRsaPublicKey>::from_pkcs1_pem(pem)
                .map(Self::Rsa)
                .map_err(|_| SignatureError::UnsupportedKey);
        }

        if let Ok(key) = <ed25519_dalek::VerifyingKey as ed25519_dalek::pkcs8::DecodePublicKey>::from_public_key_pem(pem) {
            return Ok(Self::Ed25519(key));
        }

        <rsa::RsaPublicKey as rsa::pkcs8::DecodePublicKey>::from_public_key_pem(pem)
            .map(Self::Rsa)
            .map_err(|_| SignatureError::UnsupportedKey)
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ed25519(_) => "ed25519",
            Self::Rsa(_) => "rsa",
        }
    }

    /// Verifies `signature` over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Malformed`] if the signature bytes cannot be
    /// a signature for this key type, or [`SignatureError::Mismatch`] if
    /// verification fails.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
        match self {
            Self::Ed25519(key) => {
                use ed25519_dalek::Verifier;
                let sig = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| SignatureError::Malformed)?;
                key.verify(message, &sig)
                    .map_err(|_| SignatureError::Mismatch)
            }
            Self::Rsa(key) => {
                use rsa::signature::Verifier;
                let sig = rsa::pkcs1v15::Signature::try_from(signature)
                    .map_err(|_| SignatureError::Malformed)?;
                // Deployed sites sign with SHA-1; newer ones may use SHA-256.
                let sha256 = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key.clone());
                if sha256.verify(message, &sig).is_ok() {
                    return Ok(());
                }
                rsa::pkcs1v15::VerifyingKey::<Sha1>::new(key.clone())
                    .verify(message, &sig)
                    .map_err(|_| SignatureError::Mismatch)
            }
        }
    }
}

/// Decodes an `Authorization` header carrying a base64 signature.
///
/// A leading `Signature ` scheme token is tolerated.
///
/// # Errors
///
/// Returns [`SignatureError::InvalidEncoding`] if the value is not base64.
pub fn decode_signature_header(value: &str) -> Result<Vec<u8>, SignatureError> {
    let value = value.trim();
    let encoded = value.strip_prefix("Signature ").unwrap_or(value).trim();
    STANDARD
        .decode(encoded)
        .map_err(|_| SignatureError::InvalidEncoding)
}

/// Parses `pem` and verifies a base64 header signature over `message`.
///
/// # Errors
///
/// Propagates any [`SignatureError`] from parsing, decoding or verifying.
pub fn verify_detached(
    pem: &str,
    message: &[u8],
    signature_header: &str,
) -> Result<(), SignatureError> {
    let key = SitePublicKey::from_pem(pem)?;
    let signature = decode_signature_header(signature_header)?;
    key.verify(message, &signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::pkcs8::EncodePublicKey;
    use ed25519_dalek::Signer;

    fn ed25519_pair() -> (ed25519_dalek::SigningKey, String) {
        let signing = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        let pem = signing
            .verifying_key()
            .to_public_key_pem(ed25519_dalek::pkcs8::spki::der::pem::LineEnding::LF)
            .unwrap();
        (signing, pem)
    }

    #[test]
    fn ed25519_signature_verifies() {
        let (signing, pem) = ed25519_pair();
        let body = br#"{"site":"alpha"}"#;
        let header = STANDARD.encode(signing.sign(body).to_bytes());

        assert_eq!(verify_detached(&pem, body, &header), Ok(()));
        assert_eq!(
            verify_detached(&pem, body, &format!("Signature {header}")),
            Ok(())
        );
    }

    #[test]
    fn ed25519_rejects_tampered_body() {
        let (signing, pem) = ed25519_pair();
        let header = STANDARD.encode(signing.sign(b"original").to_bytes());
        assert_eq!(
            verify_detached(&pem, b"tampered", &header),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_short_signature_and_bad_base64() {
        let (_, pem) = ed25519_pair();
        assert_eq!(
            verify_detached(&pem, b"x", &STANDARD.encode([0u8; 10])),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_detached(&pem, b"x", "%%%not base64%%%"),
            Err(SignatureError::InvalidEncoding)
        );
    }

    #[test]
    fn garbage_pem_is_unsupported() {
        assert!(matches!(
            SitePublicKey::from_pem("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n"),
            Err(SignatureError::UnsupportedKey)
        ));
        assert!(matches!(
            SitePublicKey::from_pem("ssh-rsa AAAAB3Nza"),
            Err(SignatureError::UnsupportedKey)
        ));
    }
}
