//! Optional OpenSSL module for digests and signature checks.
//!
//! This module provides an OpenSSL-based implementation of
//! [`SignatureVerifier`]. See [`OpenSslVerifier`]. It is enabled by the
//! `openssl` feature.

use std::path::Path;

use openssl::hash::{hash, Hasher, MessageDigest};
use openssl::pkey::PKey;
use openssl::sign::Verifier;
use openssl::x509::X509;

use crate::collaborators::{DigestAlgorithm, SignatureVerifier};

/// OpenSSL implementation of the signature verifier.
///
/// Public keys are DER encoded SubjectPublicKeyInfo structures. RSA PKCS #1
/// v1.5 and ECDSA keys are supported.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenSslVerifier;

fn message_digest(algorithm: DigestAlgorithm) -> MessageDigest {
    match algorithm {
        DigestAlgorithm::Sha1 => MessageDigest::sha1(),
        DigestAlgorithm::Sha224 => MessageDigest::sha224(),
        DigestAlgorithm::Sha256 => MessageDigest::sha256(),
        DigestAlgorithm::Sha384 => MessageDigest::sha384(),
        DigestAlgorithm::Sha512 => MessageDigest::sha512(),
    }
}

impl SignatureVerifier for OpenSslVerifier {
    fn digest(&self, algorithm: DigestAlgorithm, data: &[&[u8]]) -> anyhow::Result<Vec<u8>> {
        let mut hasher = Hasher::new(message_digest(algorithm))?;
        for chunk in data {
            hasher.update(chunk)?;
        }
        Ok(hasher.finish()?.to_vec())
    }

    fn verify(
        &self,
        algorithm: DigestAlgorithm,
        public_key: &[u8],
        signed: &[u8],
        signature: &[u8],
    ) -> anyhow::Result<bool> {
        let key = PKey::public_key_from_der(public_key)?;
        let mut verifier = Verifier::new(message_digest(algorithm), &key)?;
        verifier.update(signed)?;
        Ok(verifier.verify(signature)?)
    }
}

/// Loads trust anchors from a directory containing PEM files, as the SHA-256
/// digests of their DER encoding.
pub fn load_trust_anchors_from_dir<P: AsRef<Path>>(dir: P) -> anyhow::Result<Vec<[u8; 32]>> {
    let mut anchors = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        for cert in X509::stack_from_pem(&std::fs::read(&path)?)? {
            let digest = hash(MessageDigest::sha256(), &cert.to_der()?)?;
            let mut anchor = [0u8; 32];
            anchor.copy_from_slice(&digest);
            anchors.push(anchor);
        }
    }

    Ok(anchors)
}
