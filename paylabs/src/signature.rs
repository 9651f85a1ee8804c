//! Paylabs request signing.
//!
//! The string to sign is `METHOD:PATH:hex(sha256(body)):TIMESTAMP`, signed with
//! RSA PKCS#1 v1.5 over SHA-256 and sent base64 encoded in `X-SIGNATURE`.
//! Signing is deterministic, the same inputs and key always give the same bytes.

use crate::{Error, Result};
use base64::engine::{general_purpose, Engine};
use rsa::{
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    signature::{SignatureEncoding, Signer as _, Verifier as _},
    traits::PublicKeyParts,
    RsaPrivateKey, RsaPublicKey,
};
use sha2::{Digest, Sha256};

/// lowercase hex of the sha256 body digest
pub fn body_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

pub fn string_to_sign(method: &str, path: &str, body: &[u8], timestamp: &str) -> String {
    format!("{}:{}:{}:{}", method, path, body_hash(body), timestamp)
}

/// Strip the PEM armor, if any, and decode the base64 body to DER.
/// Accepts literal `\n` sequences as they often come from env files.
fn der_from_material(material: &str) -> Result<Vec<u8>> {
    let material = material.replace("\\n", "\n");
    let body: String = material
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----") && !line.contains(':'))
        .flat_map(|line| line.split_whitespace())
        .collect();
    if body.is_empty() {
        return Err(Error::InvalidKey("empty key material".to_owned()));
    }
    Ok(general_purpose::STANDARD.decode(body)?)
}

fn pkcs1_private(der: &[u8]) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs1_der(der).map_err(|e| Error::InvalidKey(e.to_string()))
}

fn pkcs8_private(der: &[u8]) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_der(der).map_err(|e| Error::InvalidKey(e.to_string()))
}

fn spki_public(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der).map_err(|e| Error::InvalidKey(e.to_string()))
}

fn pkcs1_public(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_pkcs1_der(der).map_err(|e| Error::InvalidKey(e.to_string()))
}

/// Load an RSA private key from raw base64 or PEM, PKCS#1 first then PKCS#8.
pub fn load_private_key(material: &str) -> Result<RsaPrivateKey> {
    let der = der_from_material(material)?;
    pkcs1_private(&der)
        .or_else(|_| pkcs8_private(&der))
        .map_err(|_| {
            Error::InvalidKey("not an RSA private key in PKCS#1 or PKCS#8 encoding".to_owned())
        })
}

/// Load an RSA public key from raw base64 or PEM, SubjectPublicKeyInfo first then PKCS#1.
pub fn load_public_key(material: &str) -> Result<RsaPublicKey> {
    let der = der_from_material(material)?;
    spki_public(&der)
        .or_else(|_| pkcs1_public(&der))
        .map_err(|_| Error::InvalidKey("not an RSA public key".to_owned()))
}

/// Signs outbound Paylabs requests with the merchant private key.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey<Sha256>,
    bits: usize,
}

impl Signer {
    pub fn new(key: RsaPrivateKey) -> Self {
        let bits = key.size() * 8;
        Self {
            key: SigningKey::<Sha256>::new(key),
            bits,
        }
    }

    pub fn from_material(material: &str) -> Result<Self> {
        Ok(Self::new(load_private_key(material)?))
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    pub fn sign(&self, method: &str, path: &str, body: &[u8], timestamp: &str) -> Result<String> {
        let message = string_to_sign(method, path, body, timestamp);
        let signature = self.key.try_sign(message.as_bytes())?;
        Ok(general_purpose::STANDARD.encode(signature.to_bytes()))
    }

    /// Verifier for the public half of this key.
    pub fn verifier(&self) -> Verifier {
        let private: &RsaPrivateKey = self.key.as_ref();
        Verifier::new(private.to_public_key())
    }
}

/// Verifies inbound Paylabs notifications with the Paylabs public key.
#[derive(Clone, Debug)]
pub struct Verifier {
    key: VerifyingKey<Sha256>,
}

impl Verifier {
    pub fn new(key: RsaPublicKey) -> Self {
        Self {
            key: VerifyingKey::<Sha256>::new(key),
        }
    }

    pub fn from_material(material: &str) -> Result<Self> {
        Ok(Self::new(load_public_key(material)?))
    }

    /// Any decoding problem counts as a bad signature.
    pub fn verify(
        &self,
        method: &str,
        path: &str,
        body: &[u8],
        timestamp: &str,
        signature: &str,
    ) -> bool {
        let raw = match general_purpose::STANDARD.decode(signature.trim()) {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        let signature = match Signature::try_from(raw.as_slice()) {
            Ok(s) => s,
            Err(_) => return false,
        };
        let message = string_to_sign(method, path, body, timestamp);
        self.key.verify(message.as_bytes(), &signature).is_ok()
    }
}
