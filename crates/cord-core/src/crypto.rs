//! Signing key providers
//!
//! The ledger never touches key material directly. It hands canonical bytes
//! and an author id to a [`SigningKeyProvider`], which owns whatever keys it
//! knows about. Key generation here is in-memory only; persistence and
//! rotation belong to whoever constructs the provider.
//!
//! Two providers ship with the crate:
//! - [`Ed25519KeyProvider`]: compact keys and fast signing, the default.
//! - [`RsaKeyProvider`]: RSA-2048, PKCS#1 v1.5 over SHA-256, for
//!   interoperating with stores signed by `SHA256withRSA` peers.

use dashmap::DashMap;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{CryptoRng, RngCore};
use rsa::pkcs1v15;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::signature::{SignatureEncoding, Signer as RsaSigner, Verifier as RsaVerifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::errors::CryptographicError;
use crate::types::AuthorId;

/// RSA modulus size used for generated keys
pub const RSA_KEY_BITS: usize = 2048;

// ----------------------------------------------------------------------------
// Provider Trait
// ----------------------------------------------------------------------------

/// Pluggable signing and verification keyed by author
pub trait SigningKeyProvider: Send + Sync {
    /// Sign `data` with the private key registered for `author`
    fn sign(&self, data: &[u8], author: &AuthorId) -> Result<Vec<u8>, CryptographicError>;

    /// Check `signature` over `data` against `author`'s public key.
    /// Unknown authors and malformed signatures verify as `false`.
    fn verify(&self, data: &[u8], signature: &[u8], author: &AuthorId) -> bool;
}

impl<T: SigningKeyProvider + ?Sized> SigningKeyProvider for std::sync::Arc<T> {
    fn sign(&self, data: &[u8], author: &AuthorId) -> Result<Vec<u8>, CryptographicError> {
        (**self).sign(data, author)
    }

    fn verify(&self, data: &[u8], signature: &[u8], author: &AuthorId) -> bool {
        (**self).verify(data, signature, author)
    }
}

/// SHA-256 fingerprint of a public key, hex encoded
pub fn fingerprint<T: AsRef<[u8]>>(public_key: T) -> String {
    hex::encode(Sha256::digest(public_key.as_ref()))
}

// ----------------------------------------------------------------------------
// Ed25519 Provider
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Ed25519Keys {
    Signing(SigningKey),
    VerifyOnly(VerifyingKey),
}

impl Ed25519Keys {
    fn verifying_key(&self) -> VerifyingKey {
        match self {
            Ed25519Keys::Signing(key) => key.verifying_key(),
            Ed25519Keys::VerifyOnly(key) => *key,
        }
    }
}

/// In-memory Ed25519 key registry
#[derive(Debug, Default)]
pub struct Ed25519KeyProvider {
    keys: DashMap<AuthorId, Ed25519Keys>,
}

impl Ed25519KeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a signing key for `author` from the OS RNG and return the
    /// public key bytes. Replaces any key already registered.
    pub fn generate_for(&self, author: &AuthorId) -> Result<[u8; 32], CryptographicError> {
        let mut rng = rand_core::OsRng;
        self.generate_for_with_rng(author, &mut rng)
    }

    /// Generate a signing key for `author` with a caller-supplied RNG
    pub fn generate_for_with_rng<R: RngCore + CryptoRng>(
        &self,
        author: &AuthorId,
        rng: &mut R,
    ) -> Result<[u8; 32], CryptographicError> {
        let mut secret = [0u8; 32];
        rng.try_fill_bytes(&mut secret)
            .map_err(|e| CryptographicError::KeyGenerationFailed {
                reason: e.to_string(),
            })?;
        Ok(self.insert_secret_key(author, &secret))
    }

    /// Register a known private key for `author`
    pub fn insert_secret_key(&self, author: &AuthorId, secret: &[u8; 32]) -> [u8; 32] {
        let signing_key = SigningKey::from_bytes(secret);
        let public = signing_key.verifying_key().to_bytes();
        self.keys
            .insert(author.clone(), Ed25519Keys::Signing(signing_key));
        public
    }

    /// Register a remote author's public key (verification only)
    pub fn insert_public_key(
        &self,
        author: &AuthorId,
        public_key: &[u8; 32],
    ) -> Result<(), CryptographicError> {
        let key = VerifyingKey::from_bytes(public_key).map_err(|e| {
            CryptographicError::InvalidKeyFormat {
                reason: e.to_string(),
            }
        })?;
        self.keys.insert(author.clone(), Ed25519Keys::VerifyOnly(key));
        Ok(())
    }

    pub fn public_key(&self, author: &AuthorId) -> Option<[u8; 32]> {
        self.keys.get(author).map(|k| k.verifying_key().to_bytes())
    }

    pub fn can_sign(&self, author: &AuthorId) -> bool {
        self.keys
            .get(author)
            .map(|k| matches!(*k, Ed25519Keys::Signing(_)))
            .unwrap_or(false)
    }
}

impl SigningKeyProvider for Ed25519KeyProvider {
    fn sign(&self, data: &[u8], author: &AuthorId) -> Result<Vec<u8>, CryptographicError> {
        let keys = self
            .keys
            .get(author)
            .ok_or_else(|| CryptographicError::UnknownAuthor {
                author: author.to_string(),
            })?;
        match &*keys {
            Ed25519Keys::Signing(key) => Ok(key.sign(data).to_bytes().to_vec()),
            Ed25519Keys::VerifyOnly(_) => Err(CryptographicError::SigningFailed {
                author: author.to_string(),
                reason: "only a public key is registered".to_string(),
            }),
        }
    }

    fn verify(&self, data: &[u8], signature: &[u8], author: &AuthorId) -> bool {
        let Some(keys) = self.keys.get(author) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        keys.verifying_key().verify(data, &signature).is_ok()
    }
}

// ----------------------------------------------------------------------------
// RSA Provider
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct RsaKeys {
    signing: Option<pkcs1v15::SigningKey<Sha256>>,
    verifying: pkcs1v15::VerifyingKey<Sha256>,
    public: RsaPublicKey,
}

/// In-memory `SHA256withRSA` key registry
#[derive(Debug, Default)]
pub struct RsaKeyProvider {
    keys: DashMap<AuthorId, RsaKeys>,
}

impl RsaKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate an RSA-2048 key pair for `author` from the OS RNG
    pub fn generate_for(&self, author: &AuthorId) -> Result<(), CryptographicError> {
        let mut rng = rand_core::OsRng;
        self.generate_for_with_rng(author, &mut rng)
    }

    /// Generate an RSA-2048 key pair with a caller-supplied RNG
    pub fn generate_for_with_rng<R: RngCore + CryptoRng>(
        &self,
        author: &AuthorId,
        rng: &mut R,
    ) -> Result<(), CryptographicError> {
        let private = RsaPrivateKey::new(rng, RSA_KEY_BITS).map_err(|e| {
            CryptographicError::KeyGenerationFailed {
                reason: e.to_string(),
            }
        })?;
        self.insert_private_key(author, private);
        Ok(())
    }

    /// Register a known private key for `author`
    pub fn insert_private_key(&self, author: &AuthorId, private: RsaPrivateKey) {
        let public = private.to_public_key();
        let keys = RsaKeys {
            signing: Some(pkcs1v15::SigningKey::<Sha256>::new(private)),
            verifying: pkcs1v15::VerifyingKey::<Sha256>::new(public.clone()),
            public,
        };
        self.keys.insert(author.clone(), keys);
    }

    /// Register a remote author's public key from SubjectPublicKeyInfo DER
    pub fn insert_public_key_der(
        &self,
        author: &AuthorId,
        der: &[u8],
    ) -> Result<(), CryptographicError> {
        let public = RsaPublicKey::from_public_key_der(der).map_err(|e| {
            CryptographicError::InvalidKeyFormat {
                reason: e.to_string(),
            }
        })?;
        let keys = RsaKeys {
            signing: None,
            verifying: pkcs1v15::VerifyingKey::<Sha256>::new(public.clone()),
            public,
        };
        self.keys.insert(author.clone(), keys);
        Ok(())
    }

    /// Export `author`'s public key as SubjectPublicKeyInfo DER
    pub fn public_key_der(&self, author: &AuthorId) -> Option<Vec<u8>> {
        let keys = self.keys.get(author)?;
        keys.public
            .to_public_key_der()
            .ok()
            .map(|doc| doc.as_bytes().to_vec())
    }
}

impl SigningKeyProvider for RsaKeyProvider {
    fn sign(&self, data: &[u8], author: &AuthorId) -> Result<Vec<u8>, CryptographicError> {
        let keys = self
            .keys
            .get(author)
            .ok_or_else(|| CryptographicError::UnknownAuthor {
                author: author.to_string(),
            })?;
        let signing = keys
            .signing
            .as_ref()
            .ok_or_else(|| CryptographicError::SigningFailed {
                author: author.to_string(),
                reason: "only a public key is registered".to_string(),
            })?;
        let signature = signing
            .try_sign(data)
            .map_err(|e| CryptographicError::SigningFailed {
                author: author.to_string(),
                reason: e.to_string(),
            })?;
        Ok(signature.to_vec())
    }

    fn verify(&self, data: &[u8], signature: &[u8], author: &AuthorId) -> bool {
        let Some(keys) = self.keys.get(author) else {
            return false;
        };
        let Ok(signature) = pkcs1v15::Signature::try_from(signature) else {
            return false;
        };
        keys.verifying.verify(data, &signature).is_ok()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
