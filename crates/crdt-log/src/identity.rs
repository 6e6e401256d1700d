//! Writer identities and signature verification.
//!
//! An [`Identity`] is the local writer: a stable id, an ed25519 signing key
//! and the [`IdentityProvider`] used to verify signatures written by other
//! replicas. Entries carry only the public half, an [`IdentityDescriptor`].

use std::fmt;
use std::sync::Arc;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// The public description of a writer, embedded in every entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityDescriptor {
    /// Stable writer id, checked by access controllers.
    pub id: String,
    /// Hex-encoded public key the entry signature is checked against.
    pub public_key: String,
}

/// Verifies signatures produced by identities.
pub trait IdentityProvider: Send + Sync {
    /// Check `signature` over `data` against the hex-encoded `public_key`.
    fn verify(&self, signature: &[u8], public_key: &str, data: &[u8]) -> bool;
}

/// Identity provider for ed25519 keys.
///
/// Public keys are the hex encoding of the 32-byte verifying key.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Provider;

impl IdentityProvider for Ed25519Provider {
    fn verify(&self, signature: &[u8], public_key: &str, data: &[u8]) -> bool {
        let Ok(key_bytes) = hex::decode(public_key) else {
            return false;
        };
        let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(data, &signature).is_ok()
    }
}

/// A local writer able to sign entries.
#[derive(Clone)]
pub struct Identity {
    descriptor: IdentityDescriptor,
    signing_key: SigningKey,
    provider: Arc<dyn IdentityProvider>,
}

impl Identity {
    /// Create an identity from an existing signing key, verified by
    /// [`Ed25519Provider`].
    pub fn new(id: impl Into<String>, signing_key: SigningKey) -> Self {
        Self::with_provider(id, signing_key, Arc::new(Ed25519Provider))
    }

    /// Create an identity with a freshly generated signing key.
    pub fn generate(id: impl Into<String>) -> Self {
        Self::new(id, SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Create an identity with a custom verification provider.
    pub fn with_provider(
        id: impl Into<String>,
        signing_key: SigningKey,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        let public_key = hex::encode(signing_key.verifying_key().to_bytes());
        Self {
            descriptor: IdentityDescriptor {
                id: id.into(),
                public_key,
            },
            signing_key,
            provider,
        }
    }

    /// Writer id.
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Hex-encoded public key. Also the id of every clock this identity owns.
    pub fn public_key(&self) -> &str {
        &self.descriptor.public_key
    }

    /// The public half embedded in entries.
    pub fn descriptor(&self) -> &IdentityDescriptor {
        &self.descriptor
    }

    /// The provider used to verify other writers' signatures.
    pub fn provider(&self) -> &dyn IdentityProvider {
        self.provider.as_ref()
    }

    /// Sign `data` with this identity's key.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.descriptor.id)
            .field("public_key", &self.descriptor.public_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(seed: u8) -> Identity {
        Identity::new(format!("writer-{seed}"), SigningKey::from_bytes(&[seed; 32]))
    }

    #[test]
    fn sign_and_verify() {
        let id = identity(1);
        let signature = id.sign(b"data");
        assert!(id.provider().verify(&signature, id.public_key(), b"data"));
        assert!(!id.provider().verify(&signature, id.public_key(), b"other"));
    }

    #[test]
    fn wrong_key_fails() {
        let a = identity(1);
        let b = identity(2);
        let signature = a.sign(b"data");
        assert!(!Ed25519Provider.verify(&signature, b.public_key(), b"data"));
    }

    #[test]
    fn malformed_inputs_fail() {
        let id = identity(3);
        let signature = id.sign(b"data");
        assert!(!Ed25519Provider.verify(&signature, "not-hex", b"data"));
        assert!(!Ed25519Provider.verify(&signature, "abcd", b"data"));
        assert!(!Ed25519Provider.verify(&signature[..10], id.public_key(), b"data"));
    }

    #[test]
    fn public_key_is_hex_verifying_key() {
        let id = identity(4);
        assert_eq!(id.public_key().len(), 64);
        assert_eq!(id.descriptor().id, "writer-4");
    }

    #[test]
    fn generated_identities_differ() {
        let a = Identity::generate("a");
        let b = Identity::generate("b");
        assert_ne!(a.public_key(), b.public_key());
    }
}
