//! Server identity
//!
//! The gateway presents an Ed25519 host key during the SSH handshake.
//! With a seed the key is derived deterministically (SHA-256 of the seed is
//! the secret key), so restarts keep the same fingerprint; without one a
//! fresh random key is generated.

use ed25519_dalek::{SigningKey, SECRET_KEY_LENGTH};
use rand::RngCore;
use russh_keys::key::KeyPair;
use sha2::{Digest, Sha256};

use burrow_core::error::BootstrapError;

/// Host key material and its public fingerprint
#[derive(Clone)]
pub struct ServerIdentity {
    signing_key: SigningKey,
    fingerprint: String,
}

impl ServerIdentity {
    /// Generate the identity, deterministically when `seed` is given.
    pub fn bootstrap(seed: Option<&str>) -> Result<Self, BootstrapError> {
        let secret: [u8; SECRET_KEY_LENGTH] = match seed {
            Some(seed) if !seed.is_empty() => {
                let mut bytes = [0u8; SECRET_KEY_LENGTH];
                bytes.copy_from_slice(&Sha256::digest(seed.as_bytes()));
                bytes
            }
            _ => {
                let mut bytes = [0u8; SECRET_KEY_LENGTH];
                rand::thread_rng()
                    .try_fill_bytes(&mut bytes)
                    .map_err(|e| BootstrapError::Identity(e.to_string()))?;
                bytes
            }
        };

        let signing_key = SigningKey::from_bytes(&secret);
        let public = KeyPair::Ed25519(signing_key.clone())
            .clone_public_key()
            .map_err(|e| BootstrapError::Identity(e.to_string()))?;
        let fingerprint = format!("SHA256:{}", public.fingerprint());

        Ok(Self {
            signing_key,
            fingerprint,
        })
    }

    /// Public key fingerprint, for out-of-band verification by clients
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Key pair for the SSH server configuration
    pub fn key_pair(&self) -> KeyPair {
        KeyPair::Ed25519(self.signing_key.clone())
    }
}

impl std::fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_identity_is_deterministic() {
        let a = ServerIdentity::bootstrap(Some("seed-one")).unwrap();
        let b = ServerIdentity::bootstrap(Some("seed-one")).unwrap();
        let c = ServerIdentity::bootstrap(Some("seed-two")).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert!(a.fingerprint().starts_with("SHA256:"));
    }

    #[test]
    fn test_random_identity_differs() {
        let a = ServerIdentity::bootstrap(None).unwrap();
        let b = ServerIdentity::bootstrap(Some("")).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_key_pair_matches_fingerprint() {
        let identity = ServerIdentity::bootstrap(Some("seed")).unwrap();
        let public = identity.key_pair().clone_public_key().unwrap();
        assert_eq!(identity.fingerprint(), format!("SHA256:{}", public.fingerprint()));
    }
}
