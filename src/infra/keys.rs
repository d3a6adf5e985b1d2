//! In-memory signing key store.
//!
//! Keys load once from Base58-encoded secrets and resolve by the owner
//! address derived from each keypair. Lookups are lock-free reads.

use std::sync::Arc;

use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use tracing::info;

use crate::domain::{AppError, KeyResolver, SignerError};

/// Parse a Base58-encoded 64-byte secret key into a [`Keypair`].
pub fn keypair_from_base58(secret: &SecretString) -> Result<Keypair, AppError> {
    let bytes = bs58::decode(secret.expose_secret())
        .into_vec()
        .map_err(|e| AppError::Signer(SignerError::InvalidKey(format!("not valid Base58: {e}"))))?;
    Keypair::try_from(bytes.as_slice())
        .map_err(|e| AppError::Signer(SignerError::InvalidKey(e.to_string())))
}

/// Thread-safe [`KeyResolver`] backed by an in-memory map.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: DashMap<String, Arc<Keypair>>,
}

impl InMemoryKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load keypairs from Base58 secret strings. Owner addresses are derived
    /// from the keys themselves.
    pub fn from_secrets(secrets: &[SecretString]) -> Result<Self, AppError> {
        let store = Self::new();
        for secret in secrets {
            store.add(keypair_from_base58(secret)?);
        }
        info!(count = store.len(), "key store initialized");
        Ok(store)
    }

    /// Register a keypair; returns the owner address it resolves under.
    pub fn add(&self, keypair: Keypair) -> String {
        let owner = keypair.pubkey().to_string();
        self.keys.insert(owner.clone(), Arc::new(keypair));
        owner
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyResolver for InMemoryKeyStore {
    fn resolve(&self, owner: &str) -> Result<Arc<Keypair>, AppError> {
        self.keys
            .get(owner)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AppError::Signer(SignerError::MissingKey(owner.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_base58_roundtrip() {
        let keypair = Keypair::new();
        let secret = SecretString::from(keypair.to_base58_string());
        let parsed = keypair_from_base58(&secret).unwrap();
        assert_eq!(parsed.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_keypair_from_base58_rejects_garbage() {
        let secret = SecretString::from("!!not-base58!!");
        assert!(keypair_from_base58(&secret).is_err());

        // Valid Base58 but the wrong length for a secret key.
        let secret = SecretString::from("abc");
        assert!(keypair_from_base58(&secret).is_err());
    }

    #[test]
    fn test_resolve_known_and_unknown_owner() {
        let store = InMemoryKeyStore::new();
        let keypair = Keypair::new();
        let owner = store.add(keypair);

        assert_eq!(store.len(), 1);
        assert!(store.resolve(&owner).is_ok());

        let err = store.resolve("UnknownOwner").unwrap_err();
        assert!(matches!(
            err,
            AppError::Signer(SignerError::MissingKey(_))
        ));
    }
}
