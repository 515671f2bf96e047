//! Key generation service.

use async_trait::async_trait;
use launcher_crypto_address::Address;
use zeroize::Zeroizing;

use crate::error::Result;
use crate::keys::PrivateKey;

/// Key returned by a [`KeyGenerator`]. The address is the generator's
/// claim; callers re-derive it before trusting it.
pub struct GeneratedKey {
    pub address: Address,
    pub plaintext_key_hex: Zeroizing<String>,
}

impl std::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Create a new private key. `passphrase` is the account password; it
    /// must not be persisted.
    async fn create_private_key(&self, passphrase: &str) -> Result<GeneratedKey>;
}

/// Generates keys in-process from the OS random number generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalKeyGenerator;

#[async_trait]
impl KeyGenerator for LocalKeyGenerator {
    async fn create_private_key(&self, _passphrase: &str) -> Result<GeneratedKey> {
        let key = PrivateKey::generate();
        Ok(GeneratedKey {
            address: key.address()?,
            plaintext_key_hex: key.to_hex(),
        })
    }
}
