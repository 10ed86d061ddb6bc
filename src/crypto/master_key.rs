//! Master key loading and the tenant-key envelope.
//!
//! The master key is a process-wide 32-byte secret supplied out-of-band via
//! environment. Its only job is sealing and unsealing per-tenant data keys;
//! it never touches application fields directly, which bounds its blast
//! radius to the key table.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{cipher, CryptoError};

/// Environment variable holding the base64-encoded 32-byte master key.
pub const MASTER_KEY_ENV: &str = "PRACTICE_MASTER_KEY";

/// The process-wide master key. Wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; cipher::KEY_LEN]);

impl MasterKey {
    /// Load the master key from `PRACTICE_MASTER_KEY`.
    ///
    /// Missing or malformed configuration is fatal: callers surface this at
    /// startup or on first use, never degrade to unencrypted operation.
    pub fn from_env() -> Result<Self, CryptoError> {
        let encoded =
            std::env::var(MASTER_KEY_ENV).map_err(|_| CryptoError::MasterKeyMissing)?;
        Self::from_base64(&encoded)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::MasterKeyMalformed)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != cipher::KEY_LEN {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        let mut key = [0u8; cipher::KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }
}

/// Seals and unseals tenant data keys under the master key.
///
/// This is the only code path that uses the master key for encryption.
pub struct MasterKeyCodec {
    master: MasterKey,
}

impl MasterKeyCodec {
    pub fn new(master: MasterKey) -> Self {
        Self { master }
    }

    pub fn from_env() -> Result<Self, CryptoError> {
        Ok(Self::new(MasterKey::from_env()?))
    }

    /// Seal a plaintext tenant key for persistence.
    pub fn seal(&self, plain_key: &[u8]) -> Result<String, CryptoError> {
        if plain_key.len() != cipher::KEY_LEN {
            return Err(CryptoError::InvalidKeyLength(plain_key.len()));
        }
        cipher::encrypt(&self.master.0, plain_key)
    }

    /// Unseal a persisted tenant key. Fails closed on any tampering.
    pub fn unseal(&self, sealed: &str) -> Result<[u8; cipher::KEY_LEN], CryptoError> {
        let plain = cipher::decrypt(&self.master.0, sealed)?;
        if plain.len() != cipher::KEY_LEN {
            return Err(CryptoError::InvalidKeyLength(plain.len()));
        }
        let mut key = [0u8; cipher::KEY_LEN];
        key.copy_from_slice(&plain);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_codec() -> MasterKeyCodec {
        MasterKeyCodec::new(MasterKey::from_bytes(&[7u8; 32]).unwrap())
    }

    #[test]
    fn seal_unseal_roundtrip() {
        let codec = test_codec();
        for _ in 0..16 {
            let tenant_key = cipher::generate_key();
            let sealed = codec.seal(&tenant_key).unwrap();
            assert_eq!(codec.unseal(&sealed).unwrap(), tenant_key);
        }
    }

    #[test]
    fn unseal_with_different_master_fails() {
        let sealed = test_codec().seal(&cipher::generate_key()).unwrap();
        let other = MasterKeyCodec::new(MasterKey::from_bytes(&[8u8; 32]).unwrap());
        assert!(other.unseal(&sealed).is_err());
    }

    #[test]
    fn seal_rejects_weak_key() {
        assert!(matches!(
            test_codec().seal(&[1u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
    }

    #[test]
    fn from_base64_validates_length() {
        assert!(MasterKey::from_base64(&STANDARD.encode([1u8; 32])).is_ok());
        assert!(matches!(
            MasterKey::from_base64(&STANDARD.encode([1u8; 31])),
            Err(CryptoError::InvalidKeyLength(31))
        ));
        assert!(matches!(
            MasterKey::from_base64("%%% not base64"),
            Err(CryptoError::MasterKeyMalformed)
        ));
    }
}
