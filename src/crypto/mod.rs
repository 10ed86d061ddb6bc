pub mod cipher;
pub mod keys;
pub mod master_key;

pub use keys::TenantKeyService;
pub use master_key::{MasterKey, MasterKeyCodec, MASTER_KEY_ENV};

use thiserror::Error;
use uuid::Uuid;

/// Errors from the encryption layer.
///
/// Decryption failures are deliberately unspecific: callers get "it failed",
/// not which byte was wrong.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Master key not configured (set {})", MASTER_KEY_ENV)]
    MasterKeyMissing,

    #[error("Master key is not valid base64")]
    MasterKeyMalformed,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed")]
    DecryptFailed,

    #[error("Malformed ciphertext")]
    MalformedCiphertext,

    #[error("No encryption key found for tenant {0}")]
    KeyNotFound(Uuid),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}
