//! AES-256-GCM primitive shared by the key hierarchy and field encryption.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::CryptoError;

/// Required key length in bytes. Anything else is rejected outright.
pub const KEY_LEN: usize = 32;

/// GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Generate a fresh random 32-byte key.
pub fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encrypt with AES-256-GCM.
///
/// Returns `base64(nonce || ciphertext || tag)`. A fresh random nonce is
/// drawn per call and prepended; the GCM tag is appended by the construction.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<String, CryptoError> {
    let key = check_key(key)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptFailed)?;

    let mut combined = nonce_bytes.to_vec();
    combined.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(combined))
}

/// Decrypt `base64(nonce || ciphertext || tag)` produced by [`encrypt`].
///
/// Fails closed: any tag mismatch, truncated input, or malformed encoding
/// returns an error and never partial plaintext.
pub fn decrypt(key: &[u8], sealed: &str) -> Result<Vec<u8>, CryptoError> {
    let key = check_key(key)?;
    let combined = STANDARD
        .decode(sealed)
        .map_err(|_| CryptoError::MalformedCiphertext)?;

    // Nonce plus at least the 16-byte tag.
    if combined.len() < NONCE_LEN + 16 {
        return Err(CryptoError::MalformedCiphertext);
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

fn check_key(key: &[u8]) -> Result<&[u8], CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = generate_key();
        let plaintext = b"patient medical history";
        let sealed = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &sealed).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn nonce_makes_ciphertexts_distinct() {
        let key = generate_key();
        let a = encrypt(&key, b"same input").unwrap();
        let b = encrypt(&key, b"same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_closed() {
        let sealed = encrypt(&generate_key(), b"secret").unwrap();
        assert!(matches!(
            decrypt(&generate_key(), &sealed),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn short_key_rejected() {
        assert!(matches!(
            encrypt(&[0u8; 16], b"x"),
            Err(CryptoError::InvalidKeyLength(16))
        ));
        assert!(matches!(
            decrypt(&[0u8; 31], "AAAA"),
            Err(CryptoError::InvalidKeyLength(31))
        ));
    }

    #[test]
    fn truncated_input_rejected() {
        let key = generate_key();
        assert!(decrypt(&key, "").is_err());
        // Valid base64 but shorter than nonce + tag.
        assert!(decrypt(&key, &STANDARD.encode([0u8; 20])).is_err());
        // Not base64 at all.
        assert!(decrypt(&key, "not base64!!").is_err());
    }

    #[test]
    fn flipped_bit_fails_closed() {
        let key = generate_key();
        let sealed = encrypt(&key, b"clinical note").unwrap();
        let mut raw = STANDARD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = STANDARD.encode(raw);
        assert!(decrypt(&key, &tampered).is_err());
    }

    proptest! {
        #[test]
        fn roundtrip_arbitrary_bytes(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
            let key = generate_key();
            let sealed = encrypt(&key, &plaintext).unwrap();
            prop_assert_eq!(decrypt(&key, &sealed).unwrap(), plaintext);
        }

        #[test]
        fn wrong_key_never_decrypts(plaintext in proptest::collection::vec(any::<u8>(), 1..128)) {
            let sealed = encrypt(&generate_key(), &plaintext).unwrap();
            prop_assert!(decrypt(&generate_key(), &sealed).is_err());
        }
    }
}
