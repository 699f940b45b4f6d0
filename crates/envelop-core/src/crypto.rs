//! Inner-payload encryption: AES-GCM over the envelope's inner bytes.
//!
//! When a strategy enables encryption at a layer, the inner payload is
//! replaced by `nonce || ciphertext` and the ENCRYPTED flag is set. The
//! header itself stays in the clear (it must be readable at every hop).
//! Key length selects the cipher: 16/24/32 bytes for AES-128/192/256.
//!
//! No associated data is bound today; a later version should bind the
//! header as AAD.

use crate::envelope::{Envelope, FLAG_ENCRYPTED};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use thiserror::Error;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// GCM nonce length, prepended to the ciphertext.
pub const NONCE_LEN: usize = 12;

/// Inner-payload crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key is not 16, 24, or 32 bytes.
    #[error("invalid key length: {0} bytes (want 16, 24, or 32)")]
    InvalidKey(usize),
    /// Encrypted payload shorter than a nonce.
    #[error("payload too short for nonce")]
    NonceMissing,
    /// Authentication tag mismatch or corrupt ciphertext.
    #[error("aead open failed")]
    OpenFailed,
    /// AEAD seal failed.
    #[error("aead seal failed")]
    SealFailed,
}

fn seal_with<C>(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: KeyInit + Aead + AeadCore<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key).map_err(|_| CryptoError::InvalidKey(key.len()))?;
    let nonce = C::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::SealFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open_with<C>(key: &[u8], payload: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: KeyInit + Aead + AeadCore<NonceSize = U12>,
{
    if payload.len() < NONCE_LEN {
        return Err(CryptoError::NonceMissing);
    }
    let cipher = C::new_from_slice(key).map_err(|_| CryptoError::InvalidKey(key.len()))?;
    let nonce = GenericArray::from_slice(&payload[..NONCE_LEN]);
    cipher
        .decrypt(nonce, &payload[NONCE_LEN..])
        .map_err(|_| CryptoError::OpenFailed)
}

/// Encrypt the envelope's inner payload in place with a fresh random
/// nonce, set the ENCRYPTED flag, and update `inner_len`.
///
/// An empty payload is a no-op: there is nothing worth sealing and the
/// flag stays clear, so both ends treat empty consistently.
pub fn encrypt_inner(env: &mut Envelope, key: &[u8]) -> Result<(), CryptoError> {
    if env.inner_payload.is_empty() {
        return Ok(());
    }

    let sealed = match key.len() {
        16 => seal_with::<Aes128Gcm>(key, &env.inner_payload)?,
        24 => seal_with::<Aes192Gcm>(key, &env.inner_payload)?,
        32 => seal_with::<Aes256Gcm>(key, &env.inner_payload)?,
        n => return Err(CryptoError::InvalidKey(n)),
    };

    env.set_inner_payload(sealed);
    env.flags |= FLAG_ENCRYPTED;
    Ok(())
}

/// Decrypt the envelope's inner payload in place, clear the ENCRYPTED
/// flag, and update `inner_len`. A no-op when the flag is not set.
pub fn decrypt_inner(env: &mut Envelope, key: &[u8]) -> Result<(), CryptoError> {
    if !env.is_encrypted() {
        return Ok(());
    }

    let plain = match key.len() {
        16 => open_with::<Aes128Gcm>(key, &env.inner_payload)?,
        24 => open_with::<Aes192Gcm>(key, &env.inner_payload)?,
        32 => open_with::<Aes256Gcm>(key, &env.inner_payload)?,
        n => return Err(CryptoError::InvalidKey(n)),
    };

    env.set_inner_payload(plain);
    env.flags &= !FLAG_ENCRYPTED;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeBuilder;
    use crate::peer::PeerId;

    fn sample(payload: &[u8]) -> Envelope {
        EnvelopeBuilder::new()
            .ttl(5)
            .dest(PeerId([1u8; 32]))
            .return_peer(PeerId([2u8; 32]))
            .payload(payload.to_vec())
            .build()
    }

    #[test]
    fn test_roundtrip_all_key_sizes() {
        for key_len in [16usize, 24, 32] {
            let key = vec![0x11u8; key_len];
            let mut env = sample(b"secret payload");

            encrypt_inner(&mut env, &key).unwrap();
            assert!(env.is_encrypted());
            assert_eq!(env.inner_len as usize, env.inner_payload.len());
            assert_ne!(env.inner_payload, b"secret payload");

            decrypt_inner(&mut env, &key).unwrap();
            assert!(!env.is_encrypted());
            assert_eq!(env.inner_payload, b"secret payload");
            assert_eq!(env.inner_len as usize, env.inner_payload.len());
        }
    }

    #[test]
    fn test_ciphertext_hides_plaintext() {
        let key = [0x22u8; 32];
        let mut env = sample(b"top secret message body");
        encrypt_inner(&mut env, &key).unwrap();

        let raw = env.marshal();
        let needle = b"top secret";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_wrong_key_fails_open() {
        let mut env = sample(b"data");
        encrypt_inner(&mut env, &[0x33u8; 32]).unwrap();
        assert!(matches!(
            decrypt_inner(&mut env, &[0x44u8; 32]),
            Err(CryptoError::OpenFailed)
        ));
    }

    #[test]
    fn test_invalid_key_length() {
        let mut env = sample(b"data");
        assert!(matches!(
            encrypt_inner(&mut env, &[0u8; 5]),
            Err(CryptoError::InvalidKey(5))
        ));
    }

    #[test]
    fn test_nonce_missing() {
        let mut env = sample(b"short");
        env.flags |= FLAG_ENCRYPTED;
        env.set_inner_payload(vec![0u8; NONCE_LEN - 1]);
        assert!(matches!(
            decrypt_inner(&mut env, &[0u8; 32]),
            Err(CryptoError::NonceMissing)
        ));
    }

    #[test]
    fn test_empty_payload_is_noop() {
        let mut env = sample(b"");
        encrypt_inner(&mut env, &[0u8; 32]).unwrap();
        assert!(!env.is_encrypted());
        assert!(env.inner_payload.is_empty());
    }

    #[test]
    fn test_decrypt_without_flag_is_noop() {
        let mut env = sample(b"plain");
        decrypt_inner(&mut env, &[0u8; 32]).unwrap();
        assert_eq!(env.inner_payload, b"plain");
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let key = [0x55u8; 32];
        let mut a = sample(b"same bytes");
        let mut b = sample(b"same bytes");
        encrypt_inner(&mut a, &key).unwrap();
        encrypt_inner(&mut b, &key).unwrap();
        assert_ne!(a.inner_payload, b.inner_payload);
    }
}
