// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authenticated symmetric encryption with additional data (AEAD).
//!
//! The algorithm (AES-128-GCM, AES-256-GCM or ChaCha20-Poly1305) follows the
//! cipher suite; nonces are 96 bit and the authentication tag is appended to
//! the ciphertext.
use libcrux::aead::{Algorithm, Iv, Key, Tag, decrypt_detached, encrypt_detached};

use crate::crypto::CryptoError;
use crate::crypto::suite::{AeadAlgorithm, CipherSuite};

pub const AEAD_NONCE_SIZE: usize = 12;

fn algorithm(suite: CipherSuite) -> Algorithm {
    match suite.params().aead {
        AeadAlgorithm::Aes128Gcm => Algorithm::Aes128Gcm,
        AeadAlgorithm::Aes256Gcm => Algorithm::Aes256Gcm,
        AeadAlgorithm::ChaCha20Poly1305 => Algorithm::Chacha20Poly1305,
    }
}

fn iv(nonce: &[u8]) -> Result<Iv, CryptoError> {
    let nonce: [u8; AEAD_NONCE_SIZE] =
        nonce.try_into().map_err(|_| CryptoError::InvalidNonce)?;
    Iv::new(nonce).map_err(CryptoError::InvalidAeadArgument)
}

pub fn aead_seal(
    suite: CipherSuite,
    key: &[u8],
    plaintext: &[u8],
    nonce: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let algorithm = algorithm(suite);
    let key = Key::from_slice(algorithm, key).map_err(CryptoError::InvalidAeadArgument)?;

    let (tag, mut ciphertext) =
        encrypt_detached(&key, plaintext, iv(nonce)?, aad).map_err(CryptoError::AeadSeal)?;

    // Attach authenticated tag to the end of ciphertext.
    ciphertext.extend_from_slice(tag.as_ref());

    Ok(ciphertext)
}

pub fn aead_open(
    suite: CipherSuite,
    key: &[u8],
    ciphertext_tag: &[u8],
    nonce: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let algorithm = algorithm(suite);
    if ciphertext_tag.len() < algorithm.tag_size() {
        return Err(CryptoError::InvalidAeadArgument(
            libcrux::aead::Error::InvalidTag,
        ));
    }

    // Extract authenticated tag from the end of ciphertext.
    let boundary = ciphertext_tag.len() - algorithm.tag_size();
    let ciphertext = &ciphertext_tag[..boundary];
    let tag = &ciphertext_tag[boundary..];

    let key = Key::from_slice(algorithm, key).map_err(CryptoError::InvalidAeadArgument)?;
    let tag = Tag::from_slice(tag).map_err(CryptoError::InvalidAeadArgument)?;

    let plaintext =
        decrypt_detached(&key, ciphertext, iv(nonce)?, aad, &tag).map_err(CryptoError::AeadOpen)?;

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use crate::crypto::CryptoError;
    use crate::crypto::rng::Rng;
    use crate::crypto::suite::CipherSuite;

    use super::{aead_open, aead_seal};

    #[test]
    fn seal_and_open() {
        let rng = Rng::from_seed([1; 32]);

        for suite in [
            CipherSuite::X25519Aes128GcmSha256Ed25519,
            CipherSuite::X25519ChaCha20Poly1305Sha256Ed25519,
        ] {
            let key = rng.random_vec(suite.aead_key_size()).unwrap();
            let nonce = rng.random_vec(suite.aead_nonce_size()).unwrap();

            let ciphertext =
                aead_seal(suite, &key, b"Hello, Grove!", &nonce, b"header").unwrap();
            let plaintext = aead_open(suite, &key, &ciphertext, &nonce, b"header").unwrap();

            assert_eq!(plaintext, b"Hello, Grove!");
        }
    }

    #[test]
    fn open_failures() {
        let rng = Rng::from_seed([2; 32]);
        let suite = CipherSuite::X25519Aes128GcmSha256Ed25519;

        let key = rng.random_vec(suite.aead_key_size()).unwrap();
        let nonce = rng.random_vec(suite.aead_nonce_size()).unwrap();
        let ciphertext = aead_seal(suite, &key, b"Hello, Grove!", &nonce, b"header").unwrap();

        // Wrong key.
        let invalid_key = rng.random_vec(suite.aead_key_size()).unwrap();
        let result = aead_open(suite, &invalid_key, &ciphertext, &nonce, b"header");
        assert!(matches!(result, Err(CryptoError::AeadOpen(_))));

        // Wrong aad.
        let result = aead_open(suite, &key, &ciphertext, &nonce, b"other header");
        assert!(matches!(result, Err(CryptoError::AeadOpen(_))));

        // Tampered ciphertext.
        let mut tampered = ciphertext.clone();
        tampered[0] ^= 0x01;
        let result = aead_open(suite, &key, &tampered, &nonce, b"header");
        assert!(matches!(result, Err(CryptoError::AeadOpen(_))));
    }
}
