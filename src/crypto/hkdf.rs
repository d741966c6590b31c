// SPDX-License-Identifier: MIT OR Apache-2.0

//! HMAC-based key derivation (HKDF) with the labeled expansion used by the
//! key schedule and TreeKEM.
//!
//! <https://www.rfc-editor.org/rfc/rfc5869>
use hkdf::Hkdf;
use sha2::{Sha256, Sha512};
use tls_codec::Serialize as _;

use crate::codec::{write_opaque8, write_opaque32};
use crate::crypto::CryptoError;
use crate::crypto::secret::Secret;
use crate::crypto::suite::{CipherSuite, HashAlgorithm};

/// Label prefix binding every derivation to this protocol version.
const LABEL_PREFIX: &str = "mls10 ";

pub fn extract(suite: CipherSuite, salt: &[u8], ikm: &[u8]) -> Secret {
    let salt = if salt.is_empty() { None } else { Some(salt) };
    match suite.params().hash {
        HashAlgorithm::Sha256 => {
            let (prk, _) = Hkdf::<Sha256>::extract(salt, ikm);
            Secret::from_slice(&prk)
        }
        HashAlgorithm::Sha512 => {
            let (prk, _) = Hkdf::<Sha512>::extract(salt, ikm);
            Secret::from_slice(&prk)
        }
    }
}

pub fn expand(
    suite: CipherSuite,
    prk: &Secret,
    info: &[u8],
    length: usize,
) -> Result<Secret, CryptoError> {
    let mut okm = vec![0u8; length];
    match suite.params().hash {
        HashAlgorithm::Sha256 => {
            let hk = Hkdf::<Sha256>::from_prk(prk.as_bytes())
                .map_err(|_| CryptoError::InvalidKeyMaterial)?;
            hk.expand(info, &mut okm)
                .map_err(|_| CryptoError::InvalidKeyMaterial)?;
        }
        HashAlgorithm::Sha512 => {
            let hk = Hkdf::<Sha512>::from_prk(prk.as_bytes())
                .map_err(|_| CryptoError::InvalidKeyMaterial)?;
            hk.expand(info, &mut okm)
                .map_err(|_| CryptoError::InvalidKeyMaterial)?;
        }
    }
    Ok(Secret::from_bytes(okm))
}

// struct {
//     uint16 length;
//     opaque label<7..255> = "mls10 " + Label;
//     opaque context<0..2^32-1>;
// } HkdfLabel;
fn hkdf_label(label: &str, context: &[u8], length: usize) -> Result<Vec<u8>, CryptoError> {
    let full_label = format!("{LABEL_PREFIX}{label}");
    let mut out = Vec::new();
    (length as u16)
        .tls_serialize(&mut out)
        .and_then(|_| write_opaque8(&mut out, full_label.as_bytes()))
        .and_then(|_| write_opaque32(&mut out, context))
        .map_err(|_| CryptoError::InvalidKeyMaterial)?;
    Ok(out)
}

/// `Expand-Label(secret, label, context, length)` with the protocol's label
/// prefix.
pub fn expand_with_label(
    suite: CipherSuite,
    secret: &Secret,
    label: &str,
    context: &[u8],
    length: usize,
) -> Result<Secret, CryptoError> {
    let info = hkdf_label(label, context, length)?;
    expand(suite, secret, &info, length)
}

/// `Derive-Secret(secret, label)`: a labeled expansion with empty context
/// and the suite hash size.
pub fn derive_secret(
    suite: CipherSuite,
    secret: &Secret,
    label: &str,
) -> Result<Secret, CryptoError> {
    expand_with_label(suite, secret, label, &[], suite.hash_size())
}

#[cfg(test)]
mod tests {
    use crate::crypto::secret::Secret;
    use crate::crypto::suite::CipherSuite;

    use super::{derive_secret, expand_with_label, extract};

    const SUITE: CipherSuite = CipherSuite::X25519Aes128GcmSha256Ed25519;

    #[test]
    fn extract_then_expand() {
        let prk = extract(SUITE, b"salt", b"input key material");
        assert_eq!(prk.len(), 32);

        let okm_1 = expand_with_label(SUITE, &prk, "test", b"context", 42).unwrap();
        let okm_2 = expand_with_label(SUITE, &prk, "test", b"context", 42).unwrap();
        assert_eq!(okm_1, okm_2);
        assert_eq!(okm_1.len(), 42);
    }

    #[test]
    fn labels_and_contexts_separate_domains() {
        let prk = extract(SUITE, b"", b"input key material");

        let okm_1 = expand_with_label(SUITE, &prk, "one", b"ctx", 32).unwrap();
        let okm_2 = expand_with_label(SUITE, &prk, "two", b"ctx", 32).unwrap();
        let okm_3 = expand_with_label(SUITE, &prk, "one", b"other", 32).unwrap();
        assert_ne!(okm_1, okm_2);
        assert_ne!(okm_1, okm_3);
    }

    #[test]
    fn derive_secret_has_hash_size() {
        let prk = extract(SUITE, b"", b"secret");
        let derived = derive_secret(SUITE, &prk, "init").unwrap();
        assert_eq!(derived.len(), SUITE.hash_size());
    }

    #[test]
    fn output_length_is_respected() {
        let prk = extract(SUITE, b"", b"secret");
        for length in [16, 32, 64] {
            let okm = expand_with_label(SUITE, &prk, "len", &[], length).unwrap();
            assert_eq!(okm.len(), length);
        }
    }
}
