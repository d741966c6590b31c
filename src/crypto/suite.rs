// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cipher-suite registry.
//!
//! Every registered suite carries its full parameter record so suite
//! negotiation and the wire format round-trip for all of them. The default
//! provider implements the X25519/SHA-256 family; see `DESIGN.md` for the
//! support matrix.
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tls_codec::{Deserialize as TlsDeserialize, Serialize as TlsSerialize, Size};

use crate::crypto::CryptoError;
use crate::crypto::signature::SignatureScheme;

/// Digest family backing a suite's KDF, MACs and tree hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

/// AEAD algorithm identifiers, aligned with the HPKE registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AeadAlgorithm {
    Aes128Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
}

/// KEM identifiers, aligned with the HPKE registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KemAlgorithm {
    DhKemX25519,
    DhKemP256,
    DhKemX448,
    DhKemP521,
}

/// Static parameter record of a registered suite.
#[derive(Clone, Copy, Debug)]
pub struct SuiteParams {
    pub kem: KemAlgorithm,
    pub hash: HashAlgorithm,
    pub aead: AeadAlgorithm,
    pub signature: SignatureScheme,
    /// Output size of the suite digest and KDF (`Nh`).
    pub hash_size: usize,
    pub aead_key_size: usize,
    pub aead_nonce_size: usize,
    /// Whether the default provider implements the underlying primitives.
    pub supported: bool,
}

/// The six registered cipher suites.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum CipherSuite {
    X25519Aes128GcmSha256Ed25519 = 0x0001,
    P256Aes128GcmSha256P256 = 0x0002,
    X25519ChaCha20Poly1305Sha256Ed25519 = 0x0003,
    X448Aes256GcmSha512Ed448 = 0x0004,
    P521Aes256GcmSha512P521 = 0x0005,
    X448ChaCha20Poly1305Sha512Ed448 = 0x0006,
}

impl CipherSuite {
    pub fn try_from_u16(value: u16) -> Result<Self, CryptoError> {
        match value {
            0x0001 => Ok(Self::X25519Aes128GcmSha256Ed25519),
            0x0002 => Ok(Self::P256Aes128GcmSha256P256),
            0x0003 => Ok(Self::X25519ChaCha20Poly1305Sha256Ed25519),
            0x0004 => Ok(Self::X448Aes256GcmSha512Ed448),
            0x0005 => Ok(Self::P521Aes256GcmSha512P521),
            0x0006 => Ok(Self::X448ChaCha20Poly1305Sha512Ed448),
            _ => Err(CryptoError::UnknownSuite(value)),
        }
    }

    pub fn params(&self) -> &'static SuiteParams {
        match self {
            Self::X25519Aes128GcmSha256Ed25519 => &SuiteParams {
                kem: KemAlgorithm::DhKemX25519,
                hash: HashAlgorithm::Sha256,
                aead: AeadAlgorithm::Aes128Gcm,
                signature: SignatureScheme::Ed25519,
                hash_size: 32,
                aead_key_size: 16,
                aead_nonce_size: 12,
                supported: true,
            },
            Self::P256Aes128GcmSha256P256 => &SuiteParams {
                kem: KemAlgorithm::DhKemP256,
                hash: HashAlgorithm::Sha256,
                aead: AeadAlgorithm::Aes128Gcm,
                signature: SignatureScheme::EcdsaSecp256r1Sha256,
                hash_size: 32,
                aead_key_size: 16,
                aead_nonce_size: 12,
                supported: false,
            },
            Self::X25519ChaCha20Poly1305Sha256Ed25519 => &SuiteParams {
                kem: KemAlgorithm::DhKemX25519,
                hash: HashAlgorithm::Sha256,
                aead: AeadAlgorithm::ChaCha20Poly1305,
                signature: SignatureScheme::Ed25519,
                hash_size: 32,
                aead_key_size: 32,
                aead_nonce_size: 12,
                supported: true,
            },
            Self::X448Aes256GcmSha512Ed448 => &SuiteParams {
                kem: KemAlgorithm::DhKemX448,
                hash: HashAlgorithm::Sha512,
                aead: AeadAlgorithm::Aes256Gcm,
                signature: SignatureScheme::Ed448,
                hash_size: 64,
                aead_key_size: 32,
                aead_nonce_size: 12,
                supported: false,
            },
            Self::P521Aes256GcmSha512P521 => &SuiteParams {
                kem: KemAlgorithm::DhKemP521,
                hash: HashAlgorithm::Sha512,
                aead: AeadAlgorithm::Aes256Gcm,
                signature: SignatureScheme::EcdsaSecp521r1Sha512,
                hash_size: 64,
                aead_key_size: 32,
                aead_nonce_size: 12,
                supported: false,
            },
            Self::X448ChaCha20Poly1305Sha512Ed448 => &SuiteParams {
                kem: KemAlgorithm::DhKemX448,
                hash: HashAlgorithm::Sha512,
                aead: AeadAlgorithm::ChaCha20Poly1305,
                signature: SignatureScheme::Ed448,
                hash_size: 64,
                aead_key_size: 32,
                aead_nonce_size: 12,
                supported: false,
            },
        }
    }

    /// Output size of the suite digest and KDF (`Nh`).
    pub fn hash_size(&self) -> usize {
        self.params().hash_size
    }

    pub fn aead_key_size(&self) -> usize {
        self.params().aead_key_size
    }

    pub fn aead_nonce_size(&self) -> usize {
        self.params().aead_nonce_size
    }

    pub fn signature_scheme(&self) -> SignatureScheme {
        self.params().signature
    }

    pub(crate) fn require_supported(&self) -> Result<(), CryptoError> {
        if self.params().supported {
            Ok(())
        } else {
            Err(CryptoError::UnsupportedSuite(*self))
        }
    }
}

impl Size for CipherSuite {
    fn tls_serialized_len(&self) -> usize {
        2
    }
}

impl TlsSerialize for CipherSuite {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        (*self as u16).tls_serialize(writer)
    }
}

impl TlsDeserialize for CipherSuite {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let value = u16::tls_deserialize(bytes)?;
        Self::try_from_u16(value)
            .map_err(|_| tls_codec::Error::DecodingError(format!("unknown cipher suite {value}")))
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{decode, encode};

    use super::CipherSuite;

    #[test]
    fn registry_is_complete() {
        for id in 1..=6u16 {
            let suite = CipherSuite::try_from_u16(id).unwrap();
            let params = suite.params();
            assert!(params.hash_size == 32 || params.hash_size == 64);
            assert!(params.aead_key_size == 16 || params.aead_key_size == 32);
            assert_eq!(params.aead_nonce_size, 12);
        }
        assert!(CipherSuite::try_from_u16(0).is_err());
        assert!(CipherSuite::try_from_u16(7).is_err());
    }

    #[test]
    fn wire_round_trip() {
        let suite = CipherSuite::X25519ChaCha20Poly1305Sha256Ed25519;
        let bytes = encode(&suite).unwrap();
        assert_eq!(bytes, vec![0x00, 0x03]);
        assert_eq!(decode::<CipherSuite>(&bytes).unwrap(), suite);
    }

    #[test]
    fn support_matrix() {
        assert!(CipherSuite::X25519Aes128GcmSha256Ed25519.params().supported);
        assert!(
            CipherSuite::X25519ChaCha20Poly1305Sha256Ed25519
                .params()
                .supported
        );
        assert!(!CipherSuite::X448Aes256GcmSha512Ed448.params().supported);
    }
}
