// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity signatures.
//!
//! Ed25519 (SHA-512) is implemented; the remaining registered schemes are
//! recognized on the wire so credentials advertising them round-trip, but
//! signing and verification with them is rejected by this provider.
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tls_codec::{Deserialize as TlsDeserialize, Serialize as TlsSerialize, Size};

use crate::codec::{opaque16_len, read_opaque16, write_opaque16};
use crate::crypto::rng::{Rng, RngError};
use crate::crypto::secret::Secret;

pub const ED25519_SIGNING_KEY_SIZE: usize = 32;
pub const ED25519_VERIFYING_KEY_SIZE: usize = 32;
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Registered signature schemes (TLS SignatureScheme code points).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum SignatureScheme {
    EcdsaSecp256r1Sha256 = 0x0403,
    EcdsaSecp384r1Sha384 = 0x0503,
    EcdsaSecp521r1Sha512 = 0x0603,
    Ed25519 = 0x0807,
    Ed448 = 0x0808,
}

impl SignatureScheme {
    pub fn try_from_u16(value: u16) -> Result<Self, SignatureError> {
        match value {
            0x0403 => Ok(Self::EcdsaSecp256r1Sha256),
            0x0503 => Ok(Self::EcdsaSecp384r1Sha384),
            0x0603 => Ok(Self::EcdsaSecp521r1Sha512),
            0x0807 => Ok(Self::Ed25519),
            0x0808 => Ok(Self::Ed448),
            _ => Err(SignatureError::UnknownScheme(value)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignaturePrivateKey {
    scheme: SignatureScheme,
    secret: Secret,
    public: SignaturePublicKey,
}

impl SignaturePrivateKey {
    /// Derive a signing key pair deterministically from input key material.
    pub fn derive(
        scheme: SignatureScheme,
        ikm: [u8; ED25519_SIGNING_KEY_SIZE],
    ) -> Result<Self, SignatureError> {
        match scheme {
            SignatureScheme::Ed25519 => {
                let mut public = [0u8; ED25519_VERIFYING_KEY_SIZE];
                libcrux_ed25519::secret_to_public(&mut public, &ikm);
                Ok(Self {
                    scheme,
                    secret: Secret::from_slice(&ikm),
                    public: SignaturePublicKey(public.to_vec()),
                })
            }
            other => Err(SignatureError::UnsupportedScheme(other)),
        }
    }

    pub fn generate(scheme: SignatureScheme, rng: &Rng) -> Result<Self, SignatureError> {
        Self::derive(scheme, rng.random_array()?)
    }

    pub fn public_key(&self) -> &SignaturePublicKey {
        &self.public
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn sign(&self, bytes: &[u8]) -> Result<Signature, SignatureError> {
        match self.scheme {
            SignatureScheme::Ed25519 => {
                let seed: [u8; ED25519_SIGNING_KEY_SIZE] = self
                    .secret
                    .as_bytes()
                    .try_into()
                    .map_err(|_| SignatureError::SigningFailed)?;
                let bytes = libcrux_ed25519::sign(bytes, &seed)
                    .map_err(|_| SignatureError::SigningFailed)?;
                Ok(Signature(bytes.to_vec()))
            }
            other => Err(SignatureError::UnsupportedScheme(other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignaturePublicKey(#[serde(with = "serde_bytes")] Vec<u8>);

impl SignaturePublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn verify(
        &self,
        scheme: SignatureScheme,
        bytes: &[u8],
        signature: &Signature,
    ) -> Result<(), SignatureError> {
        match scheme {
            SignatureScheme::Ed25519 => {
                let public: &[u8; ED25519_VERIFYING_KEY_SIZE] = self
                    .0
                    .as_slice()
                    .try_into()
                    .map_err(|_| SignatureError::VerificationFailed)?;
                let signature: &[u8; ED25519_SIGNATURE_SIZE] = signature
                    .0
                    .as_slice()
                    .try_into()
                    .map_err(|_| SignatureError::VerificationFailed)?;
                libcrux_ed25519::verify(bytes, public, signature)
                    .map_err(|_| SignatureError::VerificationFailed)?;
                Ok(())
            }
            other => Err(SignatureError::UnsupportedScheme(other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes")] Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature does not match public key and payload")]
    VerificationFailed,

    #[error("could not sign payload")]
    SigningFailed,

    #[error("unknown signature scheme 0x{0:04x}")]
    UnknownScheme(u16),

    #[error("signature scheme {0:?} is not supported by this provider")]
    UnsupportedScheme(SignatureScheme),

    #[error(transparent)]
    Rng(#[from] RngError),
}

impl Size for SignatureScheme {
    fn tls_serialized_len(&self) -> usize {
        2
    }
}

impl TlsSerialize for SignatureScheme {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        (*self as u16).tls_serialize(writer)
    }
}

impl TlsDeserialize for SignatureScheme {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let value = u16::tls_deserialize(bytes)?;
        Self::try_from_u16(value).map_err(|_| {
            tls_codec::Error::DecodingError(format!("unknown signature scheme {value}"))
        })
    }
}

impl Size for SignaturePublicKey {
    fn tls_serialized_len(&self) -> usize {
        opaque16_len(&self.0)
    }
}

impl TlsSerialize for SignaturePublicKey {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        write_opaque16(writer, &self.0)
    }
}

impl TlsDeserialize for SignaturePublicKey {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        Ok(Self(read_opaque16(bytes)?))
    }
}

impl Size for Signature {
    fn tls_serialized_len(&self) -> usize {
        opaque16_len(&self.0)
    }
}

impl TlsSerialize for Signature {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        write_opaque16(writer, &self.0)
    }
}

impl TlsDeserialize for Signature {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        Ok(Self(read_opaque16(bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::rng::Rng;

    use super::{SignatureError, SignaturePrivateKey, SignatureScheme};

    #[test]
    fn sign_and_verify() {
        let rng = Rng::from_seed([1; 32]);

        let signing_key = SignaturePrivateKey::generate(SignatureScheme::Ed25519, &rng).unwrap();
        let signature = signing_key.sign(b"Hello, Grove!").unwrap();

        assert!(
            signing_key
                .public_key()
                .verify(SignatureScheme::Ed25519, b"Hello, Grove!", &signature)
                .is_ok()
        );
    }

    #[test]
    fn failed_verify() {
        let rng = Rng::from_seed([1; 32]);

        let signing_key = SignaturePrivateKey::generate(SignatureScheme::Ed25519, &rng).unwrap();
        let signature = signing_key.sign(b"Hello, Grove!").unwrap();

        let other_key = SignaturePrivateKey::generate(SignatureScheme::Ed25519, &rng).unwrap();

        assert!(matches!(
            signing_key.public_key().verify(
                SignatureScheme::Ed25519,
                b"Tampered data",
                &signature
            ),
            Err(SignatureError::VerificationFailed)
        ));
        assert!(matches!(
            other_key
                .public_key()
                .verify(SignatureScheme::Ed25519, b"Hello, Grove!", &signature),
            Err(SignatureError::VerificationFailed)
        ));
    }

    #[test]
    fn unsupported_scheme() {
        let rng = Rng::from_seed([1; 32]);
        let result = SignaturePrivateKey::generate(SignatureScheme::Ed448, &rng);
        assert!(matches!(
            result,
            Err(SignatureError::UnsupportedScheme(SignatureScheme::Ed448))
        ));
    }
}
