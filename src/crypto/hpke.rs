// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hybrid Public Key Encryption (HPKE).
//!
//! The KEM/KDF/AEAD triple follows the cipher suite. Besides the usual
//! seal/open pair this module derives key pairs deterministically from path
//! secrets and implements the one-shot exporter used for external
//! initialization: a DH-KEM encapsulation whose shared secret is run through
//! a labeled expansion instead of an AEAD.
//!
//! <https://www.rfc-editor.org/rfc/rfc9180>
use std::io::{Read, Write};

use libcrux::hpke::{HPKEConfig, HpkeOpen, HpkeSeal, Mode, aead, kdf, kem};
use serde::{Deserialize, Serialize};
use tls_codec::{Deserialize as TlsDeserialize, Serialize as TlsSerialize, Size};

use crate::codec::{opaque16_len, read_opaque16, write_opaque16};
use crate::crypto::hkdf::{expand_with_label, extract};
use crate::crypto::rng::Rng;
use crate::crypto::secret::Secret;
use crate::crypto::suite::{AeadAlgorithm, CipherSuite, KemAlgorithm};
use crate::crypto::x25519::{DH_SECRET_KEY_SIZE, DhPublicKey, DhSecretKey};
use crate::crypto::CryptoError;

/// Public key of an HPKE key pair, kept as suite-opaque bytes on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HpkePublicKey(#[serde(with = "serde_bytes")] Vec<u8>);

impl HpkePublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Private key of an HPKE key pair together with its cached public half.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HpkePrivateKey {
    secret: Secret,
    public: HpkePublicKey,
}

impl HpkePrivateKey {
    pub fn public_key(&self) -> &HpkePublicKey {
        &self.public
    }

    pub(crate) fn secret_bytes(&self) -> &[u8] {
        self.secret.as_bytes()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpkeCiphertext {
    /// Encapsulated, shared secret generated for this transaction.
    #[serde(with = "serde_bytes")]
    pub kem_output: Vec<u8>,

    /// Encrypted payload.
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

fn config(suite: CipherSuite) -> Result<HPKEConfig, CryptoError> {
    suite.require_supported()?;
    let kem = match suite.params().kem {
        KemAlgorithm::DhKemX25519 => kem::KEM::DHKEM_X25519_HKDF_SHA256,
        // Gated off by `require_supported` above.
        _ => return Err(CryptoError::UnsupportedSuite(suite)),
    };
    let aead = match suite.params().aead {
        AeadAlgorithm::Aes128Gcm => aead::AEAD::AES_128_GCM,
        AeadAlgorithm::Aes256Gcm => aead::AEAD::AES_256_GCM,
        AeadAlgorithm::ChaCha20Poly1305 => aead::AEAD::ChaCha20Poly1305,
    };
    Ok(HPKEConfig(Mode::mode_base, kem, kdf::KDF::HKDF_SHA256, aead))
}

/// Derive an HPKE key pair deterministically from input key material, e.g. a
/// node secret along an update path.
pub fn derive_key_pair(
    suite: CipherSuite,
    ikm: &Secret,
) -> Result<HpkePrivateKey, CryptoError> {
    suite.require_supported()?;
    let bytes: [u8; DH_SECRET_KEY_SIZE] = ikm
        .as_bytes()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyMaterial)?;
    let secret_key = DhSecretKey::from_bytes(bytes);
    let public_key = secret_key.public_key()?;
    Ok(HpkePrivateKey {
        secret: Secret::from_slice(secret_key.as_bytes()),
        public: HpkePublicKey(public_key.as_bytes().to_vec()),
    })
}

/// Encrypt a secret payload to a public key using HPKE.
pub fn hpke_seal(
    suite: CipherSuite,
    public_key: &HpkePublicKey,
    info: &[u8],
    aad: &[u8],
    plaintext: &[u8],
    rng: &Rng,
) -> Result<HpkeCiphertext, CryptoError> {
    let config = config(suite)?;
    let randomness = rng.random_vec(kem::Nsk(config.1))?;
    let libcrux::hpke::HPKECiphertext(kem_output, ciphertext) = HpkeSeal(
        config,
        public_key.as_bytes(),
        info,
        aad,
        plaintext,
        None,
        None,
        None,
        randomness,
    )
    .map_err(CryptoError::HpkeSeal)?;
    Ok(HpkeCiphertext {
        kem_output,
        ciphertext,
    })
}

/// Decrypt a secret payload for a receiver holding the secret key.
pub fn hpke_open(
    suite: CipherSuite,
    input: &HpkeCiphertext,
    secret_key: &HpkePrivateKey,
    info: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let config = config(suite)?;
    let ciphertext =
        libcrux::hpke::HPKECiphertext(input.kem_output.to_vec(), input.ciphertext.to_vec());
    let plaintext = HpkeOpen(
        config,
        &ciphertext,
        secret_key.secret_bytes(),
        info,
        aad,
        None,
        None,
        None,
    )
    .map_err(CryptoError::HpkeOpen)?;
    Ok(plaintext)
}

fn export(
    suite: CipherSuite,
    agreement: &[u8],
    kem_output: &[u8],
    recipient_public: &[u8],
    label: &str,
    length: usize,
) -> Result<Secret, CryptoError> {
    let prk = extract(suite, &[], agreement);
    let mut context = kem_output.to_vec();
    context.extend_from_slice(recipient_public);
    expand_with_label(suite, &prk, label, &context, length)
}

/// Sender side of the one-shot exporter: encapsulate to the recipient's
/// public key and derive an exported secret from the shared agreement.
pub fn export_seal(
    suite: CipherSuite,
    public_key: &HpkePublicKey,
    label: &str,
    length: usize,
    rng: &Rng,
) -> Result<(Vec<u8>, Secret), CryptoError> {
    suite.require_supported()?;
    let ephemeral = DhSecretKey::from_bytes(rng.random_array()?);
    let kem_output = ephemeral.public_key()?.to_bytes().to_vec();
    let recipient = DhPublicKey::from_bytes(
        public_key
            .as_bytes()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyMaterial)?,
    );
    let agreement = ephemeral.calculate_agreement(&recipient)?;
    let secret = export(suite, &agreement, &kem_output, public_key.as_bytes(), label, length)?;
    Ok((kem_output, secret))
}

/// Receiver side of the one-shot exporter: decapsulate and re-derive the
/// exported secret.
pub fn export_open(
    suite: CipherSuite,
    kem_output: &[u8],
    secret_key: &HpkePrivateKey,
    label: &str,
    length: usize,
) -> Result<Secret, CryptoError> {
    suite.require_supported()?;
    let sender = DhPublicKey::from_bytes(
        kem_output
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyMaterial)?,
    );
    let bytes: [u8; DH_SECRET_KEY_SIZE] = secret_key
        .secret_bytes()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyMaterial)?;
    let own = DhSecretKey::from_bytes(bytes);
    let agreement = own.calculate_agreement(&sender)?;
    export(
        suite,
        &agreement,
        kem_output,
        secret_key.public_key().as_bytes(),
        label,
        length,
    )
}

impl Size for HpkePublicKey {
    fn tls_serialized_len(&self) -> usize {
        opaque16_len(&self.0)
    }
}

impl TlsSerialize for HpkePublicKey {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        write_opaque16(writer, &self.0)
    }
}

impl TlsDeserialize for HpkePublicKey {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        Ok(Self(read_opaque16(bytes)?))
    }
}

impl Size for HpkeCiphertext {
    fn tls_serialized_len(&self) -> usize {
        opaque16_len(&self.kem_output) + opaque16_len(&self.ciphertext)
    }
}

impl TlsSerialize for HpkeCiphertext {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> Result<usize, tls_codec::Error> {
        let mut written = write_opaque16(writer, &self.kem_output)?;
        written += write_opaque16(writer, &self.ciphertext)?;
        Ok(written)
    }
}

impl TlsDeserialize for HpkeCiphertext {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
        let kem_output = read_opaque16(bytes)?;
        let ciphertext = read_opaque16(bytes)?;
        Ok(Self {
            kem_output,
            ciphertext,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::rng::Rng;
    use crate::crypto::secret::Secret;
    use crate::crypto::suite::CipherSuite;
    use crate::crypto::CryptoError;

    use super::{derive_key_pair, export_open, export_seal, hpke_open, hpke_seal};

    const SUITE: CipherSuite = CipherSuite::X25519Aes128GcmSha256Ed25519;

    #[test]
    fn seal_and_open() {
        let rng = Rng::from_seed([1; 32]);

        let key_pair =
            derive_key_pair(SUITE, &Secret::from_bytes(rng.random_vec(32).unwrap())).unwrap();

        let ciphertext = hpke_seal(
            SUITE,
            key_pair.public_key(),
            b"some info",
            b"some aad",
            b"Hello, Grove!",
            &rng,
        )
        .unwrap();
        let plaintext =
            hpke_open(SUITE, &ciphertext, &key_pair, b"some info", b"some aad").unwrap();

        assert_eq!(plaintext, b"Hello, Grove!");
    }

    #[test]
    fn decryption_failed() {
        let rng = Rng::from_seed([1; 32]);

        let key_pair =
            derive_key_pair(SUITE, &Secret::from_bytes(rng.random_vec(32).unwrap())).unwrap();
        let ciphertext = hpke_seal(
            SUITE,
            key_pair.public_key(),
            b"info",
            b"aad",
            b"Hello, Grove!",
            &rng,
        )
        .unwrap();

        // Invalid secret key.
        let invalid_key_pair =
            derive_key_pair(SUITE, &Secret::from_bytes(rng.random_vec(32).unwrap())).unwrap();
        let result = hpke_open(SUITE, &ciphertext, &invalid_key_pair, b"info", b"aad");
        assert!(matches!(result, Err(CryptoError::HpkeOpen(_))));

        // Invalid aad.
        let result = hpke_open(SUITE, &ciphertext, &key_pair, b"info", b"other aad");
        assert!(matches!(result, Err(CryptoError::HpkeOpen(_))));
    }

    #[test]
    fn export_agreement() {
        let rng = Rng::from_seed([3; 32]);

        let key_pair =
            derive_key_pair(SUITE, &Secret::from_bytes(rng.random_vec(32).unwrap())).unwrap();

        let (kem_output, sender_secret) =
            export_seal(SUITE, key_pair.public_key(), "external init", 32, &rng).unwrap();
        let receiver_secret =
            export_open(SUITE, &kem_output, &key_pair, "external init", 32).unwrap();

        assert_eq!(sender_secret, receiver_secret);
    }

    #[test]
    fn derived_key_pair_is_deterministic() {
        let ikm = Secret::from_slice(&[9; 32]);
        let pair_1 = derive_key_pair(SUITE, &ikm).unwrap();
        let pair_2 = derive_key_pair(SUITE, &ikm).unwrap();
        assert_eq!(pair_1.public_key(), pair_2.public_key());
    }
}
