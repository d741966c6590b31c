// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key packages: signed bundles advertising a member's identity, supported
//! parameters and HPKE initialization key.
use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tls_codec::{Deserialize as TlsDeserialize, Serialize as TlsSerialize, Size};

use crate::codec::{
    encode, opaque32_len, read_opaque32, read_vector32, vector32_len, write_opaque32,
    write_vector32,
};
use crate::credential::Credential;
use crate::crypto::hpke::HpkePublicKey;
use crate::crypto::sha2::hash;
use crate::crypto::signature::{Signature, SignaturePrivateKey};
use crate::crypto::suite::CipherSuite;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProtocolVersion {
    Mls10 = 0x01,
}

impl ProtocolVersion {
    fn try_from_u8(value: u8) -> std::result::Result<Self, tls_codec::Error> {
        match value {
            0x01 => Ok(Self::Mls10),
            other => Err(tls_codec::Error::DecodingError(format!(
                "unknown protocol version {other}"
            ))),
        }
    }
}

pub type ExtensionType = u16;

pub const EXTENSION_CAPABILITIES: ExtensionType = 0x0001;
pub const EXTENSION_LIFETIME: ExtensionType = 0x0002;
pub const EXTENSION_PARENT_HASH: ExtensionType = 0x0004;
pub const EXTENSION_RATCHET_TREE: ExtensionType = 0x0005;

/// An extension as carried on the wire: a registered type and its opaque
/// payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub extension_type: ExtensionType,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl Extension {
    pub fn new<T: TlsSerialize>(extension_type: ExtensionType, value: &T) -> Result<Self> {
        Ok(Self {
            extension_type,
            data: encode(value)?,
        })
    }
}

/// Protocol versions, suites and extensions a member can handle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub versions: Vec<u8>,
    pub cipher_suites: Vec<CipherSuite>,
    pub extensions: Vec<ExtensionType>,
}

impl Capabilities {
    pub fn for_suite(suite: CipherSuite) -> Self {
        Self {
            versions: vec![ProtocolVersion::Mls10 as u8],
            cipher_suites: vec![suite],
            extensions: vec![
                EXTENSION_CAPABILITIES,
                EXTENSION_LIFETIME,
                EXTENSION_PARENT_HASH,
            ],
        }
    }
}

/// Validity window of a key package, UNIX seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
    pub not_before: u64,
    pub not_after: u64,
}

impl Default for Lifetime {
    fn default() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(0);
        // Backdate slightly to tolerate clock skew between members.
        Self {
            not_before: now.saturating_sub(3600),
            not_after: now + 60 * 60 * 24 * 90,
        }
    }
}

impl Lifetime {
    pub fn verify(&self, now: u64) -> bool {
        self.not_before <= now && now <= self.not_after
    }
}

/// A signed bundle binding protocol version, cipher suite, HPKE init key and
/// credential.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyPackage {
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub init_key: HpkePublicKey,
    pub credential: Credential,
    pub extensions: Vec<Extension>,
    pub signature: Signature,
}

impl Eq for KeyPackage {}

impl KeyPackage {
    /// Create and sign a fresh key package.
    pub fn new(
        cipher_suite: CipherSuite,
        init_key: HpkePublicKey,
        credential: Credential,
        mut extensions: Vec<Extension>,
        signing_key: &SignaturePrivateKey,
    ) -> Result<Self> {
        if !extensions
            .iter()
            .any(|ext| ext.extension_type == EXTENSION_CAPABILITIES)
        {
            extensions.insert(
                0,
                Extension::new(EXTENSION_CAPABILITIES, &Capabilities::for_suite(cipher_suite))?,
            );
        }

        let mut key_package = Self {
            version: ProtocolVersion::Mls10,
            cipher_suite,
            init_key,
            credential,
            extensions,
            signature: Signature::from_bytes(Vec::new()),
        };
        key_package.sign(signing_key)?;
        Ok(key_package)
    }

    fn to_be_signed(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        (self.version as u8)
            .tls_serialize(&mut out)
            .and_then(|_| self.cipher_suite.tls_serialize(&mut out))
            .and_then(|_| self.init_key.tls_serialize(&mut out))
            .and_then(|_| self.credential.tls_serialize(&mut out))
            .and_then(|_| write_vector32(&mut out, &self.extensions))
            .map_err(Error::Codec)?;
        Ok(out)
    }

    /// (Re-)sign after mutating any field, e.g. the parent-hash extension.
    pub fn sign(&mut self, signing_key: &SignaturePrivateKey) -> Result<()> {
        let tbs = self.to_be_signed()?;
        self.signature = signing_key
            .sign(&tbs)
            .map_err(|err| Error::Crypto(err.into()))?;
        Ok(())
    }

    /// Check the credential signature and, when present, the lifetime.
    pub fn verify(&self) -> Result<()> {
        if let Some(lifetime) = self.lifetime()? {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|duration| duration.as_secs())
                .unwrap_or(0);
            if !lifetime.verify(now) {
                return Err(Error::Protocol("key package lifetime expired"));
            }
        }

        let tbs = self.to_be_signed()?;
        self.credential.verify(&tbs, &self.signature)
    }

    /// Suite digest over the serialized key package; identifies it in
    /// welcome messages and the leaf-secret cache.
    pub fn hash(&self) -> Result<Vec<u8>> {
        Ok(hash(self.cipher_suite, &[&encode(self)?]))
    }

    fn find_extension(&self, extension_type: ExtensionType) -> Option<&Extension> {
        self.extensions
            .iter()
            .find(|ext| ext.extension_type == extension_type)
    }

    pub fn capabilities(&self) -> Result<Option<Capabilities>> {
        match self.find_extension(EXTENSION_CAPABILITIES) {
            None => Ok(None),
            Some(ext) => Ok(Some(crate::codec::decode(&ext.data)?)),
        }
    }

    pub fn lifetime(&self) -> Result<Option<Lifetime>> {
        match self.find_extension(EXTENSION_LIFETIME) {
            None => Ok(None),
            Some(ext) => Ok(Some(crate::codec::decode(&ext.data)?)),
        }
    }

    pub fn parent_hash(&self) -> Result<Option<Vec<u8>>> {
        match self.find_extension(EXTENSION_PARENT_HASH) {
            None => Ok(None),
            Some(ext) => {
                let mut slice = ext.data.as_slice();
                let value = crate::codec::read_opaque8(&mut slice)?;
                if !slice.is_empty() {
                    return Err(Error::Protocol("trailing bytes after message"));
                }
                Ok(Some(value))
            }
        }
    }

    /// Replace the parent-hash extension; callers re-sign afterwards.
    pub fn set_parent_hash(&mut self, parent_hash: &[u8]) -> Result<()> {
        let mut data = Vec::new();
        crate::codec::write_opaque8(&mut data, parent_hash)?;
        self.extensions
            .retain(|ext| ext.extension_type != EXTENSION_PARENT_HASH);
        self.extensions.push(Extension {
            extension_type: EXTENSION_PARENT_HASH,
            data,
        });
        Ok(())
    }
}

impl Size for Extension {
    fn tls_serialized_len(&self) -> usize {
        2 + opaque32_len(&self.data)
    }
}

impl TlsSerialize for Extension {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = self.extension_type.tls_serialize(writer)?;
        written += write_opaque32(writer, &self.data)?;
        Ok(written)
    }
}

impl TlsDeserialize for Extension {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        let extension_type = u16::tls_deserialize(bytes)?;
        let data = read_opaque32(bytes)?;
        Ok(Self {
            extension_type,
            data,
        })
    }
}

impl Size for Capabilities {
    fn tls_serialized_len(&self) -> usize {
        (1 + self.versions.len())
            + (1 + 2 * self.cipher_suites.len())
            + (1 + 2 * self.extensions.len())
    }
}

impl TlsSerialize for Capabilities {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = crate::codec::write_opaque8(writer, &self.versions)?;

        let mut suites = Vec::new();
        for suite in &self.cipher_suites {
            suite.tls_serialize(&mut suites)?;
        }
        written += crate::codec::write_opaque8(writer, &suites)?;

        let mut extensions = Vec::new();
        for extension in &self.extensions {
            extension.tls_serialize(&mut extensions)?;
        }
        written += crate::codec::write_opaque8(writer, &extensions)?;
        Ok(written)
    }
}

impl TlsDeserialize for Capabilities {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        let versions = crate::codec::read_opaque8(bytes)?;

        let suites = crate::codec::read_opaque8(bytes)?;
        let mut slice = suites.as_slice();
        let mut cipher_suites = Vec::new();
        while !slice.is_empty() {
            cipher_suites.push(CipherSuite::tls_deserialize(&mut slice)?);
        }

        let extensions = crate::codec::read_opaque8(bytes)?;
        let mut slice = extensions.as_slice();
        let mut extension_types = Vec::new();
        while !slice.is_empty() {
            extension_types.push(u16::tls_deserialize(&mut slice)?);
        }

        Ok(Self {
            versions,
            cipher_suites,
            extensions: extension_types,
        })
    }
}

impl Size for Lifetime {
    fn tls_serialized_len(&self) -> usize {
        16
    }
}

impl TlsSerialize for Lifetime {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = self.not_before.tls_serialize(writer)?;
        written += self.not_after.tls_serialize(writer)?;
        Ok(written)
    }
}

impl TlsDeserialize for Lifetime {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        let not_before = u64::tls_deserialize(bytes)?;
        let not_after = u64::tls_deserialize(bytes)?;
        Ok(Self {
            not_before,
            not_after,
        })
    }
}

impl Size for KeyPackage {
    fn tls_serialized_len(&self) -> usize {
        1 + self.cipher_suite.tls_serialized_len()
            + self.init_key.tls_serialized_len()
            + self.credential.tls_serialized_len()
            + vector32_len(&self.extensions)
            + self.signature.tls_serialized_len()
    }
}

impl TlsSerialize for KeyPackage {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = (self.version as u8).tls_serialize(writer)?;
        written += self.cipher_suite.tls_serialize(writer)?;
        written += self.init_key.tls_serialize(writer)?;
        written += self.credential.tls_serialize(writer)?;
        written += write_vector32(writer, &self.extensions)?;
        written += self.signature.tls_serialize(writer)?;
        Ok(written)
    }
}

impl TlsDeserialize for KeyPackage {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        let version = ProtocolVersion::try_from_u8(u8::tls_deserialize(bytes)?)?;
        let cipher_suite = CipherSuite::tls_deserialize(bytes)?;
        let init_key = HpkePublicKey::tls_deserialize(bytes)?;
        let credential = Credential::tls_deserialize(bytes)?;
        let extensions = read_vector32(bytes)?;
        let signature = Signature::tls_deserialize(bytes)?;
        Ok(Self {
            version,
            cipher_suite,
            init_key,
            credential,
            extensions,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{decode, encode};
    use crate::credential::Credential;
    use crate::crypto::hpke::derive_key_pair;
    use crate::crypto::rng::Rng;
    use crate::crypto::secret::Secret;
    use crate::crypto::signature::{SignaturePrivateKey, SignatureScheme};
    use crate::crypto::suite::CipherSuite;

    use super::{Capabilities, KeyPackage, Lifetime};

    const SUITE: CipherSuite = CipherSuite::X25519Aes128GcmSha256Ed25519;

    fn test_key_package(seed: u8) -> (KeyPackage, SignaturePrivateKey) {
        let rng = Rng::from_seed([seed; 32]);
        let signing_key = SignaturePrivateKey::generate(SignatureScheme::Ed25519, &rng).unwrap();
        let init_key =
            derive_key_pair(SUITE, &Secret::from_bytes(rng.random_vec(32).unwrap())).unwrap();
        let credential = Credential::basic(
            vec![seed],
            SignatureScheme::Ed25519,
            signing_key.public_key().clone(),
        );
        let key_package = KeyPackage::new(
            SUITE,
            init_key.public_key().clone(),
            credential,
            Vec::new(),
            &signing_key,
        )
        .unwrap();
        (key_package, signing_key)
    }

    #[test]
    fn sign_and_verify() {
        let (key_package, _) = test_key_package(1);
        assert!(key_package.verify().is_ok());

        let mut tampered = key_package.clone();
        tampered.extensions.clear();
        assert!(tampered.verify().is_err());
    }

    #[test]
    fn parent_hash_extension_round_trip() {
        let (mut key_package, signing_key) = test_key_package(2);
        assert_eq!(key_package.parent_hash().unwrap(), None);

        key_package.set_parent_hash(&[7; 32]).unwrap();
        key_package.sign(&signing_key).unwrap();
        assert_eq!(key_package.parent_hash().unwrap(), Some(vec![7; 32]));
        assert!(key_package.verify().is_ok());
    }

    #[test]
    fn hash_identifies_the_package() {
        let (kp_1, _) = test_key_package(3);
        let (kp_2, _) = test_key_package(4);
        assert_ne!(kp_1.hash().unwrap(), kp_2.hash().unwrap());
        assert_eq!(kp_1.hash().unwrap(), kp_1.hash().unwrap());
    }

    #[test]
    fn wire_round_trip() {
        let (key_package, _) = test_key_package(5);
        let bytes = encode(&key_package).unwrap();
        assert_eq!(decode::<KeyPackage>(&bytes).unwrap(), key_package);

        let capabilities = Capabilities::for_suite(SUITE);
        let bytes = encode(&capabilities).unwrap();
        assert_eq!(decode::<Capabilities>(&bytes).unwrap(), capabilities);

        let lifetime = Lifetime::default();
        let bytes = encode(&lifetime).unwrap();
        assert_eq!(decode::<Lifetime>(&bytes).unwrap(), lifetime);
    }
}
