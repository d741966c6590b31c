// SPDX-License-Identifier: MIT OR Apache-2.0

//! Member identity credentials.
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tls_codec::{Deserialize as TlsDeserialize, Serialize as TlsSerialize, Size};

use crate::codec::{
    opaque16_len, read_opaque16, read_vector32, vector32_len, write_opaque16, write_vector32,
};
use crate::crypto::signature::{Signature, SignaturePublicKey, SignatureScheme};
use crate::error::{Error, Result};

const CREDENTIAL_BASIC: u8 = 0x01;
const CREDENTIAL_X509: u8 = 0x02;

/// A bare identity bound to a signature public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicCredential {
    #[serde(with = "serde_bytes")]
    pub identity: Vec<u8>,
    pub signature_scheme: SignatureScheme,
    pub public_key: SignaturePublicKey,
}

/// An identity attested by an X.509 chain, leaf certificate first.
///
/// The chain is carried opaquely; certificate parsing and path validation
/// live outside this crate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct X509Credential {
    pub chain: Vec<CertificateData>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateData(#[serde(with = "serde_bytes")] pub Vec<u8>);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credential {
    Basic(BasicCredential),
    X509(X509Credential),
}

impl Credential {
    pub fn basic(
        identity: Vec<u8>,
        signature_scheme: SignatureScheme,
        public_key: SignaturePublicKey,
    ) -> Self {
        Self::Basic(BasicCredential {
            identity,
            signature_scheme,
            public_key,
        })
    }

    pub fn identity(&self) -> Result<&[u8]> {
        match self {
            Self::Basic(basic) => Ok(&basic.identity),
            Self::X509(_) => Err(Error::NotImplemented("x509 credential identity")),
        }
    }

    pub fn signature_scheme(&self) -> Result<SignatureScheme> {
        match self {
            Self::Basic(basic) => Ok(basic.signature_scheme),
            Self::X509(_) => Err(Error::NotImplemented("x509 credential scheme")),
        }
    }

    pub fn public_key(&self) -> Result<&SignaturePublicKey> {
        match self {
            Self::Basic(basic) => Ok(&basic.public_key),
            Self::X509(_) => Err(Error::NotImplemented("x509 credential key")),
        }
    }

    /// Verify a signature by the holder of this credential.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let scheme = self.signature_scheme()?;
        self.public_key()?
            .verify(scheme, message, signature)
            .map_err(|err| Error::Crypto(err.into()))
    }
}

impl Size for Credential {
    fn tls_serialized_len(&self) -> usize {
        1 + match self {
            Self::Basic(basic) => {
                opaque16_len(&basic.identity)
                    + basic.signature_scheme.tls_serialized_len()
                    + basic.public_key.tls_serialized_len()
            }
            Self::X509(x509) => vector32_len(&x509.chain),
        }
    }
}

impl TlsSerialize for Credential {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        match self {
            Self::Basic(basic) => {
                let mut written = CREDENTIAL_BASIC.tls_serialize(writer)?;
                written += write_opaque16(writer, &basic.identity)?;
                written += basic.signature_scheme.tls_serialize(writer)?;
                written += basic.public_key.tls_serialize(writer)?;
                Ok(written)
            }
            Self::X509(x509) => {
                let mut written = CREDENTIAL_X509.tls_serialize(writer)?;
                written += write_vector32(writer, &x509.chain)?;
                Ok(written)
            }
        }
    }
}

impl TlsDeserialize for Credential {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        match u8::tls_deserialize(bytes)? {
            CREDENTIAL_BASIC => {
                let identity = read_opaque16(bytes)?;
                let signature_scheme = SignatureScheme::tls_deserialize(bytes)?;
                let public_key = SignaturePublicKey::tls_deserialize(bytes)?;
                Ok(Self::Basic(BasicCredential {
                    identity,
                    signature_scheme,
                    public_key,
                }))
            }
            CREDENTIAL_X509 => Ok(Self::X509(X509Credential {
                chain: read_vector32(bytes)?,
            })),
            other => Err(tls_codec::Error::DecodingError(format!(
                "unknown credential type {other}"
            ))),
        }
    }
}

impl Size for CertificateData {
    fn tls_serialized_len(&self) -> usize {
        opaque16_len(&self.0)
    }
}

impl TlsSerialize for CertificateData {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        write_opaque16(writer, &self.0)
    }
}

impl TlsDeserialize for CertificateData {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self(read_opaque16(bytes)?))
    }
}
