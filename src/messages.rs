// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handshake message bodies: proposals, commits, welcome packages and the
//! public group state used for external joins.
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tls_codec::{Deserialize as TlsDeserialize, Serialize as TlsSerialize, Size};

use crate::codec::{
    opaque8_len, opaque16_len, opaque32_len, optional_len, read_opaque8, read_opaque16,
    read_opaque32, read_optional, read_vector16, read_vector32, vector16_len, vector32_len,
    write_opaque8, write_opaque16, write_opaque32, write_optional, write_vector16, write_vector32,
};
use crate::crypto::hpke::{HpkeCiphertext, HpkePublicKey};
use crate::crypto::sha2::hash;
use crate::crypto::signature::{Signature, SignaturePrivateKey};
use crate::crypto::suite::CipherSuite;
use crate::error::{Error, Result};
use crate::framing::Mac;
use crate::key_package::{Extension, KeyPackage, ProtocolVersion};
use crate::tree::TreeNodes;
use crate::tree_math::LeafIndex;

const PROPOSAL_ADD: u8 = 0x01;
const PROPOSAL_UPDATE: u8 = 0x02;
const PROPOSAL_REMOVE: u8 = 0x03;
const PROPOSAL_PSK: u8 = 0x04;
const PROPOSAL_REINIT: u8 = 0x05;
const PROPOSAL_EXTERNAL_INIT: u8 = 0x06;
const PROPOSAL_APP_ACK: u8 = 0x07;

const PROPOSAL_OR_REF_PROPOSAL: u8 = 0x01;
const PROPOSAL_OR_REF_REFERENCE: u8 = 0x02;

/// The group context bound into signatures and the key schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupContext {
    #[serde(with = "serde_bytes")]
    pub group_id: Vec<u8>,
    pub epoch: u64,
    #[serde(with = "serde_bytes")]
    pub tree_hash: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub confirmed_transcript_hash: Vec<u8>,
    pub extensions: Vec<Extension>,
}

impl Size for GroupContext {
    fn tls_serialized_len(&self) -> usize {
        opaque8_len(&self.group_id)
            + 8
            + opaque8_len(&self.tree_hash)
            + opaque8_len(&self.confirmed_transcript_hash)
            + vector32_len(&self.extensions)
    }
}

impl TlsSerialize for GroupContext {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = write_opaque8(writer, &self.group_id)?;
        written += self.epoch.tls_serialize(writer)?;
        written += write_opaque8(writer, &self.tree_hash)?;
        written += write_opaque8(writer, &self.confirmed_transcript_hash)?;
        written += write_vector32(writer, &self.extensions)?;
        Ok(written)
    }
}

impl TlsDeserialize for GroupContext {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self {
            group_id: read_opaque8(bytes)?,
            epoch: u64::tls_deserialize(bytes)?,
            tree_hash: read_opaque8(bytes)?,
            confirmed_transcript_hash: read_opaque8(bytes)?,
            extensions: read_vector32(bytes)?,
        })
    }
}

/// Queued intents, applied only when a commit references them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Proposal {
    Add(AddProposal),
    Update(UpdateProposal),
    Remove(RemoveProposal),
    PreSharedKey(PreSharedKeyProposal),
    ReInit(ReInitProposal),
    ExternalInit(ExternalInitProposal),
    AppAck(AppAckProposal),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddProposal {
    pub key_package: KeyPackage,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateProposal {
    pub key_package: KeyPackage,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveProposal {
    pub removed: LeafIndex,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreSharedKeyProposal {
    #[serde(with = "serde_bytes")]
    pub psk_id: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReInitProposal {
    #[serde(with = "serde_bytes")]
    pub group_id: Vec<u8>,
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub extensions: Vec<Extension>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalInitProposal {
    #[serde(with = "serde_bytes")]
    pub kem_output: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRange {
    pub sender: LeafIndex,
    pub first_generation: u32,
    pub last_generation: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppAckProposal {
    pub received_ranges: Vec<MessageRange>,
}

/// Reference to a cached proposal: the suite digest of the framed proposal
/// message.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalRef(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl ProposalRef {
    /// `ref = H(marshal(plaintext))` over the framed proposal.
    pub fn from_plaintext_bytes(suite: CipherSuite, bytes: &[u8]) -> Self {
        Self(hash(suite, &[bytes]))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ProposalOrRef {
    Proposal(Proposal),
    Reference(ProposalRef),
}

/// A batch of proposals plus the fresh update path rekeying the committer's
/// direct path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub proposals: Vec<ProposalOrRef>,
    pub path: Option<UpdatePath>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdatePathNode {
    pub public_key: HpkePublicKey,
    pub encrypted_path_secrets: Vec<HpkeCiphertext>,
}

/// Per-level new public keys plus HPKE-encrypted path secrets produced by
/// `encap`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdatePath {
    pub leaf_key_package: KeyPackage,
    pub nodes: Vec<UpdatePathNode>,
}

/// Secrets a joiner needs to enter the group at the welcome epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupSecrets {
    #[serde(with = "serde_bytes")]
    pub joiner_secret: Vec<u8>,
    pub path_secret: Option<PathSecret>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSecret(#[serde(with = "serde_bytes")] pub Vec<u8>);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptedGroupSecrets {
    #[serde(with = "serde_bytes")]
    pub key_package_hash: Vec<u8>,
    pub encrypted_group_secrets: HpkeCiphertext,
}

/// Out-of-band message letting new members reconstruct the group state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub secrets: Vec<EncryptedGroupSecrets>,
    #[serde(with = "serde_bytes")]
    pub encrypted_group_info: Vec<u8>,
}

/// The group's public state at one epoch, AEAD-protected inside a welcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    #[serde(with = "serde_bytes")]
    pub group_id: Vec<u8>,
    pub epoch: u64,
    pub tree: TreeNodes,
    #[serde(with = "serde_bytes")]
    pub confirmed_transcript_hash: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub interim_transcript_hash: Vec<u8>,
    pub extensions: Vec<Extension>,
    pub confirmation_tag: Mac,
    pub signer_index: LeafIndex,
    pub signature: Signature,
}

impl GroupInfo {
    pub(crate) fn to_be_signed(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_opaque8(&mut out, &self.group_id)
            .and_then(|_| self.epoch.tls_serialize(&mut out))
            .and_then(|_| self.tree.tls_serialize(&mut out))
            .and_then(|_| write_opaque8(&mut out, &self.confirmed_transcript_hash))
            .and_then(|_| write_opaque8(&mut out, &self.interim_transcript_hash))
            .and_then(|_| write_vector32(&mut out, &self.extensions))
            .and_then(|_| self.confirmation_tag.tls_serialize(&mut out))
            .and_then(|_| self.signer_index.tls_serialize(&mut out))
            .map_err(Error::Codec)?;
        Ok(out)
    }

    pub(crate) fn sign(&mut self, signing_key: &SignaturePrivateKey) -> Result<()> {
        let tbs = self.to_be_signed()?;
        self.signature = signing_key
            .sign(&tbs)
            .map_err(|err| Error::Crypto(err.into()))?;
        Ok(())
    }
}

/// Signed epoch summary allowing non-members to commit into the group from
/// the outside.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublicGroupState {
    pub cipher_suite: CipherSuite,
    #[serde(with = "serde_bytes")]
    pub group_id: Vec<u8>,
    pub epoch: u64,
    #[serde(with = "serde_bytes")]
    pub tree_hash: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub confirmed_transcript_hash: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub interim_transcript_hash: Vec<u8>,
    pub extensions: Vec<Extension>,
    pub external_pub: HpkePublicKey,
    pub tree: TreeNodes,
    pub signer_index: LeafIndex,
    pub signature: Signature,
}

impl PublicGroupState {
    pub(crate) fn to_be_signed(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.cipher_suite
            .tls_serialize(&mut out)
            .and_then(|_| write_opaque8(&mut out, &self.group_id))
            .and_then(|_| self.epoch.tls_serialize(&mut out))
            .and_then(|_| write_opaque8(&mut out, &self.tree_hash))
            .and_then(|_| write_opaque8(&mut out, &self.confirmed_transcript_hash))
            .and_then(|_| write_opaque8(&mut out, &self.interim_transcript_hash))
            .and_then(|_| write_vector32(&mut out, &self.extensions))
            .and_then(|_| self.external_pub.tls_serialize(&mut out))
            .and_then(|_| self.tree.tls_serialize(&mut out))
            .and_then(|_| self.signer_index.tls_serialize(&mut out))
            .map_err(Error::Codec)?;
        Ok(out)
    }

    pub(crate) fn sign(&mut self, signing_key: &SignaturePrivateKey) -> Result<()> {
        let tbs = self.to_be_signed()?;
        self.signature = signing_key
            .sign(&tbs)
            .map_err(|err| Error::Crypto(err.into()))?;
        Ok(())
    }
}

impl Size for Proposal {
    fn tls_serialized_len(&self) -> usize {
        1 + match self {
            Proposal::Add(add) => add.key_package.tls_serialized_len(),
            Proposal::Update(update) => update.key_package.tls_serialized_len(),
            Proposal::Remove(_) => 4,
            Proposal::PreSharedKey(psk) => opaque8_len(&psk.psk_id),
            Proposal::ReInit(reinit) => {
                opaque8_len(&reinit.group_id)
                    + 1
                    + reinit.cipher_suite.tls_serialized_len()
                    + vector32_len(&reinit.extensions)
            }
            Proposal::ExternalInit(external) => opaque16_len(&external.kem_output),
            Proposal::AppAck(ack) => vector32_len(&ack.received_ranges),
        }
    }
}

impl TlsSerialize for Proposal {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        match self {
            Proposal::Add(add) => {
                let mut written = PROPOSAL_ADD.tls_serialize(writer)?;
                written += add.key_package.tls_serialize(writer)?;
                Ok(written)
            }
            Proposal::Update(update) => {
                let mut written = PROPOSAL_UPDATE.tls_serialize(writer)?;
                written += update.key_package.tls_serialize(writer)?;
                Ok(written)
            }
            Proposal::Remove(remove) => {
                let mut written = PROPOSAL_REMOVE.tls_serialize(writer)?;
                written += remove.removed.tls_serialize(writer)?;
                Ok(written)
            }
            Proposal::PreSharedKey(psk) => {
                let mut written = PROPOSAL_PSK.tls_serialize(writer)?;
                written += write_opaque8(writer, &psk.psk_id)?;
                Ok(written)
            }
            Proposal::ReInit(reinit) => {
                let mut written = PROPOSAL_REINIT.tls_serialize(writer)?;
                written += write_opaque8(writer, &reinit.group_id)?;
                written += (reinit.version as u8).tls_serialize(writer)?;
                written += reinit.cipher_suite.tls_serialize(writer)?;
                written += write_vector32(writer, &reinit.extensions)?;
                Ok(written)
            }
            Proposal::ExternalInit(external) => {
                let mut written = PROPOSAL_EXTERNAL_INIT.tls_serialize(writer)?;
                written += write_opaque16(writer, &external.kem_output)?;
                Ok(written)
            }
            Proposal::AppAck(ack) => {
                let mut written = PROPOSAL_APP_ACK.tls_serialize(writer)?;
                written += write_vector32(writer, &ack.received_ranges)?;
                Ok(written)
            }
        }
    }
}

impl TlsDeserialize for Proposal {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        match u8::tls_deserialize(bytes)? {
            PROPOSAL_ADD => Ok(Proposal::Add(AddProposal {
                key_package: KeyPackage::tls_deserialize(bytes)?,
            })),
            PROPOSAL_UPDATE => Ok(Proposal::Update(UpdateProposal {
                key_package: KeyPackage::tls_deserialize(bytes)?,
            })),
            PROPOSAL_REMOVE => Ok(Proposal::Remove(RemoveProposal {
                removed: LeafIndex::tls_deserialize(bytes)?,
            })),
            PROPOSAL_PSK => Ok(Proposal::PreSharedKey(PreSharedKeyProposal {
                psk_id: read_opaque8(bytes)?,
            })),
            PROPOSAL_REINIT => {
                let group_id = read_opaque8(bytes)?;
                let version = match u8::tls_deserialize(bytes)? {
                    0x01 => ProtocolVersion::Mls10,
                    other => {
                        return Err(tls_codec::Error::DecodingError(format!(
                            "unknown protocol version {other}"
                        )));
                    }
                };
                let cipher_suite = CipherSuite::tls_deserialize(bytes)?;
                let extensions = read_vector32(bytes)?;
                Ok(Proposal::ReInit(ReInitProposal {
                    group_id,
                    version,
                    cipher_suite,
                    extensions,
                }))
            }
            PROPOSAL_EXTERNAL_INIT => Ok(Proposal::ExternalInit(ExternalInitProposal {
                kem_output: read_opaque16(bytes)?,
            })),
            PROPOSAL_APP_ACK => Ok(Proposal::AppAck(AppAckProposal {
                received_ranges: read_vector32(bytes)?,
            })),
            other => Err(tls_codec::Error::DecodingError(format!(
                "unknown proposal type {other}"
            ))),
        }
    }
}

impl Size for MessageRange {
    fn tls_serialized_len(&self) -> usize {
        12
    }
}

impl TlsSerialize for MessageRange {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = self.sender.tls_serialize(writer)?;
        written += self.first_generation.tls_serialize(writer)?;
        written += self.last_generation.tls_serialize(writer)?;
        Ok(written)
    }
}

impl TlsDeserialize for MessageRange {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self {
            sender: LeafIndex::tls_deserialize(bytes)?,
            first_generation: u32::tls_deserialize(bytes)?,
            last_generation: u32::tls_deserialize(bytes)?,
        })
    }
}

impl Size for ProposalRef {
    fn tls_serialized_len(&self) -> usize {
        opaque8_len(&self.0)
    }
}

impl TlsSerialize for ProposalRef {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        write_opaque8(writer, &self.0)
    }
}

impl TlsDeserialize for ProposalRef {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self(read_opaque8(bytes)?))
    }
}

impl Size for ProposalOrRef {
    fn tls_serialized_len(&self) -> usize {
        1 + match self {
            ProposalOrRef::Proposal(proposal) => proposal.tls_serialized_len(),
            ProposalOrRef::Reference(reference) => reference.tls_serialized_len(),
        }
    }
}

impl TlsSerialize for ProposalOrRef {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        match self {
            ProposalOrRef::Proposal(proposal) => {
                let mut written = PROPOSAL_OR_REF_PROPOSAL.tls_serialize(writer)?;
                written += proposal.tls_serialize(writer)?;
                Ok(written)
            }
            ProposalOrRef::Reference(reference) => {
                let mut written = PROPOSAL_OR_REF_REFERENCE.tls_serialize(writer)?;
                written += reference.tls_serialize(writer)?;
                Ok(written)
            }
        }
    }
}

impl TlsDeserialize for ProposalOrRef {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        match u8::tls_deserialize(bytes)? {
            PROPOSAL_OR_REF_PROPOSAL => {
                Ok(ProposalOrRef::Proposal(Proposal::tls_deserialize(bytes)?))
            }
            PROPOSAL_OR_REF_REFERENCE => Ok(ProposalOrRef::Reference(ProposalRef::tls_deserialize(
                bytes,
            )?)),
            other => Err(tls_codec::Error::DecodingError(format!(
                "unknown proposal-or-ref type {other}"
            ))),
        }
    }
}

impl Size for Commit {
    fn tls_serialized_len(&self) -> usize {
        vector32_len(&self.proposals) + optional_len(&self.path)
    }
}

impl TlsSerialize for Commit {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = write_vector32(writer, &self.proposals)?;
        written += write_optional(writer, &self.path)?;
        Ok(written)
    }
}

impl TlsDeserialize for Commit {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self {
            proposals: read_vector32(bytes)?,
            path: read_optional(bytes)?,
        })
    }
}

impl Size for UpdatePathNode {
    fn tls_serialized_len(&self) -> usize {
        self.public_key.tls_serialized_len() + vector16_len(&self.encrypted_path_secrets)
    }
}

impl TlsSerialize for UpdatePathNode {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = self.public_key.tls_serialize(writer)?;
        written += write_vector16(writer, &self.encrypted_path_secrets)?;
        Ok(written)
    }
}

impl TlsDeserialize for UpdatePathNode {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self {
            public_key: HpkePublicKey::tls_deserialize(bytes)?,
            encrypted_path_secrets: read_vector16(bytes)?,
        })
    }
}

impl Size for UpdatePath {
    fn tls_serialized_len(&self) -> usize {
        self.leaf_key_package.tls_serialized_len() + vector16_len(&self.nodes)
    }
}

impl TlsSerialize for UpdatePath {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = self.leaf_key_package.tls_serialize(writer)?;
        written += write_vector16(writer, &self.nodes)?;
        Ok(written)
    }
}

impl TlsDeserialize for UpdatePath {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self {
            leaf_key_package: KeyPackage::tls_deserialize(bytes)?,
            nodes: read_vector16(bytes)?,
        })
    }
}

impl Size for PathSecret {
    fn tls_serialized_len(&self) -> usize {
        opaque8_len(&self.0)
    }
}

impl TlsSerialize for PathSecret {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        write_opaque8(writer, &self.0)
    }
}

impl TlsDeserialize for PathSecret {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self(read_opaque8(bytes)?))
    }
}

impl Size for GroupSecrets {
    fn tls_serialized_len(&self) -> usize {
        opaque8_len(&self.joiner_secret) + optional_len(&self.path_secret)
    }
}

impl TlsSerialize for GroupSecrets {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = write_opaque8(writer, &self.joiner_secret)?;
        written += write_optional(writer, &self.path_secret)?;
        Ok(written)
    }
}

impl TlsDeserialize for GroupSecrets {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self {
            joiner_secret: read_opaque8(bytes)?,
            path_secret: read_optional(bytes)?,
        })
    }
}

impl Size for EncryptedGroupSecrets {
    fn tls_serialized_len(&self) -> usize {
        opaque8_len(&self.key_package_hash) + self.encrypted_group_secrets.tls_serialized_len()
    }
}

impl TlsSerialize for EncryptedGroupSecrets {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = write_opaque8(writer, &self.key_package_hash)?;
        written += self.encrypted_group_secrets.tls_serialize(writer)?;
        Ok(written)
    }
}

impl TlsDeserialize for EncryptedGroupSecrets {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self {
            key_package_hash: read_opaque8(bytes)?,
            encrypted_group_secrets: HpkeCiphertext::tls_deserialize(bytes)?,
        })
    }
}

impl Size for Welcome {
    fn tls_serialized_len(&self) -> usize {
        1 + self.cipher_suite.tls_serialized_len()
            + vector32_len(&self.secrets)
            + opaque32_len(&self.encrypted_group_info)
    }
}

impl TlsSerialize for Welcome {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = (self.version as u8).tls_serialize(writer)?;
        written += self.cipher_suite.tls_serialize(writer)?;
        written += write_vector32(writer, &self.secrets)?;
        written += write_opaque32(writer, &self.encrypted_group_info)?;
        Ok(written)
    }
}

impl TlsDeserialize for Welcome {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        let version = match u8::tls_deserialize(bytes)? {
            0x01 => ProtocolVersion::Mls10,
            other => {
                return Err(tls_codec::Error::DecodingError(format!(
                    "unknown protocol version {other}"
                )));
            }
        };
        Ok(Self {
            version,
            cipher_suite: CipherSuite::tls_deserialize(bytes)?,
            secrets: read_vector32(bytes)?,
            encrypted_group_info: read_opaque32(bytes)?,
        })
    }
}

impl Size for GroupInfo {
    fn tls_serialized_len(&self) -> usize {
        opaque8_len(&self.group_id)
            + 8
            + self.tree.tls_serialized_len()
            + opaque8_len(&self.confirmed_transcript_hash)
            + opaque8_len(&self.interim_transcript_hash)
            + vector32_len(&self.extensions)
            + self.confirmation_tag.tls_serialized_len()
            + 4
            + self.signature.tls_serialized_len()
    }
}

impl TlsSerialize for GroupInfo {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = write_opaque8(writer, &self.group_id)?;
        written += self.epoch.tls_serialize(writer)?;
        written += self.tree.tls_serialize(writer)?;
        written += write_opaque8(writer, &self.confirmed_transcript_hash)?;
        written += write_opaque8(writer, &self.interim_transcript_hash)?;
        written += write_vector32(writer, &self.extensions)?;
        written += self.confirmation_tag.tls_serialize(writer)?;
        written += self.signer_index.tls_serialize(writer)?;
        written += self.signature.tls_serialize(writer)?;
        Ok(written)
    }
}

impl TlsDeserialize for GroupInfo {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self {
            group_id: read_opaque8(bytes)?,
            epoch: u64::tls_deserialize(bytes)?,
            tree: TreeNodes::tls_deserialize(bytes)?,
            confirmed_transcript_hash: read_opaque8(bytes)?,
            interim_transcript_hash: read_opaque8(bytes)?,
            extensions: read_vector32(bytes)?,
            confirmation_tag: Mac::tls_deserialize(bytes)?,
            signer_index: LeafIndex::tls_deserialize(bytes)?,
            signature: Signature::tls_deserialize(bytes)?,
        })
    }
}

impl Size for PublicGroupState {
    fn tls_serialized_len(&self) -> usize {
        self.cipher_suite.tls_serialized_len()
            + opaque8_len(&self.group_id)
            + 8
            + opaque8_len(&self.tree_hash)
            + opaque8_len(&self.confirmed_transcript_hash)
            + opaque8_len(&self.interim_transcript_hash)
            + vector32_len(&self.extensions)
            + self.external_pub.tls_serialized_len()
            + self.tree.tls_serialized_len()
            + 4
            + self.signature.tls_serialized_len()
    }
}

impl TlsSerialize for PublicGroupState {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = self.cipher_suite.tls_serialize(writer)?;
        written += write_opaque8(writer, &self.group_id)?;
        written += self.epoch.tls_serialize(writer)?;
        written += write_opaque8(writer, &self.tree_hash)?;
        written += write_opaque8(writer, &self.confirmed_transcript_hash)?;
        written += write_opaque8(writer, &self.interim_transcript_hash)?;
        written += write_vector32(writer, &self.extensions)?;
        written += self.external_pub.tls_serialize(writer)?;
        written += self.tree.tls_serialize(writer)?;
        written += self.signer_index.tls_serialize(writer)?;
        written += self.signature.tls_serialize(writer)?;
        Ok(written)
    }
}

impl TlsDeserialize for PublicGroupState {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self {
            cipher_suite: CipherSuite::tls_deserialize(bytes)?,
            group_id: read_opaque8(bytes)?,
            epoch: u64::tls_deserialize(bytes)?,
            tree_hash: read_opaque8(bytes)?,
            confirmed_transcript_hash: read_opaque8(bytes)?,
            interim_transcript_hash: read_opaque8(bytes)?,
            extensions: read_vector32(bytes)?,
            external_pub: HpkePublicKey::tls_deserialize(bytes)?,
            tree: TreeNodes::tls_deserialize(bytes)?,
            signer_index: LeafIndex::tls_deserialize(bytes)?,
            signature: Signature::tls_deserialize(bytes)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{decode, encode};
    use crate::crypto::suite::CipherSuite;
    use crate::key_package::Extension;
    use crate::tree_math::LeafIndex;

    use super::{
        Commit, GroupContext, Proposal, ProposalOrRef, ProposalRef, RemoveProposal, Welcome,
    };

    #[test]
    fn group_context_round_trip() {
        let context = GroupContext {
            group_id: vec![0xde, 0xad, 0xbe, 0xef],
            epoch: 42,
            tree_hash: vec![1; 32],
            confirmed_transcript_hash: vec![2; 32],
            extensions: vec![Extension {
                extension_type: 0x0001,
                data: vec![3, 4, 5],
            }],
        };
        let bytes = encode(&context).unwrap();
        assert_eq!(decode::<GroupContext>(&bytes).unwrap(), context);
    }

    #[test]
    fn commit_round_trip() {
        let commit = Commit {
            proposals: vec![
                ProposalOrRef::Proposal(Proposal::Remove(RemoveProposal {
                    removed: LeafIndex(2),
                })),
                ProposalOrRef::Reference(ProposalRef(vec![7; 32])),
            ],
            path: None,
        };
        let bytes = encode(&commit).unwrap();
        assert_eq!(decode::<Commit>(&bytes).unwrap(), commit);
    }

    #[test]
    fn welcome_round_trip() {
        let welcome = Welcome {
            version: crate::key_package::ProtocolVersion::Mls10,
            cipher_suite: CipherSuite::X25519Aes128GcmSha256Ed25519,
            secrets: Vec::new(),
            encrypted_group_info: vec![9; 64],
        };
        let bytes = encode(&welcome).unwrap();
        assert_eq!(decode::<Welcome>(&bytes).unwrap(), welcome);
    }

    #[test]
    fn unknown_proposal_type_is_rejected() {
        let bytes = vec![0x99, 0x00];
        assert!(decode::<Proposal>(&bytes).is_err());
    }

    #[test]
    fn update_path_and_group_info_round_trip() {
        use crate::crypto::hpke::{HpkeCiphertext, HpkePublicKey};
        use crate::crypto::rng::Rng;
        use crate::crypto::signature::Signature;
        use crate::framing::Mac;
        use crate::test_utils::test_member;
        use crate::tree::TreeNodes;

        use super::{GroupInfo, UpdatePath, UpdatePathNode};

        let rng = Rng::from_seed([11; 32]);
        let member =
            test_member(CipherSuite::X25519Aes128GcmSha256Ed25519, b"alice", &rng).unwrap();

        let path = UpdatePath {
            leaf_key_package: member.key_package.clone(),
            nodes: vec![UpdatePathNode {
                public_key: HpkePublicKey::from_bytes(vec![7; 32]),
                encrypted_path_secrets: vec![HpkeCiphertext {
                    kem_output: vec![1; 32],
                    ciphertext: vec![2; 48],
                }],
            }],
        };
        let bytes = encode(&path).unwrap();
        assert_eq!(decode::<UpdatePath>(&bytes).unwrap(), path);

        let group_info = GroupInfo {
            group_id: vec![0xde, 0xad],
            epoch: 3,
            tree: TreeNodes(vec![Some(crate::tree::Node::Leaf(
                member.key_package.clone(),
            ))]),
            confirmed_transcript_hash: vec![3; 32],
            interim_transcript_hash: vec![4; 32],
            extensions: Vec::new(),
            confirmation_tag: Mac(vec![5; 32]),
            signer_index: LeafIndex(0),
            signature: Signature::from_bytes(vec![6; 64]),
        };
        let bytes = encode(&group_info).unwrap();
        assert_eq!(decode::<GroupInfo>(&bytes).unwrap(), group_info);
    }
}
