// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message framing: authenticated plaintext frames and the sealed frames
//! carrying them encrypted under per-sender ratchet keys.
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tls_codec::{Deserialize as TlsDeserialize, Serialize as TlsSerialize, Size};

use crate::codec::{
    opaque8_len, opaque32_len, optional_len, read_fixed, read_opaque8, read_opaque16,
    read_opaque32, read_optional, write_opaque8, write_opaque16, write_opaque32, write_optional,
};
use crate::crypto::aead::{aead_open, aead_seal};
use crate::crypto::rng::Rng;
use crate::crypto::signature::{Signature, SignaturePrivateKey};
use crate::error::{Error, Result};
use crate::key_schedule::KeyScheduleEpoch;
use crate::messages::{Commit, GroupContext, Proposal};
use crate::ratchet::{Generation, GroupKeySource, RatchetKind};
use crate::tree_math::LeafIndex;

const SENDER_MEMBER: u8 = 0x01;
const SENDER_PRECONFIGURED: u8 = 0x02;
const SENDER_NEW_MEMBER: u8 = 0x03;

const CONTENT_APPLICATION: u8 = 0x01;
const CONTENT_PROPOSAL: u8 = 0x02;
const CONTENT_COMMIT: u8 = 0x03;

const REUSE_GUARD_SIZE: usize = 4;

/// Who authored a frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    /// A group member, by leaf index.
    Member(LeafIndex),
    /// A pre-configured external sender, by key id.
    Preconfigured(#[serde(with = "serde_bytes")] Vec<u8>),
    /// A joiner committing itself into the group.
    NewMember,
}

impl Sender {
    pub fn member_leaf(&self) -> Option<LeafIndex> {
        match self {
            Sender::Member(leaf) => Some(*leaf),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ContentType {
    Application = CONTENT_APPLICATION,
    Proposal = CONTENT_PROPOSAL,
    Commit = CONTENT_COMMIT,
}

impl ContentType {
    fn try_from_u8(value: u8) -> std::result::Result<Self, tls_codec::Error> {
        match value {
            CONTENT_APPLICATION => Ok(Self::Application),
            CONTENT_PROPOSAL => Ok(Self::Proposal),
            CONTENT_COMMIT => Ok(Self::Commit),
            other => Err(tls_codec::Error::DecodingError(format!(
                "unknown content type {other}"
            ))),
        }
    }
}

/// Payload of a frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Content {
    Application(#[serde(with = "serde_bytes")] Vec<u8>),
    Proposal(Proposal),
    Commit(Commit),
}

impl Content {
    pub fn content_type(&self) -> ContentType {
        match self {
            Content::Application(_) => ContentType::Application,
            Content::Proposal(_) => ContentType::Proposal,
            Content::Commit(_) => ContentType::Commit,
        }
    }

    fn serialize_body<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        match self {
            Content::Application(data) => write_opaque32(writer, data),
            Content::Proposal(proposal) => proposal.tls_serialize(writer),
            Content::Commit(commit) => commit.tls_serialize(writer),
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Content::Application(data) => opaque32_len(data),
            Content::Proposal(proposal) => proposal.tls_serialized_len(),
            Content::Commit(commit) => commit.tls_serialized_len(),
        }
    }

    fn deserialize_body<R: Read>(
        content_type: ContentType,
        bytes: &mut R,
    ) -> std::result::Result<Self, tls_codec::Error> {
        match content_type {
            ContentType::Application => Ok(Content::Application(read_opaque32(bytes)?)),
            ContentType::Proposal => Ok(Content::Proposal(Proposal::tls_deserialize(bytes)?)),
            ContentType::Commit => Ok(Content::Commit(Commit::tls_deserialize(bytes)?)),
        }
    }
}

/// An authentication tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mac(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl Size for Mac {
    fn tls_serialized_len(&self) -> usize {
        opaque8_len(&self.0)
    }
}

impl TlsSerialize for Mac {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        write_opaque8(writer, &self.0)
    }
}

impl TlsDeserialize for Mac {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self(read_opaque8(bytes)?))
    }
}

/// An authenticated plaintext frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublicMessage {
    #[serde(with = "serde_bytes")]
    pub group_id: Vec<u8>,
    pub epoch: u64,
    pub sender: Sender,
    #[serde(with = "serde_bytes")]
    pub authenticated_data: Vec<u8>,
    pub content: Content,
    pub signature: Signature,
    /// Present on commits only.
    pub confirmation_tag: Option<Mac>,
    /// Present when the frame travels as plaintext among members.
    pub membership_tag: Option<Mac>,
}

impl PublicMessage {
    pub fn new(group_id: Vec<u8>, epoch: u64, sender: Sender, content: Content) -> Self {
        Self {
            group_id,
            epoch,
            sender,
            authenticated_data: Vec::new(),
            content,
            signature: Signature::from_bytes(Vec::new()),
            confirmation_tag: None,
            membership_tag: None,
        }
    }

    /// Serialized header and content, bound into the signature. Member
    /// frames additionally bind the group context.
    pub fn to_be_signed(&self, context: Option<&GroupContext>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_optional(&mut out, &context.cloned())
            .and_then(|_| write_opaque8(&mut out, &self.group_id))
            .and_then(|_| self.epoch.tls_serialize(&mut out))
            .and_then(|_| self.sender.tls_serialize(&mut out))
            .and_then(|_| write_opaque32(&mut out, &self.authenticated_data))
            .and_then(|_| (self.content.content_type() as u8).tls_serialize(&mut out))
            .and_then(|_| self.content.serialize_body(&mut out))
            .map_err(Error::Codec)?;
        Ok(out)
    }

    pub fn sign(
        &mut self,
        context: Option<&GroupContext>,
        signing_key: &SignaturePrivateKey,
    ) -> Result<()> {
        let tbs = self.to_be_signed(context)?;
        self.signature = signing_key
            .sign(&tbs)
            .map_err(|err| Error::Crypto(err.into()))?;
        Ok(())
    }

    pub fn verify_signature(
        &self,
        context: Option<&GroupContext>,
        credential: &crate::credential::Credential,
    ) -> Result<()> {
        let tbs = self.to_be_signed(context)?;
        credential
            .verify(&tbs, &self.signature)
            .map_err(|_| Error::Protocol("bad signature"))
    }

    /// The full frame minus the membership tag itself, MAC'd under the
    /// membership key.
    fn to_be_membership_tagged(&self, context: Option<&GroupContext>) -> Result<Vec<u8>> {
        let mut out = self.to_be_signed(context)?;
        self.signature
            .tls_serialize(&mut out)
            .and_then(|_| write_optional(&mut out, &self.confirmation_tag))
            .map_err(Error::Codec)?;
        Ok(out)
    }

    pub fn set_membership_tag(
        &mut self,
        key_schedule: &KeyScheduleEpoch,
        context: Option<&GroupContext>,
    ) -> Result<()> {
        let tbm = self.to_be_membership_tagged(context)?;
        self.membership_tag = Some(Mac(key_schedule.membership_tag(&tbm)));
        Ok(())
    }

    pub fn verify_membership_tag(
        &self,
        key_schedule: &KeyScheduleEpoch,
        context: Option<&GroupContext>,
    ) -> Result<()> {
        let tag = self
            .membership_tag
            .as_ref()
            .ok_or(Error::Protocol("missing membership tag"))?;
        let tbm = self.to_be_membership_tagged(context)?;
        if key_schedule.membership_tag(&tbm) != tag.0 {
            return Err(Error::Protocol("bad membership tag"));
        }
        Ok(())
    }

    /// Serialized frame without signature or tags; input to the confirmed
    /// transcript hash.
    pub fn commit_content(&self) -> Result<Vec<u8>> {
        self.to_be_signed(None)
    }

    /// Signature and confirmation tag; input to the interim transcript
    /// hash.
    pub fn commit_auth_data(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.signature
            .tls_serialize(&mut out)
            .and_then(|_| write_optional(&mut out, &self.confirmation_tag))
            .map_err(Error::Codec)?;
        Ok(out)
    }
}

/// Sender identification encrypted into a sealed frame's header.
#[derive(Clone, Debug, PartialEq, Eq)]
struct SenderData {
    sender: LeafIndex,
    generation: Generation,
    reuse_guard: [u8; REUSE_GUARD_SIZE],
}

/// An encrypted frame: sender identity and content are only readable by
/// members holding this epoch's keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedMessage {
    #[serde(with = "serde_bytes")]
    pub group_id: Vec<u8>,
    pub epoch: u64,
    pub content_type: ContentType,
    #[serde(with = "serde_bytes")]
    pub authenticated_data: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub encrypted_sender_data: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

fn content_aad(message: &SealedMessage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_opaque8(&mut out, &message.group_id)
        .and_then(|_| message.epoch.tls_serialize(&mut out))
        .and_then(|_| (message.content_type as u8).tls_serialize(&mut out))
        .and_then(|_| write_opaque32(&mut out, &message.authenticated_data))
        .map_err(Error::Codec)?;
    Ok(out)
}

fn sender_data_aad(message: &SealedMessage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_opaque8(&mut out, &message.group_id)
        .and_then(|_| message.epoch.tls_serialize(&mut out))
        .and_then(|_| (message.content_type as u8).tls_serialize(&mut out))
        .map_err(Error::Codec)?;
    Ok(out)
}

fn apply_reuse_guard(nonce: &[u8], reuse_guard: &[u8; REUSE_GUARD_SIZE]) -> Vec<u8> {
    let mut nonce = nonce.to_vec();
    for (byte, guard) in nonce.iter_mut().zip(reuse_guard.iter()) {
        *byte ^= guard;
    }
    nonce
}

fn ratchet_kind(content_type: ContentType) -> RatchetKind {
    match content_type {
        ContentType::Application => RatchetKind::Application,
        _ => RatchetKind::Handshake,
    }
}

/// Seal a signed frame under the sender's current ratchet key.
pub fn seal(
    plaintext: &PublicMessage,
    key_schedule: &KeyScheduleEpoch,
    keys: &mut GroupKeySource,
    rng: &Rng,
) -> Result<SealedMessage> {
    let suite = key_schedule.suite;
    let sender = plaintext
        .sender
        .member_leaf()
        .ok_or(Error::InvalidParameter("only members can seal frames"))?;
    let content_type = plaintext.content.content_type();

    let (generation, key_nonce) = keys.next(ratchet_kind(content_type), sender)?;
    let reuse_guard: [u8; REUSE_GUARD_SIZE] = rng.random_array()?;
    let nonce = apply_reuse_guard(key_nonce.nonce.as_bytes(), &reuse_guard);

    // Inner content: body, signature, confirmation tag, padding.
    let mut inner = Vec::new();
    plaintext
        .content
        .serialize_body(&mut inner)
        .and_then(|_| plaintext.signature.tls_serialize(&mut inner))
        .and_then(|_| write_optional(&mut inner, &plaintext.confirmation_tag))
        .and_then(|_| write_opaque16(&mut inner, &[]))
        .map_err(Error::Codec)?;

    let mut sealed = SealedMessage {
        group_id: plaintext.group_id.clone(),
        epoch: plaintext.epoch,
        content_type,
        authenticated_data: plaintext.authenticated_data.clone(),
        encrypted_sender_data: Vec::new(),
        ciphertext: Vec::new(),
    };

    sealed.ciphertext = aead_seal(
        suite,
        key_nonce.key.as_bytes(),
        &inner,
        &nonce,
        &content_aad(&sealed)?,
    )?;

    // Sender data sealed under a key sampled from the content ciphertext.
    let sender_data = SenderData {
        sender,
        generation,
        reuse_guard,
    };
    let mut sender_data_bytes = Vec::new();
    sender_data
        .sender
        .tls_serialize(&mut sender_data_bytes)
        .and_then(|_| sender_data.generation.tls_serialize(&mut sender_data_bytes))
        .map_err(Error::Codec)?;
    sender_data_bytes.extend_from_slice(&sender_data.reuse_guard);

    let sd_key_nonce = key_schedule.sender_data_key_nonce(&sealed.ciphertext)?;
    sealed.encrypted_sender_data = aead_seal(
        suite,
        sd_key_nonce.key.as_bytes(),
        &sender_data_bytes,
        sd_key_nonce.nonce.as_bytes(),
        &sender_data_aad(&sealed)?,
    )?;

    Ok(sealed)
}

/// Open a sealed frame, erasing its generation key on success.
pub fn open(
    sealed: &SealedMessage,
    key_schedule: &KeyScheduleEpoch,
    keys: &mut GroupKeySource,
) -> Result<PublicMessage> {
    let suite = key_schedule.suite;

    let sd_key_nonce = key_schedule.sender_data_key_nonce(&sealed.ciphertext)?;
    let sender_data_bytes = aead_open(
        suite,
        sd_key_nonce.key.as_bytes(),
        &sealed.encrypted_sender_data,
        sd_key_nonce.nonce.as_bytes(),
        &sender_data_aad(sealed)?,
    )?;

    let mut slice = sender_data_bytes.as_slice();
    let sender = LeafIndex::tls_deserialize(&mut slice)?;
    let generation = Generation::tls_deserialize(&mut slice)?;
    let reuse_guard: [u8; REUSE_GUARD_SIZE] = read_fixed(&mut slice, REUSE_GUARD_SIZE)?
        .try_into()
        .expect("fixed-size read");
    if !slice.is_empty() {
        return Err(Error::Protocol("trailing bytes after message"));
    }

    let kind = ratchet_kind(sealed.content_type);
    let key_nonce = keys.get(kind, sender, generation)?;
    let nonce = apply_reuse_guard(key_nonce.nonce.as_bytes(), &reuse_guard);

    let inner = aead_open(
        suite,
        key_nonce.key.as_bytes(),
        &sealed.ciphertext,
        &nonce,
        &content_aad(sealed)?,
    )?;

    let mut slice = inner.as_slice();
    let content = Content::deserialize_body(sealed.content_type, &mut slice)?;
    let signature = Signature::tls_deserialize(&mut slice)?;
    let confirmation_tag: Option<Mac> = read_optional(&mut slice)?;
    let _padding = read_opaque16(&mut slice)?;
    if !slice.is_empty() {
        return Err(Error::Protocol("trailing bytes after message"));
    }

    keys.erase(kind, sender, generation)?;

    Ok(PublicMessage {
        group_id: sealed.group_id.clone(),
        epoch: sealed.epoch,
        sender: Sender::Member(sender),
        authenticated_data: sealed.authenticated_data.clone(),
        content,
        signature,
        confirmation_tag,
        membership_tag: None,
    })
}

impl Size for Sender {
    fn tls_serialized_len(&self) -> usize {
        1 + match self {
            Sender::Member(_) => 4,
            Sender::Preconfigured(id) => opaque8_len(id),
            Sender::NewMember => 0,
        }
    }
}

impl TlsSerialize for Sender {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        match self {
            Sender::Member(leaf) => {
                let mut written = SENDER_MEMBER.tls_serialize(writer)?;
                written += leaf.tls_serialize(writer)?;
                Ok(written)
            }
            Sender::Preconfigured(id) => {
                let mut written = SENDER_PRECONFIGURED.tls_serialize(writer)?;
                written += write_opaque8(writer, id)?;
                Ok(written)
            }
            Sender::NewMember => SENDER_NEW_MEMBER.tls_serialize(writer),
        }
    }
}

impl TlsDeserialize for Sender {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        match u8::tls_deserialize(bytes)? {
            SENDER_MEMBER => Ok(Sender::Member(LeafIndex::tls_deserialize(bytes)?)),
            SENDER_PRECONFIGURED => Ok(Sender::Preconfigured(read_opaque8(bytes)?)),
            SENDER_NEW_MEMBER => Ok(Sender::NewMember),
            other => Err(tls_codec::Error::DecodingError(format!(
                "unknown sender type {other}"
            ))),
        }
    }
}

impl Size for PublicMessage {
    fn tls_serialized_len(&self) -> usize {
        opaque8_len(&self.group_id)
            + 8
            + self.sender.tls_serialized_len()
            + opaque32_len(&self.authenticated_data)
            + 1
            + self.content.body_len()
            + self.signature.tls_serialized_len()
            + optional_len(&self.confirmation_tag)
            + optional_len(&self.membership_tag)
    }
}

impl TlsSerialize for PublicMessage {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = write_opaque8(writer, &self.group_id)?;
        written += self.epoch.tls_serialize(writer)?;
        written += self.sender.tls_serialize(writer)?;
        written += write_opaque32(writer, &self.authenticated_data)?;
        written += (self.content.content_type() as u8).tls_serialize(writer)?;
        written += self.content.serialize_body(writer)?;
        written += self.signature.tls_serialize(writer)?;
        written += write_optional(writer, &self.confirmation_tag)?;
        written += write_optional(writer, &self.membership_tag)?;
        Ok(written)
    }
}

impl TlsDeserialize for PublicMessage {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        let group_id = read_opaque8(bytes)?;
        let epoch = u64::tls_deserialize(bytes)?;
        let sender = Sender::tls_deserialize(bytes)?;
        let authenticated_data = read_opaque32(bytes)?;
        let content_type = ContentType::try_from_u8(u8::tls_deserialize(bytes)?)?;
        let content = Content::deserialize_body(content_type, bytes)?;
        let signature = Signature::tls_deserialize(bytes)?;
        let confirmation_tag = read_optional(bytes)?;
        let membership_tag = read_optional(bytes)?;
        Ok(Self {
            group_id,
            epoch,
            sender,
            authenticated_data,
            content,
            signature,
            confirmation_tag,
            membership_tag,
        })
    }
}

impl Size for SealedMessage {
    fn tls_serialized_len(&self) -> usize {
        opaque8_len(&self.group_id)
            + 8
            + 1
            + opaque32_len(&self.authenticated_data)
            + opaque8_len(&self.encrypted_sender_data)
            + opaque32_len(&self.ciphertext)
    }
}

impl TlsSerialize for SealedMessage {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = write_opaque8(writer, &self.group_id)?;
        written += self.epoch.tls_serialize(writer)?;
        written += (self.content_type as u8).tls_serialize(writer)?;
        written += write_opaque32(writer, &self.authenticated_data)?;
        written += write_opaque8(writer, &self.encrypted_sender_data)?;
        written += write_opaque32(writer, &self.ciphertext)?;
        Ok(written)
    }
}

impl TlsDeserialize for SealedMessage {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self {
            group_id: read_opaque8(bytes)?,
            epoch: u64::tls_deserialize(bytes)?,
            content_type: ContentType::try_from_u8(u8::tls_deserialize(bytes)?)?,
            authenticated_data: read_opaque32(bytes)?,
            encrypted_sender_data: read_opaque8(bytes)?,
            ciphertext: read_opaque32(bytes)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{decode, encode};
    use crate::config::GroupConfig;
    use crate::crypto::rng::Rng;
    use crate::crypto::secret::Secret;
    use crate::crypto::signature::{SignaturePrivateKey, SignatureScheme};
    use crate::crypto::suite::CipherSuite;
    use crate::error::Error;
    use crate::key_schedule::KeyScheduleEpoch;
    use crate::ratchet::GroupKeySource;
    use crate::tree_math::{LeafCount, LeafIndex};

    use super::{Content, PublicMessage, Sender, open, seal};

    const SUITE: CipherSuite = CipherSuite::X25519Aes128GcmSha256Ed25519;

    fn fixtures() -> (KeyScheduleEpoch, GroupKeySource, SignaturePrivateKey, Rng) {
        let rng = Rng::from_seed([1; 32]);
        let key_schedule = KeyScheduleEpoch::first(SUITE, b"ctx", &rng).unwrap();
        let keys = GroupKeySource::new(
            SUITE,
            LeafCount(4),
            key_schedule.encryption_secret.clone(),
            GroupConfig::default(),
        )
        .unwrap();
        let signing_key = SignaturePrivateKey::generate(SignatureScheme::Ed25519, &rng).unwrap();
        (key_schedule, keys, signing_key, rng)
    }

    fn application_frame(signing_key: &SignaturePrivateKey) -> PublicMessage {
        let mut message = PublicMessage::new(
            vec![0xde, 0xad],
            0,
            Sender::Member(LeafIndex(1)),
            Content::Application(b"hello".to_vec()),
        );
        message.sign(None, signing_key).unwrap();
        message
    }

    #[test]
    fn seal_and_open_round_trip() {
        let (key_schedule, mut sender_keys, signing_key, rng) = fixtures();
        let mut receiver_keys = sender_keys.clone();

        let message = application_frame(&signing_key);
        let sealed = seal(&message, &key_schedule, &mut sender_keys, &rng).unwrap();

        let opened = open(&sealed, &key_schedule, &mut receiver_keys).unwrap();
        assert_eq!(opened.content, message.content);
        assert_eq!(opened.sender, message.sender);
        assert_eq!(opened.signature, message.signature);
    }

    #[test]
    fn generation_key_is_erased_after_open() {
        let (key_schedule, mut sender_keys, signing_key, rng) = fixtures();
        let mut receiver_keys = sender_keys.clone();

        let message = application_frame(&signing_key);
        let sealed = seal(&message, &key_schedule, &mut sender_keys, &rng).unwrap();

        open(&sealed, &key_schedule, &mut receiver_keys).unwrap();
        let result = open(&sealed, &key_schedule, &mut receiver_keys);
        assert!(matches!(result, Err(Error::Protocol("expired generation"))));
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let (key_schedule, mut sender_keys, signing_key, rng) = fixtures();
        let mut receiver_keys = sender_keys.clone();

        let message = application_frame(&signing_key);
        let mut sealed = seal(&message, &key_schedule, &mut sender_keys, &rng).unwrap();
        let last = sealed.ciphertext.len() - 1;
        sealed.ciphertext[last] ^= 0x01;

        // Flipping content bytes also changes the sender-data key sample.
        let result = open(&sealed, &key_schedule, &mut receiver_keys);
        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[test]
    fn membership_tag_round_trip() {
        let (key_schedule, _, signing_key, _) = fixtures();
        let mut message = application_frame(&signing_key);

        message.set_membership_tag(&key_schedule, None).unwrap();
        assert!(message.verify_membership_tag(&key_schedule, None).is_ok());

        message.authenticated_data = b"tampered".to_vec();
        assert!(matches!(
            message.verify_membership_tag(&key_schedule, None),
            Err(Error::Protocol("bad membership tag"))
        ));
    }

    #[test]
    fn wire_round_trip() {
        let (key_schedule, mut sender_keys, signing_key, rng) = fixtures();

        let message = application_frame(&signing_key);
        let bytes = encode(&message).unwrap();
        assert_eq!(decode::<PublicMessage>(&bytes).unwrap(), message);

        let sealed = seal(&message, &key_schedule, &mut sender_keys, &rng).unwrap();
        let bytes = encode(&sealed).unwrap();
        assert_eq!(
            decode::<crate::framing::SealedMessage>(&bytes).unwrap(),
            sealed
        );
    }
}
