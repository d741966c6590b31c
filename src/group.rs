// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-member group state machine.
//!
//! A `GroupState` is logically an immutable value: proposals mutate only the
//! pending cache, and commits build a successor state which the caller swaps
//! in. Any failure while handling a message leaves the current state
//! untouched.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::encode;
use crate::config::GroupConfig;
use crate::credential::Credential;
use crate::crypto::hkdf::expand_with_label;
use crate::crypto::hpke::{HpkePrivateKey, derive_key_pair, hpke_open, hpke_seal};
use crate::crypto::aead::{aead_open, aead_seal};
use crate::crypto::rng::Rng;
use crate::crypto::secret::Secret;
use crate::crypto::signature::SignaturePrivateKey;
use crate::crypto::suite::CipherSuite;
use crate::error::{Error, Result};
use crate::framing::{Content, Mac, PublicMessage, SealedMessage, Sender, open, seal};
use crate::key_package::{Extension, KeyPackage};
use crate::key_schedule::{KeyScheduleEpoch, TranscriptHash};
use crate::messages::{
    AddProposal, Commit, EncryptedGroupSecrets, ExternalInitProposal, GroupContext, GroupInfo,
    GroupSecrets, PathSecret, Proposal, ProposalOrRef, ProposalRef, PublicGroupState,
    RemoveProposal, UpdateProposal, Welcome,
};
use crate::ratchet::GroupKeySource;
use crate::tree::RatchetTree;
use crate::tree_math::{LeafIndex, ancestor};
use crate::treekem::PrivateTree;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CachedProposal {
    proposal: Proposal,
    sender: Sender,
}

/// One member's view of the group at one epoch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupState {
    suite: CipherSuite,
    #[serde(with = "serde_bytes")]
    group_id: Vec<u8>,
    epoch: u64,
    tree: RatchetTree,
    #[serde(with = "serde_bytes")]
    tree_hash: Vec<u8>,
    private_tree: PrivateTree,
    transcript: TranscriptHash,
    extensions: Vec<Extension>,
    key_schedule: KeyScheduleEpoch,
    keys: GroupKeySource,
    index: LeafIndex,
    pending_proposals: BTreeMap<ProposalRef, CachedProposal>,
    update_secrets: BTreeMap<Vec<u8>, Secret>,
    config: GroupConfig,
}

/// Convergence equality: two members are in the same epoch when suite,
/// group id, epoch, tree, transcripts and epoch secrets all agree.
impl PartialEq for GroupState {
    fn eq(&self, other: &Self) -> bool {
        self.suite == other.suite
            && self.group_id == other.group_id
            && self.epoch == other.epoch
            && self.tree == other.tree
            && self.tree_hash == other.tree_hash
            && self.transcript == other.transcript
            && self.key_schedule == other.key_schedule
    }
}

struct AppliedProposals {
    tree: RatchetTree,
    private_tree: PrivateTree,
    joiners: Vec<(LeafIndex, KeyPackage)>,
    external_kem_output: Option<Vec<u8>>,
    path_required: bool,
}

impl GroupState {
    /// Found a new group with this member as its only leaf.
    pub fn new(
        group_id: Vec<u8>,
        key_package: KeyPackage,
        init_key: HpkePrivateKey,
        config: GroupConfig,
        rng: &Rng,
    ) -> Result<Self> {
        let suite = key_package.cipher_suite;
        key_package.verify()?;
        if key_package.init_key != *init_key.public_key() {
            return Err(Error::InvalidParameter("init key mismatch"));
        }

        let mut tree = RatchetTree::new(suite);
        let index = tree.add_leaf(key_package)?;
        tree.set_hash_all()?;
        let tree_hash = tree.root_hash()?;

        let transcript = TranscriptHash::new(suite);
        let extensions = Vec::new();
        let context = GroupContext {
            group_id: group_id.clone(),
            epoch: 0,
            tree_hash: tree_hash.clone(),
            confirmed_transcript_hash: transcript.confirmed.clone(),
            extensions: extensions.clone(),
        };
        let key_schedule = KeyScheduleEpoch::first(suite, &encode(&context)?, rng)?;
        let keys = GroupKeySource::new(
            suite,
            tree.size(),
            key_schedule.encryption_secret.clone(),
            config,
        )?;

        debug!(group_id = ?hex_prefix(&group_id), "founded group");

        Ok(Self {
            suite,
            group_id,
            epoch: 0,
            tree,
            tree_hash,
            private_tree: PrivateTree::solo(suite, index, init_key),
            transcript,
            extensions,
            key_schedule,
            keys,
            index,
            pending_proposals: BTreeMap::new(),
            update_secrets: BTreeMap::new(),
            config,
        })
    }

    /// Join a group from a welcome message addressed to our key package.
    pub fn from_welcome(
        welcome: &Welcome,
        key_package: &KeyPackage,
        init_key: HpkePrivateKey,
        config: GroupConfig,
    ) -> Result<Self> {
        let suite = welcome.cipher_suite;
        if suite != key_package.cipher_suite {
            return Err(Error::InvalidParameter("cipher suite mismatch"));
        }

        // Locate our entry among the per-recipient secrets.
        let key_package_hash = key_package.hash()?;
        let encrypted_secrets = welcome
            .secrets
            .iter()
            .find(|secrets| secrets.key_package_hash == key_package_hash)
            .ok_or(Error::InvalidParameter("welcome does not address us"))?;

        let group_secrets: GroupSecrets = crate::codec::decode(&hpke_open(
            suite,
            &encrypted_secrets.encrypted_group_secrets,
            &init_key,
            &[],
            &[],
        )?)?;
        let joiner_secret = Secret::from_slice(&group_secrets.joiner_secret);

        // The group info is sealed under a key derived from the joiner
        // secret.
        let welcome_key_nonce = KeyScheduleEpoch::welcome_key_nonce_from_joiner(
            suite,
            &joiner_secret,
        )?;
        let group_info: GroupInfo = crate::codec::decode(&aead_open(
            suite,
            welcome_key_nonce.key.as_bytes(),
            &welcome.encrypted_group_info,
            welcome_key_nonce.nonce.as_bytes(),
            &[],
        )?)?;

        let mut tree = RatchetTree::from_nodes(suite, group_info.tree.clone())?;
        tree.set_hash_all()?;
        let tree_hash = tree.root_hash()?;
        if !tree.parent_hash_valid()? {
            return Err(Error::Protocol("parent hash mismatch"));
        }

        // The group info is signed by the member that issued the welcome.
        let signer = tree
            .key_package(group_info.signer_index)?
            .ok_or(Error::Protocol("blanked sender leaf"))?;
        signer
            .credential
            .verify(&group_info.to_be_signed()?, &group_info.signature)
            .map_err(|_| Error::Protocol("bad signature"))?;

        let index = tree
            .find(key_package)?
            .ok_or(Error::InvalidParameter("our key package is not in the tree"))?;

        let context = GroupContext {
            group_id: group_info.group_id.clone(),
            epoch: group_info.epoch,
            tree_hash: tree_hash.clone(),
            confirmed_transcript_hash: group_info.confirmed_transcript_hash.clone(),
            extensions: group_info.extensions.clone(),
        };
        let key_schedule =
            KeyScheduleEpoch::from_joiner_secret(suite, joiner_secret, None, &encode(&context)?)?;

        if key_schedule.confirmation_tag(&group_info.confirmed_transcript_hash)
            != group_info.confirmation_tag.0
        {
            return Err(Error::Protocol("confirmation mismatch"));
        }

        let private_tree = PrivateTree::joiner(
            suite,
            tree.size(),
            index,
            init_key,
            ancestor(index, group_info.signer_index),
            group_secrets
                .path_secret
                .as_ref()
                .map(|secret| Secret::from_slice(&secret.0)),
        )?;
        if !private_tree.consistent_with(&tree)? {
            return Err(Error::Protocol("welcome path secret mismatch"));
        }

        let keys = GroupKeySource::new(
            suite,
            tree.size(),
            key_schedule.encryption_secret.clone(),
            config,
        )?;

        let mut transcript = TranscriptHash::new(suite);
        transcript.confirmed = group_info.confirmed_transcript_hash.clone();
        transcript.interim = group_info.interim_transcript_hash.clone();

        debug!(
            group_id = ?hex_prefix(&group_info.group_id),
            epoch = group_info.epoch,
            "joined group from welcome"
        );

        Ok(Self {
            suite,
            group_id: group_info.group_id,
            epoch: group_info.epoch,
            tree,
            tree_hash,
            private_tree,
            transcript,
            extensions: group_info.extensions,
            key_schedule,
            keys,
            index,
            pending_proposals: BTreeMap::new(),
            update_secrets: BTreeMap::new(),
            config,
        })
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn group_id(&self) -> &[u8] {
        &self.group_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn index(&self) -> LeafIndex {
        self.index
    }

    pub fn roster(&self) -> Result<Vec<(LeafIndex, &Credential)>> {
        let mut roster = Vec::new();
        for position in 0..self.tree.size().0 {
            let index = LeafIndex(position);
            if let Some(key_package) = self.tree.key_package(index)? {
                roster.push((index, &key_package.credential));
            }
        }
        Ok(roster)
    }

    pub(crate) fn key_schedule(&self) -> &KeyScheduleEpoch {
        &self.key_schedule
    }

    pub(crate) fn tree(&self) -> &RatchetTree {
        &self.tree
    }

    /// A secret bound to this epoch for application use.
    pub fn export_secret(&self, label: &str, context: &[u8], length: usize) -> Result<Secret> {
        self.key_schedule.export_secret(label, context, length)
    }

    fn context(&self) -> GroupContext {
        GroupContext {
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            tree_hash: self.tree_hash.clone(),
            confirmed_transcript_hash: self.transcript.confirmed.clone(),
            extensions: self.extensions.clone(),
        }
    }

    fn frame(&self, content: Content, signing_key: &SignaturePrivateKey) -> Result<PublicMessage> {
        let mut message = PublicMessage::new(
            self.group_id.clone(),
            self.epoch,
            Sender::Member(self.index),
            content,
        );
        let context = self.context();
        message.sign(Some(&context), signing_key)?;
        message.set_membership_tag(&self.key_schedule, Some(&context))?;
        Ok(message)
    }

    /// Propose adding a new member.
    pub fn add_proposal(
        &self,
        key_package: KeyPackage,
        signing_key: &SignaturePrivateKey,
    ) -> Result<PublicMessage> {
        key_package.verify()?;
        if key_package.cipher_suite != self.suite {
            return Err(Error::InvalidParameter("cipher suite mismatch"));
        }
        self.frame(
            Content::Proposal(Proposal::Add(AddProposal { key_package })),
            signing_key,
        )
    }

    /// Propose refreshing our own leaf with a fresh leaf secret. The secret
    /// is cached under the new key package's hash until a commit picks the
    /// proposal up.
    pub fn update_proposal(
        &mut self,
        leaf_secret: Secret,
        signing_key: &SignaturePrivateKey,
    ) -> Result<PublicMessage> {
        let key_package = self.update_key_package(&leaf_secret, signing_key)?;
        self.update_secrets
            .insert(key_package.hash()?, leaf_secret);
        self.frame(
            Content::Proposal(Proposal::Update(UpdateProposal { key_package })),
            signing_key,
        )
    }

    fn update_key_package(
        &self,
        leaf_secret: &Secret,
        signing_key: &SignaturePrivateKey,
    ) -> Result<KeyPackage> {
        let mut key_package = self
            .tree
            .key_package(self.index)?
            .cloned()
            .ok_or(Error::Protocol("blanked sender leaf"))?;
        let node_secret =
            expand_with_label(self.suite, leaf_secret, "node", &[], self.suite.hash_size())?;
        key_package.init_key = derive_key_pair(self.suite, &node_secret)?
            .public_key()
            .clone();
        key_package
            .extensions
            .retain(|ext| ext.extension_type != crate::key_package::EXTENSION_PARENT_HASH);
        key_package.sign(signing_key)?;
        Ok(key_package)
    }

    /// Propose removing a member by leaf index.
    pub fn remove_proposal(
        &self,
        removed: LeafIndex,
        signing_key: &SignaturePrivateKey,
    ) -> Result<PublicMessage> {
        if self.tree.key_package(removed)?.is_none() {
            return Err(Error::InvalidParameter("no member at this leaf"));
        }
        self.frame(
            Content::Proposal(Proposal::Remove(RemoveProposal { removed })),
            signing_key,
        )
    }

    fn proposal_ref(&self, message: &PublicMessage) -> Result<ProposalRef> {
        // The reference is transport independent: sealed frames drop the
        // membership tag, so it is excluded from the hash.
        let mut message = message.clone();
        message.membership_tag = None;
        Ok(ProposalRef::from_plaintext_bytes(
            self.suite,
            &encode(&message)?,
        ))
    }

    fn sender_credential(&self, message: &PublicMessage) -> Result<Credential> {
        match &message.sender {
            Sender::Member(leaf) => Ok(self
                .tree
                .key_package(*leaf)?
                .ok_or(Error::Protocol("blanked sender leaf"))?
                .credential
                .clone()),
            Sender::NewMember => match &message.content {
                Content::Commit(commit) => {
                    let path = commit
                        .path
                        .as_ref()
                        .ok_or(Error::Protocol("missing update path"))?;
                    Ok(path.leaf_key_package.credential.clone())
                }
                _ => Err(Error::Protocol("new members may only send commits")),
            },
            Sender::Preconfigured(_) => Err(Error::NotImplemented("preconfigured senders")),
        }
    }

    /// Handle an incoming handshake frame. Proposals are cached and return
    /// `None`; a commit returns the successor state.
    pub fn handle(&mut self, message: &PublicMessage) -> Result<Option<GroupState>> {
        if message.group_id != self.group_id {
            return Err(Error::Protocol("group id mismatch"));
        }
        if message.epoch != self.epoch {
            return Err(Error::Protocol("epoch mismatch"));
        }

        let credential = self.sender_credential(message)?;
        let context = self.context();
        let signature_context = match &message.sender {
            Sender::Member(_) => Some(&context),
            _ => None,
        };
        message.verify_signature(signature_context, &credential)?;

        if message.membership_tag.is_some() {
            message.verify_membership_tag(&self.key_schedule, signature_context)?;
        }

        match &message.content {
            Content::Application(_) => {
                Err(Error::InvalidParameter("application data must be sealed"))
            }
            Content::Proposal(proposal) => {
                let reference = self.proposal_ref(message)?;
                debug!(epoch = self.epoch, "caching proposal");
                self.pending_proposals.insert(
                    reference,
                    CachedProposal {
                        proposal: proposal.clone(),
                        sender: message.sender.clone(),
                    },
                );
                Ok(None)
            }
            Content::Commit(commit) => {
                if message.sender == Sender::Member(self.index) {
                    return Err(Error::InvalidParameter(
                        "own commits yield their successor at creation",
                    ));
                }
                let next = self.apply_commit(message, commit)?;
                Ok(Some(next))
            }
        }
    }

    fn resolve_proposals(&self, commit: &Commit, sender: &Sender) -> Result<Vec<(Proposal, Sender)>> {
        let mut resolved = Vec::new();
        for proposal_or_ref in &commit.proposals {
            match proposal_or_ref {
                ProposalOrRef::Proposal(proposal) => {
                    resolved.push((proposal.clone(), sender.clone()));
                }
                ProposalOrRef::Reference(reference) => {
                    let cached = self
                        .pending_proposals
                        .get(reference)
                        .ok_or(Error::Protocol("unknown proposal ref"))?;
                    resolved.push((cached.proposal.clone(), cached.sender.clone()));
                }
            }
        }
        Ok(resolved)
    }

    /// Apply a resolved proposal list to copies of the tree state, in the
    /// deterministic order: updates, then removes, then adds.
    fn apply_proposals(&self, proposals: &[(Proposal, Sender)]) -> Result<AppliedProposals> {
        let mut tree = self.tree.clone();
        let mut private_tree = self.private_tree.clone();
        let mut external_kem_output = None;

        // Removes are collected first so updates on removed leaves drop.
        let mut removed = Vec::new();
        for (proposal, _) in proposals {
            match proposal {
                Proposal::Remove(RemoveProposal { removed: leaf }) => {
                    if !removed.contains(leaf) {
                        removed.push(*leaf);
                    }
                }
                Proposal::PreSharedKey(_) => {
                    return Err(Error::NotImplemented("pre-shared key proposals"));
                }
                Proposal::ReInit(_) => {
                    return Err(Error::NotImplemented("re-init proposals"));
                }
                Proposal::AppAck(_) => {
                    return Err(Error::NotImplemented("app-ack proposals"));
                }
                Proposal::ExternalInit(ExternalInitProposal { kem_output }) => {
                    if external_kem_output.is_some() {
                        return Err(Error::Protocol("multiple external init proposals"));
                    }
                    external_kem_output = Some(kem_output.clone());
                }
                _ => {}
            }
        }

        // Updates: the last one per leaf wins; self-updates recover the leaf
        // secret cached when the proposal was created.
        let mut updates: BTreeMap<u32, KeyPackage> = BTreeMap::new();
        let mut has_updates = false;
        for (proposal, proposal_sender) in proposals {
            if let Proposal::Update(UpdateProposal { key_package }) = proposal {
                has_updates = true;
                let leaf = proposal_sender
                    .member_leaf()
                    .ok_or(Error::Protocol("update from non-member"))?;
                if removed.contains(&leaf) {
                    continue;
                }
                key_package.verify()?;
                updates.insert(leaf.0, key_package.clone());
            }
        }
        for (leaf, key_package) in &updates {
            let leaf = LeafIndex(*leaf);
            if leaf == self.index {
                let leaf_secret = self
                    .update_secrets
                    .get(&key_package.hash()?)
                    .ok_or(Error::InvalidParameter("missing cached leaf secret"))?;
                let node_secret = expand_with_label(
                    self.suite,
                    leaf_secret,
                    "node",
                    &[],
                    self.suite.hash_size(),
                )?;
                let leaf_key = derive_key_pair(self.suite, &node_secret)?;
                private_tree = PrivateTree::solo(self.suite, self.index, leaf_key);
            }
            tree.update_leaf(leaf, key_package.clone())?;
        }

        for leaf in &removed {
            if *leaf == self.index {
                return Err(Error::Protocol("removed from group"));
            }
            if tree.key_package(*leaf)?.is_none() {
                return Err(Error::Protocol("remove of blank leaf"));
            }
            tree.blank_path(*leaf)?;
        }

        let mut joiners = Vec::new();
        for (proposal, _) in proposals {
            if let Proposal::Add(AddProposal { key_package }) = proposal {
                key_package.verify()?;
                if key_package.cipher_suite != self.suite {
                    return Err(Error::InvalidParameter("cipher suite mismatch"));
                }
                let leaf = tree.add_leaf(key_package.clone())?;
                joiners.push((leaf, key_package.clone()));
            }
        }

        let path_required = has_updates
            || !removed.is_empty()
            || proposals.is_empty()
            || external_kem_output.is_some();

        Ok(AppliedProposals {
            tree,
            private_tree,
            joiners,
            external_kem_output,
            path_required,
        })
    }

    fn provisional_context(
        &self,
        tree: &mut RatchetTree,
        new_epoch: u64,
    ) -> Result<GroupContext> {
        tree.set_hash_all()?;
        Ok(GroupContext {
            group_id: self.group_id.clone(),
            epoch: new_epoch,
            tree_hash: tree.root_hash()?,
            confirmed_transcript_hash: self.transcript.confirmed.clone(),
            extensions: self.extensions.clone(),
        })
    }

    /// Process a commit from another member (or an external joiner) and
    /// build the successor state.
    fn apply_commit(&self, message: &PublicMessage, commit: &Commit) -> Result<GroupState> {
        let resolved = self.resolve_proposals(commit, &message.sender)?;
        let applied = self.apply_proposals(&resolved)?;
        let mut tree = applied.tree;
        let mut private_tree = applied.private_tree;

        match (&commit.path, applied.path_required) {
            (None, true) => return Err(Error::Protocol("missing update path")),
            (Some(_), false) => return Err(Error::Protocol("unexpected update path")),
            _ => {}
        }

        // The encap context covers the post-proposal tree. For external
        // commits it is taken before the joiner's leaf lands, since the leaf
        // key package the committer started from never reaches the wire.
        let (committer, context_bytes) = match &message.sender {
            Sender::Member(leaf) => {
                let context = self.provisional_context(&mut tree, self.epoch + 1)?;
                (*leaf, encode(&context)?)
            }
            Sender::NewMember => {
                if applied.external_kem_output.is_none() {
                    return Err(Error::Protocol("external commit without external init"));
                }
                let path = commit
                    .path
                    .as_ref()
                    .ok_or(Error::Protocol("missing update path"))?;
                let context = self.provisional_context(&mut tree, self.epoch + 1)?;
                let leaf = tree.add_leaf(path.leaf_key_package.clone())?;
                (leaf, encode(&context)?)
            }
            Sender::Preconfigured(_) => {
                return Err(Error::NotImplemented("preconfigured senders"));
            }
        };

        let commit_secret = match &commit.path {
            Some(path) => {
                path.leaf_key_package.verify()?;
                if let Sender::Member(leaf) = &message.sender {
                    let previous = tree
                        .key_package(*leaf)?
                        .ok_or(Error::Protocol("blanked sender leaf"))?;
                    if previous.credential != path.leaf_key_package.credential {
                        return Err(Error::Protocol("update path credential mismatch"));
                    }
                }

                private_tree.decap(committer, &tree, &context_bytes, path)?;
                tree.merge(committer, path)?;
                private_tree.update_secret().clone()
            }
            None => Secret::zero(self.suite.hash_size()),
        };

        self.build_successor(
            message,
            tree,
            private_tree,
            commit_secret,
            applied.external_kem_output.as_deref(),
        )
    }

    /// Shared tail of commit processing: truncation, transcript and key
    /// schedule advance, confirmation check.
    fn build_successor(
        &self,
        message: &PublicMessage,
        mut tree: RatchetTree,
        mut private_tree: PrivateTree,
        commit_secret: Secret,
        external_kem_output: Option<&[u8]>,
    ) -> Result<GroupState> {
        tree.truncate()?;
        private_tree.truncate(tree.size());
        tree.set_hash_all()?;
        let tree_hash = tree.root_hash()?;

        let mut transcript = self.transcript.clone();
        transcript.update_confirmed(&message.commit_content()?);

        let new_epoch = self.epoch + 1;
        let context = GroupContext {
            group_id: self.group_id.clone(),
            epoch: new_epoch,
            tree_hash: tree_hash.clone(),
            confirmed_transcript_hash: transcript.confirmed.clone(),
            extensions: self.extensions.clone(),
        };

        let force_init_secret = external_kem_output
            .map(|kem_output| self.key_schedule.receive_external_init(kem_output))
            .transpose()?;
        let key_schedule = self.key_schedule.next(
            &commit_secret,
            force_init_secret.as_ref(),
            None,
            &encode(&context)?,
        )?;

        let confirmation_tag = message
            .confirmation_tag
            .as_ref()
            .ok_or(Error::Protocol("missing confirmation tag"))?;
        if key_schedule.confirmation_tag(&transcript.confirmed) != confirmation_tag.0 {
            warn!(epoch = new_epoch, "rejecting commit with bad confirmation tag");
            return Err(Error::Protocol("confirmation mismatch"));
        }
        transcript.update_interim(&message.commit_auth_data()?);

        let keys = GroupKeySource::new(
            self.suite,
            tree.size(),
            key_schedule.encryption_secret.clone(),
            self.config,
        )?;

        debug!(epoch = new_epoch, "advanced to next epoch");

        Ok(GroupState {
            suite: self.suite,
            group_id: self.group_id.clone(),
            epoch: new_epoch,
            tree,
            tree_hash,
            private_tree,
            transcript,
            extensions: self.extensions.clone(),
            key_schedule,
            keys,
            index: self.index,
            pending_proposals: BTreeMap::new(),
            update_secrets: BTreeMap::new(),
            config: self.config,
        })
    }

    /// Commit all cached proposals, returning the signed commit frame, a
    /// welcome for any added members and our successor state.
    pub fn commit(
        &self,
        leaf_secret: Secret,
        signing_key: &SignaturePrivateKey,
        rng: &Rng,
    ) -> Result<(PublicMessage, Option<Welcome>, GroupState)> {
        let mut references = Vec::new();
        let mut resolved = Vec::new();
        for (reference, cached) in &self.pending_proposals {
            references.push(ProposalOrRef::Reference(reference.clone()));
            resolved.push((cached.proposal.clone(), cached.sender.clone()));
        }

        let applied = self.apply_proposals(&resolved)?;
        let mut tree = applied.tree;
        let mut private_tree = applied.private_tree;

        let (path, commit_secret) = if applied.path_required {
            let context = self.provisional_context(&mut tree, self.epoch + 1)?;
            let context_bytes = encode(&context)?;
            let (new_private, path) =
                tree.encap(self.index, &context_bytes, &leaf_secret, signing_key, rng)?;
            let commit_secret = new_private.update_secret().clone();
            private_tree = new_private;
            (Some(path), commit_secret)
        } else {
            (None, Secret::zero(self.suite.hash_size()))
        };

        let mut message = PublicMessage::new(
            self.group_id.clone(),
            self.epoch,
            Sender::Member(self.index),
            Content::Commit(Commit {
                proposals: references,
                path,
            }),
        );
        let current_context = self.context();
        message.sign(Some(&current_context), signing_key)?;

        // Transcript and key schedule advance to compute the confirmation
        // tag before the frame is finalized.
        tree.truncate()?;
        private_tree.truncate(tree.size());
        tree.set_hash_all()?;
        let tree_hash = tree.root_hash()?;

        let mut transcript = self.transcript.clone();
        transcript.update_confirmed(&message.commit_content()?);

        let new_epoch = self.epoch + 1;
        let new_context = GroupContext {
            group_id: self.group_id.clone(),
            epoch: new_epoch,
            tree_hash: tree_hash.clone(),
            confirmed_transcript_hash: transcript.confirmed.clone(),
            extensions: self.extensions.clone(),
        };
        let key_schedule =
            self.key_schedule
                .next(&commit_secret, None, None, &encode(&new_context)?)?;

        let confirmation_tag = Mac(key_schedule.confirmation_tag(&transcript.confirmed));
        message.confirmation_tag = Some(confirmation_tag.clone());
        message.set_membership_tag(&self.key_schedule, Some(&current_context))?;
        transcript.update_interim(&message.commit_auth_data()?);

        let welcome = if applied.joiners.is_empty() {
            None
        } else {
            Some(self.build_welcome(
                &tree,
                &private_tree,
                &key_schedule,
                &transcript,
                &confirmation_tag,
                &applied.joiners,
                signing_key,
                rng,
            )?)
        };

        let keys = GroupKeySource::new(
            self.suite,
            tree.size(),
            key_schedule.encryption_secret.clone(),
            self.config,
        )?;

        debug!(
            epoch = new_epoch,
            joiners = applied.joiners.len(),
            "committed pending proposals"
        );

        let next = GroupState {
            suite: self.suite,
            group_id: self.group_id.clone(),
            epoch: new_epoch,
            tree,
            tree_hash,
            private_tree,
            transcript,
            extensions: self.extensions.clone(),
            key_schedule,
            keys,
            index: self.index,
            pending_proposals: BTreeMap::new(),
            update_secrets: BTreeMap::new(),
            config: self.config,
        };

        Ok((message, welcome, next))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_welcome(
        &self,
        tree: &RatchetTree,
        private_tree: &PrivateTree,
        key_schedule: &KeyScheduleEpoch,
        transcript: &TranscriptHash,
        confirmation_tag: &Mac,
        joiners: &[(LeafIndex, KeyPackage)],
        signing_key: &SignaturePrivateKey,
        rng: &Rng,
    ) -> Result<Welcome> {
        let mut group_info = GroupInfo {
            group_id: self.group_id.clone(),
            epoch: self.epoch + 1,
            tree: tree.to_nodes(),
            confirmed_transcript_hash: transcript.confirmed.clone(),
            interim_transcript_hash: transcript.interim.clone(),
            extensions: self.extensions.clone(),
            confirmation_tag: confirmation_tag.clone(),
            signer_index: self.index,
            signature: crate::crypto::signature::Signature::from_bytes(Vec::new()),
        };
        group_info.sign(signing_key)?;

        let welcome_key_nonce = key_schedule.welcome_key_nonce()?;
        let encrypted_group_info = aead_seal(
            self.suite,
            welcome_key_nonce.key.as_bytes(),
            &encode(&group_info)?,
            welcome_key_nonce.nonce.as_bytes(),
            &[],
        )?;

        let mut secrets = Vec::new();
        for (leaf, key_package) in joiners {
            let path_secret = private_tree
                .shared_path_secret(*leaf)
                .map(|(_, secret)| PathSecret(secret.as_bytes().to_vec()));
            let group_secrets = GroupSecrets {
                joiner_secret: key_schedule.joiner_secret.as_bytes().to_vec(),
                path_secret,
            };
            let encrypted_group_secrets = hpke_seal(
                self.suite,
                &key_package.init_key,
                &[],
                &[],
                &encode(&group_secrets)?,
                rng,
            )?;
            secrets.push(EncryptedGroupSecrets {
                key_package_hash: key_package.hash()?,
                encrypted_group_secrets,
            });
        }

        debug!(epoch = self.epoch + 1, joiners = joiners.len(), "issued welcome");

        Ok(Welcome {
            version: crate::key_package::ProtocolVersion::Mls10,
            cipher_suite: self.suite,
            secrets,
            encrypted_group_info,
        })
    }

    /// Export the signed public state non-members need for an external
    /// commit.
    pub fn public_group_state(&self, signing_key: &SignaturePrivateKey) -> Result<PublicGroupState> {
        let mut state = PublicGroupState {
            cipher_suite: self.suite,
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            tree_hash: self.tree_hash.clone(),
            confirmed_transcript_hash: self.transcript.confirmed.clone(),
            interim_transcript_hash: self.transcript.interim.clone(),
            extensions: self.extensions.clone(),
            external_pub: self.key_schedule.external_pub().clone(),
            tree: self.tree.to_nodes(),
            signer_index: self.index,
            signature: crate::crypto::signature::Signature::from_bytes(Vec::new()),
        };
        state.sign(signing_key)?;
        Ok(state)
    }

    /// Join a group from the outside: derive a forced init secret against
    /// the group's external key pair and commit ourselves in.
    pub fn external_commit(
        public_state: &PublicGroupState,
        key_package: KeyPackage,
        leaf_secret: Secret,
        signing_key: &SignaturePrivateKey,
        config: GroupConfig,
        rng: &Rng,
    ) -> Result<(PublicMessage, GroupState)> {
        let suite = public_state.cipher_suite;
        key_package.verify()?;
        if key_package.cipher_suite != suite {
            return Err(Error::InvalidParameter("cipher suite mismatch"));
        }

        let mut tree = RatchetTree::from_nodes(suite, public_state.tree.clone())?;
        tree.set_hash_all()?;
        if tree.root_hash()? != public_state.tree_hash {
            return Err(Error::Protocol("tree hash mismatch"));
        }
        let signer = tree
            .key_package(public_state.signer_index)?
            .ok_or(Error::Protocol("blanked sender leaf"))?;
        signer
            .credential
            .verify(&public_state.to_be_signed()?, &public_state.signature)
            .map_err(|_| Error::Protocol("bad signature"))?;

        let (kem_output, init_secret) =
            KeyScheduleEpoch::external_init(suite, &public_state.external_pub, rng)?;

        // The encap context covers the tree as the members know it, before
        // our leaf lands.
        let new_epoch = public_state.epoch + 1;
        let provisional = GroupContext {
            group_id: public_state.group_id.clone(),
            epoch: new_epoch,
            tree_hash: public_state.tree_hash.clone(),
            confirmed_transcript_hash: public_state.confirmed_transcript_hash.clone(),
            extensions: public_state.extensions.clone(),
        };

        let index = tree.add_leaf(key_package)?;
        let (private_tree, path) = tree.encap(
            index,
            &encode(&provisional)?,
            &leaf_secret,
            signing_key,
            rng,
        )?;
        let commit_secret = private_tree.update_secret().clone();

        let mut message = PublicMessage::new(
            public_state.group_id.clone(),
            public_state.epoch,
            Sender::NewMember,
            Content::Commit(Commit {
                proposals: vec![ProposalOrRef::Proposal(Proposal::ExternalInit(
                    ExternalInitProposal {
                        kem_output: kem_output.clone(),
                    },
                ))],
                path: Some(path),
            }),
        );
        message.sign(None, signing_key)?;

        tree.set_hash_all()?;
        let tree_hash = tree.root_hash()?;

        let mut transcript = TranscriptHash::new(suite);
        transcript.confirmed = public_state.confirmed_transcript_hash.clone();
        transcript.interim = public_state.interim_transcript_hash.clone();
        transcript.update_confirmed(&message.commit_content()?);

        let context = GroupContext {
            group_id: public_state.group_id.clone(),
            epoch: new_epoch,
            tree_hash: tree_hash.clone(),
            confirmed_transcript_hash: transcript.confirmed.clone(),
            extensions: public_state.extensions.clone(),
        };
        let joiner_secret = crate::crypto::hkdf::extract(
            suite,
            init_secret.as_bytes(),
            commit_secret.as_bytes(),
        );
        let key_schedule =
            KeyScheduleEpoch::from_joiner_secret(suite, joiner_secret, None, &encode(&context)?)?;

        message.confirmation_tag = Some(Mac(
            key_schedule.confirmation_tag(&transcript.confirmed)
        ));
        transcript.update_interim(&message.commit_auth_data()?);

        let keys = GroupKeySource::new(
            suite,
            tree.size(),
            key_schedule.encryption_secret.clone(),
            config,
        )?;

        debug!(epoch = new_epoch, "joined group via external commit");

        let state = GroupState {
            suite,
            group_id: public_state.group_id.clone(),
            epoch: new_epoch,
            tree,
            tree_hash,
            private_tree,
            transcript,
            extensions: public_state.extensions.clone(),
            key_schedule,
            keys,
            index,
            pending_proposals: BTreeMap::new(),
            update_secrets: BTreeMap::new(),
            config,
        };

        Ok((message, state))
    }

    /// Seal an application payload under our current sending ratchet.
    pub fn protect(
        &mut self,
        data: &[u8],
        signing_key: &SignaturePrivateKey,
        rng: &Rng,
    ) -> Result<SealedMessage> {
        let mut message = PublicMessage::new(
            self.group_id.clone(),
            self.epoch,
            Sender::Member(self.index),
            Content::Application(data.to_vec()),
        );
        let context = self.context();
        message.sign(Some(&context), signing_key)?;
        seal(&message, &self.key_schedule, &mut self.keys, rng)
    }

    /// Open a sealed frame from this epoch and verify its signature.
    pub fn open(&mut self, sealed: &SealedMessage) -> Result<PublicMessage> {
        if sealed.group_id != self.group_id {
            return Err(Error::Protocol("group id mismatch"));
        }
        if sealed.epoch != self.epoch {
            return Err(Error::Protocol("epoch mismatch"));
        }

        let message = open(sealed, &self.key_schedule, &mut self.keys)?;
        let credential = self.sender_credential(&message)?;
        let context = self.context();
        message.verify_signature(Some(&context), &credential)?;

        if let (Content::Commit(_), None) = (&message.content, &message.confirmation_tag) {
            return Err(Error::Protocol("missing confirmation tag"));
        }

        Ok(message)
    }

    /// Open a sealed application frame and return its payload.
    pub fn unprotect(&mut self, sealed: &SealedMessage) -> Result<Vec<u8>> {
        let message = self.open(sealed)?;
        match message.content {
            Content::Application(data) => Ok(data),
            _ => Err(Error::InvalidParameter("not an application frame")),
        }
    }

    /// Seal a handshake frame for the wire.
    pub fn seal_message(
        &mut self,
        message: &PublicMessage,
        rng: &Rng,
    ) -> Result<SealedMessage> {
        seal(message, &self.key_schedule, &mut self.keys, rng)
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(4)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
