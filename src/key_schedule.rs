// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-epoch key schedule: the deterministic derivation chain turning
//! commit secrets into the full set of symmetric keys for one epoch.
use serde::{Deserialize, Serialize};

use crate::crypto::hkdf::{derive_secret, expand_with_label, extract};
use crate::crypto::hpke::{HpkePrivateKey, HpkePublicKey, derive_key_pair, export_open, export_seal};
use crate::crypto::rng::Rng;
use crate::crypto::secret::{KeyAndNonce, Secret};
use crate::crypto::sha2::{hash, hmac};
use crate::crypto::suite::CipherSuite;
use crate::error::Result;

const EXTERNAL_INIT_LABEL: &str = "external init";

/// All secrets of one epoch. Immutable once constructed; advancing the
/// group builds the successor via [`KeyScheduleEpoch::next`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyScheduleEpoch {
    pub suite: CipherSuite,

    pub joiner_secret: Secret,
    pub member_secret: Secret,
    pub epoch_secret: Secret,

    pub sender_data_secret: Secret,
    pub encryption_secret: Secret,
    pub exporter_secret: Secret,
    pub authentication_secret: Secret,
    pub external_secret: Secret,
    pub confirmation_key: Secret,
    pub membership_key: Secret,
    pub resumption_secret: Secret,
    pub init_secret: Secret,

    pub external_priv: HpkePrivateKey,
}

impl PartialEq for KeyScheduleEpoch {
    fn eq(&self, other: &Self) -> bool {
        // The external key pair is a function of the external secret.
        self.suite == other.suite
            && self.joiner_secret == other.joiner_secret
            && self.member_secret == other.member_secret
            && self.epoch_secret == other.epoch_secret
            && self.sender_data_secret == other.sender_data_secret
            && self.encryption_secret == other.encryption_secret
            && self.exporter_secret == other.exporter_secret
            && self.authentication_secret == other.authentication_secret
            && self.external_secret == other.external_secret
            && self.confirmation_key == other.confirmation_key
            && self.membership_key == other.membership_key
            && self.resumption_secret == other.resumption_secret
            && self.init_secret == other.init_secret
    }
}

impl KeyScheduleEpoch {
    /// First epoch of a founding member, keyed by a fresh random init
    /// secret.
    pub fn first(suite: CipherSuite, context: &[u8], rng: &Rng) -> Result<Self> {
        let init_secret = Secret::from_bytes(rng.random_vec(suite.hash_size())?);
        let commit_secret = Secret::zero(suite.hash_size());
        let joiner_secret = extract(suite, init_secret.as_bytes(), commit_secret.as_bytes());
        Self::from_joiner_secret(suite, joiner_secret, None, context)
    }

    /// Construct an epoch from its joiner secret, as a new member does when
    /// processing a welcome.
    pub fn from_joiner_secret(
        suite: CipherSuite,
        joiner_secret: Secret,
        psk_secret: Option<&Secret>,
        context: &[u8],
    ) -> Result<Self> {
        let zero = Secret::zero(suite.hash_size());
        let psk_secret = psk_secret.unwrap_or(&zero);

        let member_salt =
            expand_with_label(suite, &joiner_secret, "member", &[], suite.hash_size())?;
        let member_secret = extract(suite, member_salt.as_bytes(), psk_secret.as_bytes());
        let epoch_secret =
            expand_with_label(suite, &member_secret, "epoch", context, suite.hash_size())?;

        let sender_data_secret = derive_secret(suite, &epoch_secret, "sender data")?;
        let encryption_secret = derive_secret(suite, &epoch_secret, "encryption")?;
        let exporter_secret = derive_secret(suite, &epoch_secret, "exporter")?;
        let authentication_secret = derive_secret(suite, &epoch_secret, "authentication")?;
        let external_secret = derive_secret(suite, &epoch_secret, "external")?;
        let confirmation_key = derive_secret(suite, &epoch_secret, "confirm")?;
        let membership_key = derive_secret(suite, &epoch_secret, "membership")?;
        let resumption_secret = derive_secret(suite, &epoch_secret, "resumption")?;
        let init_secret = derive_secret(suite, &epoch_secret, "init")?;

        let external_priv = derive_key_pair(suite, &external_secret)?;

        Ok(Self {
            suite,
            joiner_secret,
            member_secret,
            epoch_secret,
            sender_data_secret,
            encryption_secret,
            exporter_secret,
            authentication_secret,
            external_secret,
            confirmation_key,
            membership_key,
            resumption_secret,
            init_secret,
            external_priv,
        })
    }

    /// Advance to the next epoch. `force_init_secret` overrides the stored
    /// init secret for external commits; `context` is marshaled at the new
    /// epoch.
    pub fn next(
        &self,
        commit_secret: &Secret,
        force_init_secret: Option<&Secret>,
        psk_secret: Option<&Secret>,
        context: &[u8],
    ) -> Result<Self> {
        let init_secret = force_init_secret.unwrap_or(&self.init_secret);
        let joiner_secret = extract(self.suite, init_secret.as_bytes(), commit_secret.as_bytes());
        Self::from_joiner_secret(self.suite, joiner_secret, psk_secret, context)
    }

    /// The joiner secret for welcome messages issued at this epoch.
    pub fn welcome_secret(&self) -> Result<Secret> {
        Ok(derive_secret(self.suite, &self.joiner_secret, "welcome")?)
    }

    pub fn welcome_key_nonce(&self) -> Result<KeyAndNonce> {
        Self::welcome_key_nonce_from_joiner(self.suite, &self.joiner_secret)
    }

    /// Same derivation for a joiner who only holds the joiner secret so
    /// far.
    pub fn welcome_key_nonce_from_joiner(
        suite: CipherSuite,
        joiner_secret: &Secret,
    ) -> Result<KeyAndNonce> {
        let welcome_secret = derive_secret(suite, joiner_secret, "welcome")?;
        let key = expand_with_label(suite, &welcome_secret, "key", &[], suite.aead_key_size())?;
        let nonce = expand_with_label(
            suite,
            &welcome_secret,
            "nonce",
            &[],
            suite.aead_nonce_size(),
        )?;
        Ok(KeyAndNonce { key, nonce })
    }

    /// The external public key advertised to prospective external
    /// committers.
    pub fn external_pub(&self) -> &HpkePublicKey {
        self.external_priv.public_key()
    }

    /// Sender side of an external commit: derive the forced init secret by
    /// exporting against the group's external key pair.
    pub fn external_init(
        suite: CipherSuite,
        external_pub: &HpkePublicKey,
        rng: &Rng,
    ) -> Result<(Vec<u8>, Secret)> {
        Ok(export_seal(
            suite,
            external_pub,
            EXTERNAL_INIT_LABEL,
            suite.hash_size(),
            rng,
        )?)
    }

    /// Receiver side of an external commit: recover the forced init secret
    /// from the kem output carried by the external-init proposal.
    pub fn receive_external_init(&self, kem_output: &[u8]) -> Result<Secret> {
        Ok(export_open(
            self.suite,
            kem_output,
            &self.external_priv,
            EXTERNAL_INIT_LABEL,
            self.suite.hash_size(),
        )?)
    }

    /// Key and nonce protecting the sender data of one sealed message,
    /// bound to a sample of the content ciphertext.
    pub fn sender_data_key_nonce(&self, ciphertext: &[u8]) -> Result<KeyAndNonce> {
        let sample_size = self.suite.hash_size().min(ciphertext.len());
        let sample = &ciphertext[..sample_size];
        let key = expand_with_label(
            self.suite,
            &self.sender_data_secret,
            "key",
            sample,
            self.suite.aead_key_size(),
        )?;
        let nonce = expand_with_label(
            self.suite,
            &self.sender_data_secret,
            "nonce",
            sample,
            self.suite.aead_nonce_size(),
        )?;
        Ok(KeyAndNonce { key, nonce })
    }

    /// MAC over a framed plaintext proving group membership.
    pub fn membership_tag(&self, to_be_tagged: &[u8]) -> Vec<u8> {
        hmac(self.suite, self.membership_key.as_bytes(), to_be_tagged)
    }

    /// MAC over the confirmed transcript hash carried by commits.
    pub fn confirmation_tag(&self, confirmed_transcript_hash: &[u8]) -> Vec<u8> {
        hmac(
            self.suite,
            self.confirmation_key.as_bytes(),
            confirmed_transcript_hash,
        )
    }

    /// Application exporter: a labeled secret bound to caller context.
    pub fn export_secret(&self, label: &str, context: &[u8], length: usize) -> Result<Secret> {
        let labeled = derive_secret(self.suite, &self.exporter_secret, label)?;
        let context_hash = hash(self.suite, &[context]);
        Ok(expand_with_label(self.suite, &labeled, "exporter", &context_hash, length)?)
    }
}

/// The two rolling hashes binding the ordered history of commits into the
/// key schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptHash {
    suite: CipherSuite,
    #[serde(with = "serde_bytes")]
    pub confirmed: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub interim: Vec<u8>,
}

impl TranscriptHash {
    pub fn new(suite: CipherSuite) -> Self {
        Self {
            suite,
            confirmed: Vec::new(),
            interim: Vec::new(),
        }
    }

    /// `confirmed_{n+1} = H(interim_n ‖ commit_content)`
    pub fn update_confirmed(&mut self, commit_content: &[u8]) {
        self.confirmed = hash(self.suite, &[&self.interim, commit_content]);
    }

    /// `interim_{n+1} = H(confirmed_{n+1} ‖ commit_auth_data)`
    pub fn update_interim(&mut self, commit_auth_data: &[u8]) {
        self.interim = hash(self.suite, &[&self.confirmed, commit_auth_data]);
    }
}
