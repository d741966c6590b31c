// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic fixtures for tests and the vector harness.
use crate::credential::Credential;
use crate::crypto::hkdf::expand_with_label;
use crate::crypto::hpke::{HpkePrivateKey, derive_key_pair};
use crate::crypto::rng::Rng;
use crate::crypto::secret::Secret;
use crate::crypto::signature::SignaturePrivateKey;
use crate::crypto::suite::CipherSuite;
use crate::error::Result;
use crate::key_package::{EXTENSION_LIFETIME, Extension, KeyPackage, Lifetime};

/// A member candidate: identity keys plus a published key package and the
/// private half of its init key.
pub struct TestMember {
    pub signing_key: SignaturePrivateKey,
    pub key_package: KeyPackage,
    pub init_key: HpkePrivateKey,
}

/// Generate a member with a signed key package for the given suite.
pub fn test_member(suite: CipherSuite, identity: &[u8], rng: &Rng) -> Result<TestMember> {
    let signing_key = SignaturePrivateKey::generate(suite.signature_scheme(), rng)
        .map_err(|err| crate::error::Error::Crypto(err.into()))?;

    let leaf_secret = Secret::from_bytes(rng.random_vec(suite.hash_size())?);
    let node_secret = expand_with_label(suite, &leaf_secret, "node", &[], suite.hash_size())?;
    let init_key = derive_key_pair(suite, &node_secret)?;

    let credential = Credential::basic(
        identity.to_vec(),
        suite.signature_scheme(),
        signing_key.public_key().clone(),
    );
    let key_package = KeyPackage::new(
        suite,
        init_key.public_key().clone(),
        credential,
        vec![Extension::new(EXTENSION_LIFETIME, &Lifetime::default())?],
        &signing_key,
    )?;

    Ok(TestMember {
        signing_key,
        key_package,
        init_key,
    })
}

/// A fresh random leaf secret for updates and commits.
pub fn leaf_secret(suite: CipherSuite, rng: &Rng) -> Result<Secret> {
    Ok(Secret::from_bytes(rng.random_vec(suite.hash_size())?))
}
