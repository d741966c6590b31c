// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end group lifecycle scenarios.
use crate::config::GroupConfig;
use crate::crypto::rng::Rng;
use crate::crypto::suite::CipherSuite;
use crate::error::Error;
use crate::framing::PublicMessage;
use crate::group::GroupState;
use crate::messages::Welcome;
use crate::test_utils::{TestMember, leaf_secret, test_member};
use crate::tree_math::LeafIndex;

const SUITE: CipherSuite = CipherSuite::X25519Aes128GcmSha256Ed25519;
const GROUP_ID: &[u8] = &[0xde, 0xad, 0xbe, 0xef];

fn founder(rng: &Rng, identity: &[u8]) -> (TestMember, GroupState) {
    let member = test_member(SUITE, identity, rng).unwrap();
    let group = GroupState::new(
        GROUP_ID.to_vec(),
        member.key_package.clone(),
        member.init_key.clone(),
        GroupConfig::default(),
        rng,
    )
    .unwrap();
    (member, group)
}

/// Commit all cached proposals on `committer` and return frame, welcome and
/// successor.
fn commit(
    committer: &GroupState,
    member: &TestMember,
    rng: &Rng,
) -> (PublicMessage, Option<Welcome>, GroupState) {
    committer
        .commit(leaf_secret(SUITE, rng).unwrap(), &member.signing_key, rng)
        .unwrap()
}

#[test]
fn founder_alone_sends_to_herself() {
    let rng = Rng::from_seed([1; 32]);
    let (alice, mut group) = founder(&rng, b"alice");

    let sealed = group.protect(b"hello", &alice.signing_key, &rng).unwrap();
    let plaintext = group.unprotect(&sealed).unwrap();

    assert_eq!(plaintext, b"hello");
    assert_eq!(group.epoch(), 0);
    assert_eq!(group.roster().unwrap().len(), 1);
}

#[test]
fn two_member_add_converges() {
    let rng = Rng::from_seed([2; 32]);
    let (alice, mut alice_group) = founder(&rng, b"alice");
    let bob = test_member(SUITE, b"bob", &rng).unwrap();

    let proposal = alice_group
        .add_proposal(bob.key_package.clone(), &alice.signing_key)
        .unwrap();
    alice_group.handle(&proposal).unwrap();

    let (_, welcome, alice_group) = commit(&alice_group, &alice, &rng);
    let bob_group = GroupState::from_welcome(
        &welcome.expect("commit with add produces a welcome"),
        &bob.key_package,
        bob.init_key.clone(),
        GroupConfig::default(),
    )
    .unwrap();

    assert_eq!(alice_group.epoch(), 1);
    assert_eq!(alice_group, bob_group);
    assert_eq!(bob_group.index(), LeafIndex(1));
}

#[test]
fn welcome_for_someone_else_is_rejected() {
    let rng = Rng::from_seed([3; 32]);
    let (alice, mut alice_group) = founder(&rng, b"alice");
    let bob = test_member(SUITE, b"bob", &rng).unwrap();
    let mallory = test_member(SUITE, b"mallory", &rng).unwrap();

    let proposal = alice_group
        .add_proposal(bob.key_package.clone(), &alice.signing_key)
        .unwrap();
    alice_group.handle(&proposal).unwrap();
    let (_, welcome, _) = commit(&alice_group, &alice, &rng);

    let result = GroupState::from_welcome(
        &welcome.unwrap(),
        &mallory.key_package,
        mallory.init_key.clone(),
        GroupConfig::default(),
    );
    assert!(matches!(result, Err(Error::InvalidParameter(_))));
}

#[test]
fn three_members_update_rotates_keys() {
    let rng = Rng::from_seed([4; 32]);
    let (alice, mut alice_group) = founder(&rng, b"alice");
    let bob = test_member(SUITE, b"bob", &rng).unwrap();
    let carol = test_member(SUITE, b"carol", &rng).unwrap();

    // Epoch 1: add Bob.
    let proposal = alice_group
        .add_proposal(bob.key_package.clone(), &alice.signing_key)
        .unwrap();
    alice_group.handle(&proposal).unwrap();
    let (_, welcome, alice_group) = commit(&alice_group, &alice, &rng);
    let mut alice_group = alice_group;
    let mut bob_group = GroupState::from_welcome(
        &welcome.unwrap(),
        &bob.key_package,
        bob.init_key.clone(),
        GroupConfig::default(),
    )
    .unwrap();

    // Epoch 2: add Carol.
    let proposal = alice_group
        .add_proposal(carol.key_package.clone(), &alice.signing_key)
        .unwrap();
    alice_group.handle(&proposal).unwrap();
    bob_group.handle(&proposal).unwrap();
    let (commit_message, welcome, alice_next) = commit(&alice_group, &alice, &rng);
    let mut alice_group = alice_next;
    let mut bob_group = bob_group.handle(&commit_message).unwrap().unwrap();
    let mut carol_group = GroupState::from_welcome(
        &welcome.unwrap(),
        &carol.key_package,
        carol.init_key.clone(),
        GroupConfig::default(),
    )
    .unwrap();
    assert_eq!(alice_group.epoch(), 2);

    let bob_old_init_key = bob_group
        .tree()
        .key_package(bob_group.index())
        .unwrap()
        .unwrap()
        .init_key
        .clone();

    // Epoch 3: Bob proposes an update with a fresh leaf secret, Alice
    // commits it.
    let update = bob_group
        .update_proposal(leaf_secret(SUITE, &rng).unwrap(), &bob.signing_key)
        .unwrap();
    alice_group.handle(&update).unwrap();
    bob_group.handle(&update).unwrap();
    carol_group.handle(&update).unwrap();

    let (commit_message, _, alice_group) = commit(&alice_group, &alice, &rng);
    let bob_group = bob_group.handle(&commit_message).unwrap().unwrap();
    let carol_group = carol_group.handle(&commit_message).unwrap().unwrap();

    assert_eq!(alice_group.epoch(), 3);
    assert_eq!(alice_group, bob_group);
    assert_eq!(alice_group, carol_group);
    assert_eq!(
        alice_group.key_schedule().epoch_secret,
        carol_group.key_schedule().epoch_secret
    );

    // Bob's old leaf key has been rotated out.
    let bob_new_init_key = &bob_group
        .tree()
        .key_package(bob_group.index())
        .unwrap()
        .unwrap()
        .init_key;
    assert_ne!(&bob_old_init_key, bob_new_init_key);
}

#[test]
fn remove_then_application_send() {
    let rng = Rng::from_seed([5; 32]);
    let (alice, mut alice_group) = founder(&rng, b"alice");
    let bob = test_member(SUITE, b"bob", &rng).unwrap();
    let carol = test_member(SUITE, b"carol", &rng).unwrap();
    let dave = test_member(SUITE, b"dave", &rng).unwrap();

    // Epoch 1: Alice adds Bob, Carol and Dave in one commit.
    for key_package in [&bob.key_package, &carol.key_package, &dave.key_package] {
        let proposal = alice_group
            .add_proposal(key_package.clone(), &alice.signing_key)
            .unwrap();
        alice_group.handle(&proposal).unwrap();
    }
    let (_, welcome, alice_group) = commit(&alice_group, &alice, &rng);
    let mut alice_group = alice_group;
    let welcome = welcome.unwrap();

    let join = |member: &TestMember| {
        GroupState::from_welcome(
            &welcome,
            &member.key_package,
            member.init_key.clone(),
            GroupConfig::default(),
        )
        .unwrap()
    };
    let mut bob_group = join(&bob);
    let mut carol_group = join(&carol);
    let mut dave_group = join(&dave);
    assert_eq!(alice_group.roster().unwrap().len(), 4);

    // Epoch 2: Alice removes Carol.
    let carol_leaf = carol_group.index();
    let proposal = alice_group
        .remove_proposal(carol_leaf, &alice.signing_key)
        .unwrap();
    alice_group.handle(&proposal).unwrap();
    bob_group.handle(&proposal).unwrap();
    dave_group.handle(&proposal).unwrap();

    let (commit_message, welcome, alice_group) = commit(&alice_group, &alice, &rng);
    assert!(welcome.is_none());
    let mut alice_group = alice_group;
    let mut bob_group = bob_group.handle(&commit_message).unwrap().unwrap();
    let mut dave_group = dave_group.handle(&commit_message).unwrap().unwrap();

    // Carol's own handling of the commit reports her removal.
    assert!(matches!(
        carol_group.handle(&commit_message),
        Err(Error::Protocol("removed from group"))
    ));

    assert_eq!(alice_group.epoch(), 2);
    assert_eq!(alice_group, bob_group);
    assert_eq!(alice_group, dave_group);
    // Carol's slot is blank, the roster is down to three.
    assert_eq!(alice_group.roster().unwrap().len(), 3);
    assert!(
        alice_group
            .roster()
            .unwrap()
            .iter()
            .all(|(leaf, _)| *leaf != carol_leaf)
    );

    // Dave sends an application message; Alice and Bob can read it.
    let sealed = dave_group
        .protect(b"carol is gone", &dave.signing_key, &rng)
        .unwrap();
    assert_eq!(alice_group.unprotect(&sealed).unwrap(), b"carol is gone");
    assert_eq!(bob_group.unprotect(&sealed).unwrap(), b"carol is gone");

    // Carol is stuck at epoch 1.
    assert!(matches!(
        carol_group.unprotect(&sealed),
        Err(Error::Protocol("epoch mismatch"))
    ));
}

#[test]
fn tampered_commit_is_rejected_and_state_unchanged() {
    let rng = Rng::from_seed([6; 32]);
    let (alice, mut alice_group) = founder(&rng, b"alice");
    let bob = test_member(SUITE, b"bob", &rng).unwrap();
    let carol = test_member(SUITE, b"carol", &rng).unwrap();

    for key_package in [&bob.key_package, &carol.key_package] {
        let proposal = alice_group
            .add_proposal(key_package.clone(), &alice.signing_key)
            .unwrap();
        alice_group.handle(&proposal).unwrap();
    }
    let (_, welcome, alice_group) = commit(&alice_group, &alice, &rng);
    let welcome = welcome.unwrap();
    let mut carol_group = GroupState::from_welcome(
        &welcome,
        &carol.key_package,
        carol.init_key.clone(),
        GroupConfig::default(),
    )
    .unwrap();

    // Alice issues an empty commit (rekey). Bob tampers with one byte of an
    // update-path ciphertext before forwarding it to Carol.
    let (commit_message, _, _) = commit(&alice_group, &alice, &rng);
    let mut tampered = commit_message.clone();
    if let crate::framing::Content::Commit(commit) = &mut tampered.content {
        let path = commit.path.as_mut().expect("empty commit carries a path");
        let node = path
            .nodes
            .iter_mut()
            .find(|node| !node.encrypted_path_secrets.is_empty())
            .expect("path addresses other members");
        node.encrypted_path_secrets[0].ciphertext[0] ^= 0x01;
    } else {
        panic!("commit frame expected");
    }

    let epoch_before = carol_group.epoch();
    let result = carol_group.handle(&tampered);
    assert!(matches!(
        result,
        Err(Error::Protocol(_)) | Err(Error::Crypto(_))
    ));

    // Carol's state is untouched; the genuine commit still applies.
    assert_eq!(carol_group.epoch(), epoch_before);
    let carol_next = carol_group.handle(&commit_message).unwrap().unwrap();
    assert_eq!(carol_next.epoch(), epoch_before + 1);
}

#[test]
fn remove_and_add_in_one_commit_welcomes_with_path_secret() {
    let rng = Rng::from_seed([10; 32]);
    let (alice, mut alice_group) = founder(&rng, b"alice");
    let bob = test_member(SUITE, b"bob", &rng).unwrap();
    let carol = test_member(SUITE, b"carol", &rng).unwrap();
    let dave = test_member(SUITE, b"dave", &rng).unwrap();

    // Epoch 1: Bob and Carol join.
    for key_package in [&bob.key_package, &carol.key_package] {
        let proposal = alice_group
            .add_proposal(key_package.clone(), &alice.signing_key)
            .unwrap();
        alice_group.handle(&proposal).unwrap();
    }
    let (_, welcome, alice_group) = commit(&alice_group, &alice, &rng);
    let mut alice_group = alice_group;
    let welcome = welcome.unwrap();
    let bob_leaf = GroupState::from_welcome(
        &welcome,
        &bob.key_package,
        bob.init_key.clone(),
        GroupConfig::default(),
    )
    .unwrap()
    .index();
    let mut carol_group = GroupState::from_welcome(
        &welcome,
        &carol.key_package,
        carol.init_key.clone(),
        GroupConfig::default(),
    )
    .unwrap();

    // Epoch 2: remove Bob and add Dave in the same commit. The removal
    // forces an update path, so Dave's welcome carries a path secret.
    let proposal = alice_group
        .remove_proposal(bob_leaf, &alice.signing_key)
        .unwrap();
    alice_group.handle(&proposal).unwrap();
    carol_group.handle(&proposal).unwrap();
    let proposal = alice_group
        .add_proposal(dave.key_package.clone(), &alice.signing_key)
        .unwrap();
    alice_group.handle(&proposal).unwrap();
    carol_group.handle(&proposal).unwrap();

    let (commit_message, welcome, alice_group) = commit(&alice_group, &alice, &rng);
    let carol_group = carol_group.handle(&commit_message).unwrap().unwrap();
    let dave_group = GroupState::from_welcome(
        &welcome.expect("commit with add produces a welcome"),
        &dave.key_package,
        dave.init_key.clone(),
        GroupConfig::default(),
    )
    .unwrap();

    assert_eq!(alice_group.epoch(), 2);
    assert_eq!(alice_group, carol_group);
    assert_eq!(alice_group, dave_group);
    // Dave fills Bob's old slot.
    assert_eq!(dave_group.index(), bob_leaf);
}

#[test]
fn external_init_join_converges() {
    let rng = Rng::from_seed([7; 32]);
    let (alice, mut alice_group) = founder(&rng, b"alice");
    let bob = test_member(SUITE, b"bob", &rng).unwrap();

    let proposal = alice_group
        .add_proposal(bob.key_package.clone(), &alice.signing_key)
        .unwrap();
    alice_group.handle(&proposal).unwrap();
    let (_, welcome, alice_group) = commit(&alice_group, &alice, &rng);
    let mut alice_group = alice_group;
    let mut bob_group = GroupState::from_welcome(
        &welcome.unwrap(),
        &bob.key_package,
        bob.init_key.clone(),
        GroupConfig::default(),
    )
    .unwrap();

    // Dora joins from the outside using the published group state.
    let public_state = alice_group.public_group_state(&alice.signing_key).unwrap();
    let dora = test_member(SUITE, b"dora", &rng).unwrap();
    let (commit_message, dora_group) = GroupState::external_commit(
        &public_state,
        dora.key_package.clone(),
        leaf_secret(SUITE, &rng).unwrap(),
        &dora.signing_key,
        GroupConfig::default(),
        &rng,
    )
    .unwrap();

    let alice_group = alice_group.handle(&commit_message).unwrap().unwrap();
    let bob_group = bob_group.handle(&commit_message).unwrap().unwrap();

    assert_eq!(alice_group.epoch(), 2);
    assert_eq!(alice_group, dora_group);
    assert_eq!(bob_group, dora_group);
    assert_eq!(
        alice_group.key_schedule().epoch_secret,
        dora_group.key_schedule().epoch_secret
    );
    assert_eq!(alice_group.roster().unwrap().len(), 3);
}

#[test]
fn cross_member_messaging_after_join() {
    let rng = Rng::from_seed([8; 32]);
    let (alice, mut alice_group) = founder(&rng, b"alice");
    let bob = test_member(SUITE, b"bob", &rng).unwrap();

    let proposal = alice_group
        .add_proposal(bob.key_package.clone(), &alice.signing_key)
        .unwrap();
    alice_group.handle(&proposal).unwrap();
    let (_, welcome, mut alice_group) = commit(&alice_group, &alice, &rng);
    let mut bob_group = GroupState::from_welcome(
        &welcome.unwrap(),
        &bob.key_package,
        bob.init_key.clone(),
        GroupConfig::default(),
    )
    .unwrap();

    // Both directions, several generations.
    for round in 0u8..3 {
        let from_alice = alice_group
            .protect(&[&b"ping "[..], &[round][..]].concat(), &alice.signing_key, &rng)
            .unwrap();
        assert_eq!(
            bob_group.unprotect(&from_alice).unwrap(),
            [&b"ping "[..], &[round][..]].concat()
        );

        let from_bob = bob_group
            .protect(&[&b"pong "[..], &[round][..]].concat(), &bob.signing_key, &rng)
            .unwrap();
        assert_eq!(
            alice_group.unprotect(&from_bob).unwrap(),
            [&b"pong "[..], &[round][..]].concat()
        );
    }
}

#[test]
fn commit_with_unknown_ref_is_rejected() {
    let rng = Rng::from_seed([9; 32]);
    let (alice, mut alice_group) = founder(&rng, b"alice");
    let bob = test_member(SUITE, b"bob", &rng).unwrap();
    let carol = test_member(SUITE, b"carol", &rng).unwrap();

    // Epoch 1: Bob joins.
    let proposal = alice_group
        .add_proposal(bob.key_package.clone(), &alice.signing_key)
        .unwrap();
    alice_group.handle(&proposal).unwrap();
    let (_, welcome, mut alice_group) = commit(&alice_group, &alice, &rng);
    let mut bob_group = GroupState::from_welcome(
        &welcome.unwrap(),
        &bob.key_package,
        bob.init_key.clone(),
        GroupConfig::default(),
    )
    .unwrap();

    // Alice caches an add of Carol and commits it, but the proposal never
    // reaches Bob.
    let proposal = alice_group
        .add_proposal(carol.key_package.clone(), &alice.signing_key)
        .unwrap();
    alice_group.handle(&proposal).unwrap();
    let (commit_message, _, _) = commit(&alice_group, &alice, &rng);

    let epoch_before = bob_group.epoch();
    assert!(matches!(
        bob_group.handle(&commit_message),
        Err(Error::Protocol("unknown proposal ref"))
    ));
    assert_eq!(bob_group.epoch(), epoch_before);
}
