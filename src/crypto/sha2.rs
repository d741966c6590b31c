// SPDX-License-Identifier: MIT OR Apache-2.0

//! SHA2 hashing and HMAC, sized per cipher suite.
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

use crate::crypto::suite::{CipherSuite, HashAlgorithm};

/// Suite digest over the concatenation of the given byte strings.
pub fn hash(suite: CipherSuite, messages: &[&[u8]]) -> Vec<u8> {
    match suite.params().hash {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            for message in messages {
                hasher.update(message);
            }
            hasher.finalize().to_vec()
        }
        HashAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            for message in messages {
                hasher.update(message);
            }
            hasher.finalize().to_vec()
        }
    }
}

/// Suite HMAC; used for the membership and confirmation tags and as the
/// extract step of the key schedule.
pub fn hmac(suite: CipherSuite, key: &[u8], message: &[u8]) -> Vec<u8> {
    match suite.params().hash {
        HashAlgorithm::Sha256 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgorithm::Sha512 => {
            let mut mac =
                Hmac::<Sha512>::new_from_slice(key).expect("hmac accepts any key length");
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
    }
}
