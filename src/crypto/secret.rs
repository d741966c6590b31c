// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(not(test))]
use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

/// Generic container for sensitive bytes with best-effort security measures.
///
/// In particular this implementation provides:
/// 1. Zeroise memory on drop.
/// 2. Hide bytes value when printing debug info.
/// 3. Constant-time comparison implementation to prevent timing attacks.
///
/// Secret lengths are suite-dependent (KDF hash size, AEAD key size), so the
/// buffer is heap-backed rather than a fixed array.
#[derive(Clone, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
#[cfg_attr(test, derive(Debug))]
pub struct Secret(#[serde(with = "serde_bytes")] Vec<u8>);

impl Secret {
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// All-zero secret of the given length, used as the "zero" input of the
    /// key schedule.
    pub(crate) fn zero(len: usize) -> Self {
        Self(vec![0u8; len])
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time comparison.
        bool::from(self.0.ct_eq(&other.0))
    }
}

#[cfg(not(test))]
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not reveal secret values when printing debug info.
        f.debug_struct("Secret").field("value", &"***").finish()
    }
}

/// Symmetric key and nonce pair for one AEAD operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAndNonce {
    pub key: Secret,
    pub nonce: Secret,
}

#[cfg(test)]
mod tests {
    use super::Secret;

    #[test]
    fn constant_time_eq() {
        let a = Secret::from_slice(&[7; 32]);
        let b = Secret::from_slice(&[7; 32]);
        let c = Secret::from_slice(&[8; 32]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn zero_secret() {
        let zero = Secret::zero(16);
        assert_eq!(zero.len(), 16);
        assert_eq!(zero.as_bytes(), &[0; 16]);
    }
}
