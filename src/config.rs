// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

/// Bounds on the per-generation key cache of the group key source.
///
/// Within one epoch, messages from the same sender may arrive slightly out
/// of order. Keys for generations which have not been seen yet are retained
/// up to `out_of_order_tolerance` entries per sender ratchet; the ratchet
/// never fast-forwards more than `maximum_forward_distance` generations at
/// once. Anything outside these windows is irrecoverable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub maximum_forward_distance: u32,
    pub out_of_order_tolerance: u32,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            maximum_forward_distance: 1000,
            out_of_order_tolerance: 100,
        }
    }
}
