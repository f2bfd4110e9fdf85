//! Helpers for driving round-based participants by hand in tests

use crate::network::{OutgoingUnicasts, RoundMessages};
use crate::ShareholderId;
use std::collections::BTreeMap;

/// Turn every party's per-recipient outputs into every party's per-sender inputs.
pub fn map_unicasts<T>(
    outputs: BTreeMap<ShareholderId, OutgoingUnicasts<T>>,
) -> BTreeMap<ShareholderId, RoundMessages<T>> {
    let mut inputs: BTreeMap<ShareholderId, RoundMessages<T>> = outputs
        .keys()
        .map(|id| (*id, RoundMessages::new()))
        .collect();
    for (from, outgoing) in outputs {
        for (to, message) in outgoing {
            inputs.entry(to).or_default().insert(from, message);
        }
    }
    inputs
}

/// Deliver every party's broadcast to every other party.
pub fn map_broadcasts<T: Clone>(
    outputs: &BTreeMap<ShareholderId, T>,
) -> BTreeMap<ShareholderId, RoundMessages<T>> {
    outputs
        .keys()
        .map(|me| {
            let others = outputs
                .iter()
                .filter(|(from, _)| *from != me)
                .map(|(from, message)| (*from, message.clone()))
                .collect();
            (*me, others)
        })
        .collect()
}
