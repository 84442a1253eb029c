//! Deciding which of two loadout items owns a path.

use crate::loadout::{ItemId, Loadout, RuleKind};
use crate::tree::{LoadoutSourceItemType, SyncNodePart};

/// Returns true if `replacement` should take the path from `existing`.
///
/// Game files always lose. Items in the overrides group beat everything
/// else; between two overrides the older item stays. Collection rules are
/// consulted next, and the newer item wins when no rule applies.
pub fn should_win(
    loadout: &Loadout,
    existing: &SyncNodePart,
    existing_source: LoadoutSourceItemType,
    replacement: &SyncNodePart,
    replacement_source: LoadoutSourceItemType,
) -> bool {
    if existing_source == LoadoutSourceItemType::Game {
        return true;
    }
    if replacement_source == LoadoutSourceItemType::Game {
        return false;
    }

    let (Some(existing_id), Some(replacement_id)) = (existing.item, replacement.item) else {
        return false;
    };

    let existing_in_overrides = loadout.is_in_overrides(existing_id);
    let replacement_in_overrides = loadout.is_in_overrides(replacement_id);

    match (existing_in_overrides, replacement_in_overrides) {
        (true, false) => false,
        (false, true) => true,
        (true, true) => replacement_id < existing_id,
        (false, false) => {
            collection_rule_winner(loadout, existing_id, replacement_id)
                .unwrap_or(replacement_id > existing_id)
        }
    }
}

/// Returns `Some(true)` when a collection rule says `b` wins over `a`,
/// `Some(false)` when it says `a` wins, `None` when no rule applies.
///
/// Only items from two downloads of the same collection revision can be
/// ordered by rules.
pub fn collection_rule_winner(loadout: &Loadout, a: ItemId, b: ItemId) -> Option<bool> {
    let download_a = loadout.collection_download(a)?;
    let download_b = loadout.collection_download(b)?;
    if download_a.revision != download_b.revision {
        return None;
    }

    if let Some(rule) = loadout.rules(download_a.id, download_b.id).next() {
        // `a` goes before `b`, so `b` overwrites it
        return Some(rule.kind == RuleKind::Before);
    }

    if let Some(rule) = loadout.rules(download_b.id, download_a.id).next() {
        return Some(rule.kind == RuleKind::After);
    }

    None
}
