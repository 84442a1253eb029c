//! Per-node signatures and the signature to action table.
//!
//! A signature captures, for one path, which of the three states (disk,
//! previous, loadout) have the file, which of them agree on its hash, which of
//! the hashes are already archived in the file store, and whether the path is
//! excluded from backups. The mapping to [`Actions`] is a pure function of the
//! signature and the node's [`LoadoutSourceItemType`].

use crate::actions::{Action, Actions};
use crate::hash::Hash;
use crate::tree::LoadoutSourceItemType;
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Signature(u16);

impl Signature {
    pub const DISK_EXISTS: u16 = 1 << 0;
    pub const PREV_EXISTS: u16 = 1 << 1;
    pub const LOADOUT_EXISTS: u16 = 1 << 2;
    pub const DISK_EQUALS_PREV: u16 = 1 << 3;
    pub const PREV_EQUALS_LOADOUT: u16 = 1 << 4;
    pub const DISK_EQUALS_LOADOUT: u16 = 1 << 5;
    pub const DISK_ARCHIVED: u16 = 1 << 6;
    pub const PREV_ARCHIVED: u16 = 1 << 7;
    pub const LOADOUT_ARCHIVED: u16 = 1 << 8;
    pub const PATH_IS_IGNORED: u16 = 1 << 9;
    /// Only meaningful for intrinsic files: the file can parse disk edits back into the loadout.
    pub const INTRINSIC_INGESTS: u16 = 1 << 10;

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn has(self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    /// Which sides hold a file and which of them agree.
    pub fn shape(self) -> Shape {
        let disk = self.has(Self::DISK_EXISTS);
        let prev = self.has(Self::PREV_EXISTS);
        let loadout = self.has(Self::LOADOUT_EXISTS);
        let dp = self.has(Self::DISK_EQUALS_PREV);
        let pl = self.has(Self::PREV_EQUALS_LOADOUT);
        let dl = self.has(Self::DISK_EQUALS_LOADOUT);

        match (disk, prev, loadout) {
            (false, false, false) => Shape::Absent,
            (false, false, true) => Shape::LoadoutOnly,
            (false, true, false) => Shape::PreviousOnly,
            (false, true, true) if pl => Shape::PreviousMatchesLoadout,
            (false, true, true) => Shape::PreviousAndLoadoutDiffer,
            (true, false, false) => Shape::DiskOnly,
            (true, false, true) if dl => Shape::DiskMatchesLoadout,
            (true, false, true) => Shape::DiskAndLoadoutDiffer,
            (true, true, false) if dp => Shape::DiskMatchesPrevious,
            (true, true, false) => Shape::DiskAndPreviousDiffer,
            (true, true, true) => match (dp, pl, dl) {
                (true, true, _) => Shape::AllMatch,
                (true, false, _) => Shape::LoadoutChanged,
                (false, _, true) => Shape::PreviousChanged,
                (false, true, false) => Shape::DiskChanged,
                (false, false, false) => Shape::AllDiffer,
            },
        }
    }

    /// Archived flags packed as `0bDPL` (disk, previous, loadout).
    pub fn archived(self) -> u8 {
        let mut bits = 0u8;
        if self.has(Self::DISK_ARCHIVED) {
            bits |= 0b100;
        }
        if self.has(Self::PREV_ARCHIVED) {
            bits |= 0b010;
        }
        if self.has(Self::LOADOUT_ARCHIVED) {
            bits |= 0b001;
        }
        bits
    }

    pub fn is_ignored(self) -> bool {
        self.has(Self::PATH_IS_IGNORED)
    }

    /// Compact form such as `AxB_xxX_i`: hash classes for disk, previous and
    /// loadout (`x` = absent), archived flags (`X` = archived), then `I` when
    /// the path is ignored for backups.
    pub fn shorthand(self) -> String {
        let classes = self.shape().classes();
        let archived = self.archived();
        let flag = |mask: u8| if archived & mask != 0 { 'X' } else { 'x' };
        format!(
            "{}_{}{}{}_{}",
            classes,
            flag(0b100),
            flag(0b010),
            flag(0b001),
            if self.is_ignored() { 'I' } else { 'i' }
        )
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.shorthand())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.shorthand())
    }
}

/// Equivalence class of a node's presence and hash equality. The letter code
/// in each doc line lists disk, previous and loadout; equal letters mean equal
/// hashes and `x` means absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `xxx`
    Absent,
    /// `xxA`
    LoadoutOnly,
    /// `xAx`
    PreviousOnly,
    /// `xAA`
    PreviousMatchesLoadout,
    /// `xAB`
    PreviousAndLoadoutDiffer,
    /// `Axx`
    DiskOnly,
    /// `AxA`
    DiskMatchesLoadout,
    /// `AxB`
    DiskAndLoadoutDiffer,
    /// `AAx`
    DiskMatchesPrevious,
    /// `AAA`
    AllMatch,
    /// `AAB`
    LoadoutChanged,
    /// `ABx`
    DiskAndPreviousDiffer,
    /// `ABA`
    PreviousChanged,
    /// `ABB`
    DiskChanged,
    /// `ABC`
    AllDiffer,
}

impl Shape {
    pub fn classes(self) -> &'static str {
        match self {
            Shape::Absent => "xxx",
            Shape::LoadoutOnly => "xxA",
            Shape::PreviousOnly => "xAx",
            Shape::PreviousMatchesLoadout => "xAA",
            Shape::PreviousAndLoadoutDiffer => "xAB",
            Shape::DiskOnly => "Axx",
            Shape::DiskMatchesLoadout => "AxA",
            Shape::DiskAndLoadoutDiffer => "AxB",
            Shape::DiskMatchesPrevious => "AAx",
            Shape::AllMatch => "AAA",
            Shape::LoadoutChanged => "AAB",
            Shape::DiskAndPreviousDiffer => "ABx",
            Shape::PreviousChanged => "ABA",
            Shape::DiskChanged => "ABB",
            Shape::AllDiffer => "ABC",
        }
    }
}

/// Collects the raw observations for one node and folds them into a [`Signature`].
#[derive(Debug, Clone, Default)]
pub struct SignatureBuilder {
    pub disk_hash: Option<Hash>,
    pub prev_hash: Option<Hash>,
    /// `None` when the loadout has no file here. A zero hash also counts as absent.
    pub loadout_hash: Option<Hash>,
    pub disk_archived: bool,
    pub prev_archived: bool,
    pub loadout_archived: bool,
    pub path_is_ignored: bool,
    pub intrinsic_ingests: bool,
}

impl SignatureBuilder {
    pub fn build(&self) -> Signature {
        let loadout = self.loadout_hash.filter(|h| !h.is_zero());
        let mut bits = 0u16;

        if self.disk_hash.is_some() {
            bits |= Signature::DISK_EXISTS;
        }
        if self.prev_hash.is_some() {
            bits |= Signature::PREV_EXISTS;
        }
        if loadout.is_some() {
            bits |= Signature::LOADOUT_EXISTS;
        }
        if both_equal(self.disk_hash, self.prev_hash) {
            bits |= Signature::DISK_EQUALS_PREV;
        }
        if both_equal(self.prev_hash, loadout) {
            bits |= Signature::PREV_EQUALS_LOADOUT;
        }
        if both_equal(self.disk_hash, loadout) {
            bits |= Signature::DISK_EQUALS_LOADOUT;
        }
        if self.disk_hash.is_some() && self.disk_archived {
            bits |= Signature::DISK_ARCHIVED;
        }
        if self.prev_hash.is_some() && self.prev_archived {
            bits |= Signature::PREV_ARCHIVED;
        }
        if loadout.is_some() && self.loadout_archived {
            bits |= Signature::LOADOUT_ARCHIVED;
        }
        if self.path_is_ignored {
            bits |= Signature::PATH_IS_IGNORED;
        }
        if self.intrinsic_ingests {
            bits |= Signature::INTRINSIC_INGESTS;
        }
        Signature(bits)
    }
}

fn both_equal(a: Option<Hash>, b: Option<Hash>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

/// Maps a signature to the actions a node requires.
pub fn map_actions(signature: Signature, source: LoadoutSourceItemType) -> Actions {
    if signature.shape() == Shape::Absent {
        return Actions::DO_NOTHING;
    }
    match source {
        LoadoutSourceItemType::Loadout | LoadoutSourceItemType::Game => map_file(signature),
        LoadoutSourceItemType::Deleted => map_tombstone(signature),
        LoadoutSourceItemType::Intrinsic => map_intrinsic(signature),
    }
}

/// A tombstone keeps the loadout side empty; anything still on disk goes away.
fn map_tombstone(signature: Signature) -> Actions {
    if !signature.has(Signature::DISK_EXISTS) {
        return Actions::DO_NOTHING;
    }
    if signature.has(Signature::DISK_ARCHIVED) {
        Actions::DELETE_FROM_DISK
    } else {
        Action::BackupFile | Action::DeleteFromDisk
    }
}

/// Intrinsic files are regenerated, never backed up or ingested.
fn map_intrinsic(signature: Signature) -> Actions {
    let disk = signature.has(Signature::DISK_EXISTS);
    if !disk {
        return Actions::WRITE_INTRINSIC;
    }
    if signature.has(Signature::DISK_EQUALS_LOADOUT) {
        return Actions::DO_NOTHING;
    }
    let edited_on_disk = !signature.has(Signature::DISK_EQUALS_PREV);
    if edited_on_disk && signature.has(Signature::INTRINSIC_INGESTS) {
        Action::AdaptLoadout | Action::WriteIntrinsic
    } else {
        Actions::WRITE_INTRINSIC
    }
}

fn map_file(signature: Signature) -> Actions {
    file_actions(signature).unwrap_or_else(|| {
        // Combinations no real observation produces (e.g. an archived flag on
        // an absent side). Never guess a destructive action for these.
        tracing::debug!("unmapped signature {}", signature.shorthand());
        Actions::WARN_OF_CONFLICT
    })
}

/// The table proper. `None` for signatures outside it.
fn file_actions(signature: Signature) -> Option<Actions> {
    use Action::*;

    const NOTHING: Actions = Actions::DO_NOTHING;
    const BACKUP: Actions = Actions::BACKUP_FILE;
    const INGEST: Actions = Actions::INGEST_FROM_DISK;
    const DELETE: Actions = Actions::DELETE_FROM_DISK;
    const EXTRACT: Actions = Actions::EXTRACT_TO_DISK;
    const REIFY: Actions = Actions::ADD_REIFIED_DELETE;
    const CANT_EXTRACT: Actions = Actions::WARN_OF_UNABLE_TO_EXTRACT;
    const CONFLICT: Actions = Actions::WARN_OF_CONFLICT;
    const BACKUP_INGEST: Actions = Actions::BACKUP_FILE.with(IngestFromDisk);
    const BACKUP_DELETE: Actions = Actions::BACKUP_FILE.with(DeleteFromDisk);
    const REPLACE: Actions = Actions::DELETE_FROM_DISK.with(ExtractToDisk);
    const BACKUP_REPLACE: Actions = REPLACE.with(BackupFile);

    let ignored = signature.is_ignored();

    // Archived flags are `0bDPL`: disk, previous, loadout.
    let actions = match (signature.shape(), signature.archived(), ignored) {
        (Shape::LoadoutOnly, 0b000, _) => CANT_EXTRACT,
        (Shape::LoadoutOnly, 0b001, _) => EXTRACT,

        (Shape::PreviousOnly, 0b000 | 0b010, _) => NOTHING,

        (Shape::PreviousMatchesLoadout, 0b000, false) => CANT_EXTRACT,
        (Shape::PreviousMatchesLoadout, 0b011, false) => REIFY,
        (Shape::PreviousMatchesLoadout, 0b000 | 0b011, true) => REIFY,

        (Shape::PreviousAndLoadoutDiffer, 0b000 | 0b010, _) => CANT_EXTRACT,
        (Shape::PreviousAndLoadoutDiffer, 0b001 | 0b011, _) => EXTRACT,

        (Shape::DiskOnly, 0b000, false) => BACKUP_INGEST,
        (Shape::DiskOnly, 0b100, false) => INGEST,
        (Shape::DiskOnly, 0b000 | 0b100, true) => INGEST,

        (Shape::DiskMatchesLoadout, 0b000, false) => BACKUP,
        (Shape::DiskMatchesLoadout, 0b101, false) => NOTHING,
        (Shape::DiskMatchesLoadout, 0b000 | 0b101, true) => NOTHING,

        (Shape::DiskAndLoadoutDiffer, 0b000 | 0b001, false) => BACKUP_INGEST,
        (Shape::DiskAndLoadoutDiffer, 0b100 | 0b101, false) => INGEST,
        (Shape::DiskAndLoadoutDiffer, 0b000 | 0b100, true) => BACKUP_INGEST,
        (Shape::DiskAndLoadoutDiffer, 0b001 | 0b101, true) => BACKUP_REPLACE,

        (Shape::DiskMatchesPrevious, 0b000, _) => BACKUP_DELETE,
        (Shape::DiskMatchesPrevious, 0b110, _) => DELETE,

        (Shape::AllMatch, 0b000, false) => BACKUP,
        (Shape::AllMatch, 0b111, false) => NOTHING,
        (Shape::AllMatch, 0b000 | 0b111, true) => NOTHING,

        (Shape::LoadoutChanged, 0b000 | 0b110, _) => CANT_EXTRACT,
        (Shape::LoadoutChanged, 0b001, _) => BACKUP_REPLACE,
        (Shape::LoadoutChanged, 0b111, _) => REPLACE,

        (Shape::DiskAndPreviousDiffer, 0b000 | 0b010, _) => BACKUP_DELETE,
        (Shape::DiskAndPreviousDiffer, 0b100 | 0b110, _) => DELETE,

        (Shape::PreviousChanged, 0b000 | 0b010, false) => BACKUP,
        (Shape::PreviousChanged, 0b101 | 0b111, false) => NOTHING,
        (Shape::PreviousChanged, 0b000 | 0b010 | 0b101 | 0b111, true) => NOTHING,

        (Shape::DiskChanged, 0b000 | 0b011, _) => BACKUP_INGEST,
        (Shape::DiskChanged, 0b100 | 0b111, _) => INGEST,

        (Shape::AllDiffer, 0b000 | 0b010 | 0b101, false) => CONFLICT,
        (Shape::AllDiffer, 0b100, false) => CANT_EXTRACT,
        (Shape::AllDiffer, 0b001 | 0b110 | 0b011, false) => BACKUP_INGEST,
        (Shape::AllDiffer, 0b111, false) => INGEST,
        (Shape::AllDiffer, 0b000, true) => BACKUP_INGEST,
        (Shape::AllDiffer, 0b100 | 0b010 | 0b110, true) => CANT_EXTRACT,
        (Shape::AllDiffer, 0b001 | 0b011, true) => BACKUP_REPLACE,
        (Shape::AllDiffer, 0b101 | 0b111, true) => REPLACE,

        _ => return None,
    };
    Some(actions)
}
