use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A single kind of work a synchronization pass can perform on a path.
///
/// The discriminant order is the global execution order: every node's
/// `BackupFile` runs before any node's `IngestFromDisk`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Action {
    DoNothing = 0,
    BackupFile = 1,
    IngestFromDisk = 2,
    AdaptLoadout = 3,
    DeleteFromDisk = 4,
    ExtractToDisk = 5,
    WriteIntrinsic = 6,
    AddReifiedDelete = 7,
    WarnOfUnableToExtract = 8,
    WarnOfConflict = 9,
}

impl Action {
    /// All actions, in execution order.
    pub const IN_ORDER: [Action; 10] = [
        Action::DoNothing,
        Action::BackupFile,
        Action::IngestFromDisk,
        Action::AdaptLoadout,
        Action::DeleteFromDisk,
        Action::ExtractToDisk,
        Action::WriteIntrinsic,
        Action::AddReifiedDelete,
        Action::WarnOfUnableToExtract,
        Action::WarnOfConflict,
    ];

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::DoNothing => "DoNothing",
            Action::BackupFile => "BackupFile",
            Action::IngestFromDisk => "IngestFromDisk",
            Action::AdaptLoadout => "AdaptLoadout",
            Action::DeleteFromDisk => "DeleteFromDisk",
            Action::ExtractToDisk => "ExtractToDisk",
            Action::WriteIntrinsic => "WriteIntrinsic",
            Action::AddReifiedDelete => "AddReifiedDelete",
            Action::WarnOfUnableToExtract => "WarnOfUnableToExtract",
            Action::WarnOfConflict => "WarnOfConflict",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-size set of [`Action`]s. Iteration always follows [`Action::IN_ORDER`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Actions(u16);

impl Actions {
    /// The empty set. Nodes are never left empty after mapping; they get `DO_NOTHING`.
    pub const EMPTY: Actions = Actions(0);
    pub const DO_NOTHING: Actions = Actions::of(Action::DoNothing);
    pub const BACKUP_FILE: Actions = Actions::of(Action::BackupFile);
    pub const INGEST_FROM_DISK: Actions = Actions::of(Action::IngestFromDisk);
    pub const ADAPT_LOADOUT: Actions = Actions::of(Action::AdaptLoadout);
    pub const DELETE_FROM_DISK: Actions = Actions::of(Action::DeleteFromDisk);
    pub const EXTRACT_TO_DISK: Actions = Actions::of(Action::ExtractToDisk);
    pub const WRITE_INTRINSIC: Actions = Actions::of(Action::WriteIntrinsic);
    pub const ADD_REIFIED_DELETE: Actions = Actions::of(Action::AddReifiedDelete);
    pub const WARN_OF_UNABLE_TO_EXTRACT: Actions = Actions::of(Action::WarnOfUnableToExtract);
    pub const WARN_OF_CONFLICT: Actions = Actions::of(Action::WarnOfConflict);

    pub const fn of(action: Action) -> Self {
        Self(action.bit())
    }

    pub const fn with(self, action: Action) -> Self {
        Self(self.0 | action.bit())
    }

    pub const fn union(self, other: Actions) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn insert(&mut self, action: Action) {
        self.0 |= action.bit();
    }

    pub fn remove(&mut self, action: Action) {
        self.0 &= !action.bit();
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when nothing but `DoNothing` (or nothing at all) is set.
    pub fn is_noop(self) -> bool {
        self.0 & !Action::DoNothing.bit() == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Action> {
        Action::IN_ORDER
            .into_iter()
            .filter(move |action| self.contains(*action))
    }
}

impl BitOr for Actions {
    type Output = Actions;

    fn bitor(self, rhs: Actions) -> Actions {
        self.union(rhs)
    }
}

impl BitOr<Action> for Actions {
    type Output = Actions;

    fn bitor(self, rhs: Action) -> Actions {
        self.with(rhs)
    }
}

impl BitOr for Action {
    type Output = Actions;

    fn bitor(self, rhs: Action) -> Actions {
        Actions::of(self).with(rhs)
    }
}

impl BitOrAssign for Actions {
    fn bitor_assign(&mut self, rhs: Actions) {
        self.0 |= rhs.0;
    }
}

impl From<Action> for Actions {
    fn from(action: Action) -> Self {
        Actions::of(action)
    }
}

impl FromIterator<Action> for Actions {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        iter.into_iter().fold(Actions::EMPTY, Actions::with)
    }
}

impl fmt::Debug for Actions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Actions({self})")
    }
}

impl fmt::Display for Actions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let mut first = true;
        for action in self.iter() {
            if !first {
                f.write_str(" | ")?;
            }
            f.write_str(action.name())?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_in_global_order_regardless_of_insertion() {
        let actions = Action::ExtractToDisk | Action::BackupFile;
        let actions = actions | Action::DeleteFromDisk;
        let order: Vec<_> = actions.iter().collect();
        assert_eq!(
            order,
            vec![
                Action::BackupFile,
                Action::DeleteFromDisk,
                Action::ExtractToDisk
            ]
        );
        assert_eq!(actions.to_string(), "BackupFile | DeleteFromDisk | ExtractToDisk");
    }

    #[test]
    fn do_nothing_is_a_noop() {
        assert!(Actions::DO_NOTHING.is_noop());
        assert!(Actions::EMPTY.is_noop());
        assert!(!Actions::EXTRACT_TO_DISK.is_noop());
        let mut a = Actions::DO_NOTHING;
        a.insert(Action::WarnOfConflict);
        a.remove(Action::DoNothing);
        assert_eq!(a, Actions::WARN_OF_CONFLICT);
    }
}
