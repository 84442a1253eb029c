use loadout_core::{GameInstallId, GamePath, Hash};

const KEY_SEPARATOR: u8 = 0;

/// Key of a per-installation row: the installation id, a NUL byte, then the
/// row's own key. Rows of one installation sort together.
#[derive(Debug, Clone, Copy)]
pub struct StateKey<'a> {
    pub install: &'a GameInstallId,
    pub suffix: &'a str,
}

impl<'a> StateKey<'a> {
    pub fn new(install: &'a GameInstallId, suffix: &'a str) -> Self {
        Self { install, suffix }
    }

    pub fn for_path(install: &GameInstallId, path: &GamePath) -> Vec<u8> {
        StateKey::new(install, &path.to_string()).to_bytes()
    }

    pub fn for_hash(install: &GameInstallId, hash: &Hash) -> Vec<u8> {
        StateKey::new(install, &hash.to_hex()).to_bytes()
    }

    pub fn prefix_for_install(install: &GameInstallId) -> Vec<u8> {
        let mut prefix = install.to_string().into_bytes();
        prefix.push(KEY_SEPARATOR);
        prefix
    }

    /// Half-open byte range covering every row of `install`.
    pub fn range_for_install(install: &GameInstallId) -> (Vec<u8>, Vec<u8>) {
        let start = Self::prefix_for_install(install);
        let mut end = start.clone();
        if let Some(last) = end.last_mut() {
            *last = KEY_SEPARATOR + 1;
        }
        (start, end)
    }

    pub fn to_bytes(self) -> Vec<u8> {
        let mut key = Self::prefix_for_install(self.install);
        key.extend_from_slice(self.suffix.as_bytes());
        key
    }

    /// The row's own key after the installation prefix.
    pub fn suffix_of(full_key: &[u8]) -> Option<&str> {
        let sep = full_key.iter().position(|b| *b == KEY_SEPARATOR)?;
        std::str::from_utf8(&full_key[sep + 1..]).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_covers_only_one_install() {
        let a = GameInstallId::new();
        let b = GameInstallId::new();
        let (start, end) = StateKey::range_for_install(&a);
        let inside = StateKey::for_path(&a, &GamePath::game("x").unwrap());
        let outside = StateKey::for_path(&b, &GamePath::game("x").unwrap());
        assert!(start <= inside && inside < end);
        assert!(!(start <= outside && outside < end));
        assert_eq!(StateKey::suffix_of(&inside), Some("{Game}/x"));
    }
}
