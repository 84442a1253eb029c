use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical root a game path is relative to, e.g. `Game` or `Saves`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(String);

impl LocationId {
    pub const GAME: &'static str = "Game";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn game() -> Self {
        Self(Self::GAME.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path must be relative: {0}")]
    Absolute(String),
    #[error("path escapes its location: {0}")]
    Traversal(String),
    #[error("expected `{{Location}}/relative/path`, got: {0}")]
    MissingLocation(String),
}

/// Standardize separators and strip empty and `.` segments.
/// Rejects absolute paths and any `..` segment.
pub fn normalize_relative(path: &str) -> Result<String, PathError> {
    let unified = path.replace('\\', "/");
    let has_drive = unified.len() >= 2 && unified.as_bytes()[1] == b':';
    if unified.starts_with('/') || has_drive {
        return Err(PathError::Absolute(path.to_string()));
    }

    let mut parts = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathError::Traversal(path.to_string())),
            s => parts.push(s),
        }
    }
    Ok(parts.join("/"))
}

/// A file location inside a game installation: a logical root plus a normalized
/// relative path. The join key across loadout, disk and previous states.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GamePath {
    location: LocationId,
    path: String,
}

impl GamePath {
    pub fn new(location: LocationId, path: &str) -> Result<Self, PathError> {
        Ok(Self {
            location,
            path: normalize_relative(path)?,
        })
    }

    /// Shorthand for a path under the `Game` location.
    pub fn game(path: &str) -> Result<Self, PathError> {
        Self::new(LocationId::game(), path)
    }

    pub fn root(location: LocationId) -> Self {
        Self {
            location,
            path: String::new(),
        }
    }

    pub fn location(&self) -> &LocationId {
        &self.location
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// Lowercase extension including the dot, or an empty string.
    pub fn extension(&self) -> String {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => name[idx..].to_lowercase(),
            _ => String::new(),
        }
    }

    /// Parent directory. The parent of a root is the root itself.
    pub fn parent(&self) -> GamePath {
        let path = match self.path.rfind('/') {
            Some(idx) => self.path[..idx].to_string(),
            None => String::new(),
        };
        Self {
            location: self.location.clone(),
            path,
        }
    }

    pub fn join(&self, relative: &str) -> Result<GamePath, PathError> {
        let tail = normalize_relative(relative)?;
        let path = match (self.path.is_empty(), tail.is_empty()) {
            (true, _) => tail,
            (false, true) => self.path.clone(),
            (false, false) => format!("{}/{}", self.path, tail),
        };
        Ok(Self {
            location: self.location.clone(),
            path,
        })
    }

    /// True when `self` is `base` or lies below it, compared per segment.
    pub fn starts_with(&self, base: &GamePath) -> bool {
        if self.location != base.location {
            return false;
        }
        if base.path.is_empty() {
            return true;
        }
        self.path == base.path
            || (self.path.starts_with(&base.path)
                && self.path.as_bytes().get(base.path.len()) == Some(&b'/'))
    }
}

impl fmt::Display for GamePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}/{}", self.location, self.path)
    }
}

impl FromStr for GamePath {
    type Err = PathError;

    /// Parses `{Location}/relative/path`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('{')
            .ok_or_else(|| PathError::MissingLocation(s.to_string()))?;
        let close = rest
            .find('}')
            .ok_or_else(|| PathError::MissingLocation(s.to_string()))?;
        let location = &rest[..close];
        if location.is_empty() {
            return Err(PathError::MissingLocation(s.to_string()));
        }
        let relative = rest[close + 1..].trim_start_matches(['/', '\\']);
        GamePath::new(LocationId::new(location), relative)
    }
}

impl TryFrom<String> for GamePath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GamePath> for String {
    fn from(value: GamePath) -> Self {
        value.to_string()
    }
}
