#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("loadout database is not a loadout store or is corrupt")]
    Corrupt,
    #[error("loadout database uses schema {found}, this build supports up to {supported}")]
    NewerSchema { found: u32, supported: u32 },
    #[error("loadout database is held by another process")]
    DatabaseAlreadyOpen,
    #[error("database handle cache lock poisoned")]
    Poisoned,
    #[error("malformed key in table {table}: {key}")]
    MalformedKey { table: &'static str, key: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("row codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("redb error: {0}")]
    Backend(Box<redb::Error>),
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Corrupt,
    NewerSchema,
    /// Another handle owns the database; retrying later may succeed.
    Busy,
    /// A stored row or key could not be read back.
    Codec,
    Io,
    Backend,
}

impl StorageError {
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            StorageError::Corrupt => StorageErrorKind::Corrupt,
            StorageError::NewerSchema { .. } => StorageErrorKind::NewerSchema,
            StorageError::DatabaseAlreadyOpen | StorageError::Poisoned => StorageErrorKind::Busy,
            StorageError::MalformedKey { .. } | StorageError::Codec(_) => StorageErrorKind::Codec,
            StorageError::Io(_) => StorageErrorKind::Io,
            StorageError::Backend(_) => StorageErrorKind::Backend,
        }
    }
}

macro_rules! backend_error {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for StorageError {
                fn from(value: $source) -> Self {
                    Self::Backend(Box::new(value.into()))
                }
            }
        )*
    };
}

backend_error!(
    redb::Error,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl From<redb::DatabaseError> for StorageError {
    fn from(value: redb::DatabaseError) -> Self {
        match value {
            redb::DatabaseError::DatabaseAlreadyOpen => Self::DatabaseAlreadyOpen,
            other => Self::Backend(Box::new(other.into())),
        }
    }
}
