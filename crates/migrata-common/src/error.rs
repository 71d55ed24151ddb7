use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The two operations every migration unit exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Apply,
    Revert,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Apply => "apply",
            Direction::Revert => "revert",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid migration name: {0:?} contains no usable characters")]
    InvalidName(String),

    #[error("migration {0} already exists")]
    DuplicateIdentifier(String),

    #[error("migration {identifier} is missing its {operation} operation")]
    MissingExport {
        identifier: String,
        operation: Direction,
    },

    #[error("failed to load migration {identifier}: {reason}")]
    Load { identifier: String, reason: String },

    #[error("failed to probe migration ledger: {0}")]
    SchemaProbe(String),

    #[error("{direction} of {identifier} failed: {source}")]
    Operation {
        identifier: String,
        direction: Direction,
        #[source]
        source: Box<Error>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("no such table: {0}")]
    MissingTable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a failure raised by a unit's own apply or revert operation.
    pub fn operation(identifier: impl Into<String>, direction: Direction, source: Error) -> Self {
        Error::Operation {
            identifier: identifier.into(),
            direction,
            source: Box::new(source),
        }
    }

    /// Identifier of the unit this error is attributable to, if any.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Error::DuplicateIdentifier(id) => Some(id),
            Error::MissingExport { identifier, .. }
            | Error::Load { identifier, .. }
            | Error::Operation { identifier, .. } => Some(identifier),
            _ => None,
        }
    }
}
