use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    /// A referenced node does not exist. Maps to HTTP 404.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// A command violated a tree invariant. Maps to HTTP 400.
    #[error("{0}")]
    InvalidCommand(String),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),
}

impl TreeError {
    pub fn missing(what: impl Into<String>) -> Self {
        Self::NodeNotFound(what.into())
    }

    pub fn invalid(why: impl Into<String>) -> Self {
        Self::InvalidCommand(why.into())
    }
}
