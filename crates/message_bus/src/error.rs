use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("another message is still generating: {0}")]
    GenerationInProgress(String),

    #[error("a patch creating a new message must carry a role")]
    MissingRole,

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("a rollback patch must carry a message_id")]
    RollbackWithoutTarget,
}
