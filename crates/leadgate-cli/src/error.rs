use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] leadgate_core::ValidationError),

    #[error(transparent)]
    Store(#[from] leadgate_core::StoreError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<leadgate_core::CoreError> for CliError {
    fn from(error: leadgate_core::CoreError) -> Self {
        match error {
            leadgate_core::CoreError::Validation(error) => Self::Validation(error),
            leadgate_core::CoreError::Store(error) => Self::Store(error),
            leadgate_core::CoreError::Serialization(error) => Self::Serialization(error),
        }
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Serialization(_) => 4,
            Self::Store(_) => 6,
            Self::Io(_) => 10,
        }
    }
}
