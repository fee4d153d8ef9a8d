use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConductorError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Stage `{stage}` failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("Worker terminated abnormally: {0}")]
    WorkerJoin(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ConductorError>;

/// Failures raised by a [`MessageSource`](crate::source::MessageSource).
///
/// An empty receive is not an error; sources report it as `Ok(None)`.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed notification: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("notification is missing `{0}`")]
    MissingField(&'static str),
}

/// Error returned by a reaction stage's `apply`.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
