/// Result alias that carries the crate-wide [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A filter refused to open the track. The chain has already rolled back
    /// every filter opened before it.
    #[error("filter `{filter}` failed to open: {source}")]
    OpenFailure {
        filter: String,
        #[source]
        source: Box<Error>,
    },
    /// The playback engine reported an asynchronous processing error.
    #[error("engine fault (code {0})")]
    EngineFault(i32),
    /// The capture device could not be created, configured or started.
    #[error("record setup failed: {0}")]
    RecordSetupFailure(String),
    /// The playback engine rejected a request synchronously.
    #[error("engine: {0}")]
    Engine(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The owner context has shut down and no longer accepts commands.
    #[error("owner context is gone")]
    Disconnected,
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Creates an [`Error::Engine`] from any displayable cause.
    pub fn engine<T: std::fmt::Display>(cause: T) -> Self {
        Self::Engine(cause.to_string())
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl<T> From<crossbeam_channel::SendError<T>> for Error {
    fn from(_: crossbeam_channel::SendError<T>) -> Self {
        Self::Disconnected
    }
}

impl From<crossbeam_channel::RecvError> for Error {
    fn from(_: crossbeam_channel::RecvError) -> Self {
        Self::Disconnected
    }
}
