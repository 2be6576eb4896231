use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The socket could not be created, configured or bound, or a thread could not be spawned.
    #[error("endpoint setup failed: {0}")]
    Setup(#[source] std::io::Error),

    /// Writing a datagram to the socket failed.
    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("endpoint is not running")]
    Closed,

    #[error("message has no receiver address")]
    NoRecipient,

    /// A datagram or payload is not a valid message document.
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unknown message kind `{0}`")]
    UnknownKind(String),

    /// An envelope was decoded as a message type other than the one it carries.
    #[error("message is of kind `{found}`, expected `{expected}`")]
    KindMismatch { expected: String, found: String },

    #[error("message kind `{0}` registered twice")]
    DuplicateKind(String),

    #[error("reassembly failed: {0}")]
    Reassembly(String),

    /// A second request was issued while the first is still awaiting its reply.
    #[error("a request is already awaiting a reply")]
    RequestInFlight,
}

impl Error {
    pub fn reassembly(reason: impl Into<String>) -> Self {
        Self::Reassembly(reason.into())
    }
}
