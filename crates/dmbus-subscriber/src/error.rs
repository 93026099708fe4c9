use std::borrow::Cow;

use dmbus::ErrorKind as BusErrorKind;

use rumqttc::v5::ClientError;

/// All possible error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The transport failed to connect, subscribe, or publish.
    Transport,
    /// A notification body is not an array of records with a payload.
    MalformedEnvelope,
    /// A record payload is not valid base64 or does not fit the cipher.
    Encoding,
    /// A record payload does not decrypt to a padded plaintext.
    Decryption,
    /// A topic, a control request, or an unexpected transport event.
    Protocol,
    /// An invalid configuration value.
    Config,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Transport => "Transport",
            Self::MalformedEnvelope => "Malformed Envelope",
            Self::Encoding => "Encoding",
            Self::Decryption => "Decryption",
            Self::Protocol => "Protocol",
            Self::Config => "Config",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// A library error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    info: Cow<'static, str>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.info)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and its information.
    pub fn new(kind: ErrorKind, info: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            info: info.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error information.
    #[must_use]
    pub fn info(&self) -> &str {
        &self.info
    }
}

impl From<dmbus::Error> for Error {
    fn from(e: dmbus::Error) -> Self {
        let kind = match e.kind() {
            BusErrorKind::MalformedEnvelope => ErrorKind::MalformedEnvelope,
            BusErrorKind::Encoding => ErrorKind::Encoding,
            BusErrorKind::Decryption => ErrorKind::Decryption,
            BusErrorKind::InvalidKey | BusErrorKind::InvalidIv => ErrorKind::Config,
            BusErrorKind::Topic | BusErrorKind::Request => ErrorKind::Protocol,
        };
        Self::new(kind, e.description().to_owned())
    }
}

impl From<ClientError> for Error {
    fn from(e: ClientError) -> Self {
        Self::new(ErrorKind::Transport, e.to_string())
    }
}

/// A specialized [`Result`](std::result::Result) type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
