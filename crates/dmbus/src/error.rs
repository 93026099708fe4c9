use alloc::borrow::Cow;

use core::fmt;

/// All possible error kinds raised while handling bus data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A topic segment is empty or contains reserved characters.
    Topic,
    /// A control request body could not be encoded.
    Request,
    /// A notification body is not an array of records with a payload.
    MalformedEnvelope,
    /// A payload is not valid base64 or its length does not fit the cipher.
    Encoding,
    /// A decrypted payload does not carry the expected padding.
    Decryption,
    /// The symmetric key has an unsupported length.
    InvalidKey,
    /// The initialization vector has an unsupported length.
    InvalidIv,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Topic => "Topic",
            Self::Request => "Request",
            Self::MalformedEnvelope => "Malformed Envelope",
            Self::Encoding => "Encoding",
            Self::Decryption => "Decryption",
            Self::InvalidKey => "Invalid Key",
            Self::InvalidIv => "Invalid IV",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.description().fmt(f)
    }
}

/// A bus data error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl core::error::Error for Error {}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[must_use]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// A specialized [`Result`](core::result::Result) type for [`Error`].
pub type Result<T> = core::result::Result<T, Error>;
