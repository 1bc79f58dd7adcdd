use std::fmt;

/// Why an authentication step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    NoRefreshToken,
    EmptyTokens,
    Vendor(String),
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::NoRefreshToken => write!(f, "no refresh token stored"),
            AuthFailure::EmptyTokens => write!(f, "access token or refresh token empty"),
            AuthFailure::Vendor(msg) => write!(f, "{msg}"),
        }
    }
}

#[derive(Debug)]
pub enum Error {
    Auth(AuthFailure),
    Fetch(String),
    Set(String),
    AddressNotFound(String),
    Validation(String),
    NotConfigured,
    Transport(String),
    Logging(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl Error {
    pub(crate) fn auth(e: impl fmt::Display) -> Self {
        Error::Auth(AuthFailure::Vendor(e.to_string()))
    }

    pub(crate) fn fetch(e: impl fmt::Display) -> Self {
        Error::Fetch(e.to_string())
    }

    pub(crate) fn validation(e: impl fmt::Display) -> Self {
        Error::Validation(e.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Auth(reason) => write!(f, "authentication error: {reason}"),
            Error::Fetch(msg) => write!(f, "fetch error: {msg}"),
            Error::Set(msg) => write!(f, "set error: {msg}"),
            Error::AddressNotFound(addr) => write!(f, "address not found: {addr}"),
            Error::Validation(msg) => write!(f, "invalid payload: {msg}"),
            Error::NotConfigured => write!(f, "adapter not configured"),
            Error::Transport(msg) => write!(f, "transport error: {msg}"),
            Error::Logging(msg) => write!(f, "logging error: {msg}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
