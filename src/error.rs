//! Error taxonomy.
//!
//! Four localities, matching how a failure is handled at the call site:
//! transport-fatal and protocol-fatal both close the connection (the
//! distinction is only for logging), business errors are turned into an
//! `{status:"error", code}` response body and the connection survives, and
//! internal-invariant failures are logged at error level and treated as
//! transport-fatal for every connection they affect.

use std::fmt;

use thiserror::Error;

/// Closed set of machine-readable codes returned in business error
/// responses. Kept as a flat enum rather than free strings so call sites
/// can't typo a code, and so `Display` is the single place the wire spelling
/// is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    NoUsername,
    NoPassword,
    LoginTaken,
    AlreadyLoggedIn,
    NoSuchUser,
    WrongPassword,
    NotSignedIn,
    NoId,
    NotListening,
    InvalidUser,
    NotSearching,
    BadGameId,
    WrongMove,
    WrongTurn,
    NoMove,
    NotYourGame,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Code::NoUsername => "NO_USERNAME",
            Code::NoPassword => "NO_PASSWORD",
            Code::LoginTaken => "LOGIN_TAKEN",
            Code::AlreadyLoggedIn => "ALREADY_LOGGED_IN",
            Code::NoSuchUser => "NO_SUCH_USER",
            Code::WrongPassword => "WRONG_PASSWORD",
            Code::NotSignedIn => "NOT_SIGNED_IN",
            Code::NoId => "NO_ID",
            Code::NotListening => "NOT_LISTENING",
            Code::InvalidUser => "INVALID_USER",
            Code::NotSearching => "NOT_SEARCHING",
            Code::BadGameId => "BAD_GAME_ID",
            Code::WrongMove => "WRONG_MOVE",
            Code::WrongTurn => "WRONG_TURN",
            Code::NoMove => "NO_MOVE",
            Code::NotYourGame => "NOT_YOUR_GAME",
        };
        f.write_str(s)
    }
}

/// A business failure: the connection is fine, the request wasn't.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct Business(pub Code);

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("malformed frame payload: {0}")]
    Protocol(String),

    #[error(transparent)]
    Business(#[from] Business),

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl Error {
    pub fn business(code: Code) -> Self {
        Error::Business(Business(code))
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// True if this error should close the connection rather than be turned
    /// into a business error response.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Business(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
