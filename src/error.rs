use std::{fmt::Display, result};

pub type Result<T, E = Error> = result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
    /// Resource unreachable, unsupported, or handshake timed out
    Connection(String),
    /// Operation attempted without a live session
    NotConnected(String),
    /// Transport rejected a write
    Write(String),
    /// No completion within the configured timeout
    Timeout(String),
    /// Device returned a reply that did not match the expected kind or format
    Parse(String),
    /// Channel or value argument outside what the model accepts, caught before the bus
    Validation(String),
    /// Read-side transport failure
    Io(std::io::Error),
    /// Model does not define the requested operation
    NotSupported(String),
}
impl Error {
    /// Whether this failure leaves the session in an unknown state.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Write(_) | Error::Timeout(_) | Error::Io(_)
        )
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}
impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Connection(desc) => write!(f, "Connection error: {desc}"),
            Error::NotConnected(desc) => write!(f, "Not connected: {desc}"),
            Error::Write(desc) => write!(f, "Write error: {desc}"),
            Error::Timeout(desc) => write!(f, "Timed out: {desc}"),
            Error::Parse(desc) => write!(f, "Bad response: {desc}"),
            Error::Validation(desc) => write!(f, "Invalid argument: {desc}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::NotSupported(desc) => write!(f, "Not supported: {desc}"),
        }
    }
}
impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_poisoning_follows_error_kind() {
        assert!(Error::Timeout("x".into()).poisons_session());
        assert!(Error::Write("x".into()).poisons_session());
        assert!(!Error::Parse("x".into()).poisons_session());
        assert!(!Error::Validation("x".into()).poisons_session());
        assert!(!Error::NotConnected("x".into()).poisons_session());
    }

    #[test]
    fn display_names_the_failure() {
        let e = Error::Validation("channel 4 out of range 1..=3".into());
        assert_eq!(e.to_string(), "Invalid argument: channel 4 out of range 1..=3");
    }
}
