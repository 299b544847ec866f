//! Session and runner errors

use std::fmt;

/// The kind of error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The pseudo-terminal or the shell process could not be started
    Spawn,
    /// The startup resynchronization was not observed before the deadline
    PromptTimeout,
    /// Read or write failure on a live pseudo-terminal
    Transport,
    /// The pseudo-terminal reached end-of-stream (child exited)
    Terminated,
    /// Invalid test document syntax
    Parse,
    /// Writing a report file failed
    Output,
    /// Other IO error
    Io,
}

/// An error with optional file/line context
#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_location(mut self, file: impl Into<String>, line: usize) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Spawn, msg)
    }

    pub fn transport(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Transport, err.to_string())
    }

    pub fn terminated(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Terminated, msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, msg)
    }

    /// Whether the session that produced this error must be discarded.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Spawn | ErrorKind::PromptTimeout | ErrorKind::Transport | ErrorKind::Terminated
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:", file)?;
        }
        if let Some(line) = self.line {
            write!(f, "{}:", line)?;
        }
        if self.file.is_some() || self.line.is_some() {
            write!(f, " ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let err = Error::parse("unexpected continuation").with_location("a.t", 3);
        assert_eq!(err.to_string(), "a.t:3: unexpected continuation");
    }

    #[test]
    fn test_display_bare() {
        let err = Error::new(ErrorKind::PromptTimeout, "prompt wait timeout");
        assert_eq!(err.to_string(), "prompt wait timeout");
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(Error::terminated("eof").is_fatal());
        assert!(Error::transport(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).is_fatal());
        assert!(!Error::parse("x").is_fatal());
    }
}
