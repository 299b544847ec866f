//! Prompt strategies
//!
//! A shell whose prompt can be set up front uses the marker convention. A
//! REPL whose prompt is fixed (a Python interpreter, say) gets its prompt
//! guessed instead: two empty lines are sent and the two prompts echoed back
//! must agree.

use std::time::Duration;

use crate::error::{Error, ErrorKind};
use crate::pattern::Marker;
use crate::protocol::MarkerConfig;
use crate::reader::Progress;

/// How a session recognizes the end of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptStrategy {
    /// Install a marker prompt through `PS1`
    Marker(MarkerConfig),
    /// Learn whatever prompt the child prints
    Guess(GuessConfig),
}

impl Default for PromptStrategy {
    fn default() -> Self {
        PromptStrategy::Marker(MarkerConfig::default())
    }
}

impl PromptStrategy {
    /// Environment variables the child needs for this strategy
    pub fn env(&self) -> Vec<(String, String)> {
        match self {
            PromptStrategy::Marker(config) => config.env(),
            PromptStrategy::Guess(_) => Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        match self {
            PromptStrategy::Marker(config) => config.validate().map_err(Error::spawn),
            PromptStrategy::Guess(config) if config.quiet.is_zero() => {
                Err(Error::spawn("quiet period must be positive"))
            }
            PromptStrategy::Guess(_) => Ok(()),
        }
    }
}

/// Settings for prompt guessing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuessConfig {
    /// Output is considered settled after this much silence
    pub quiet: Duration,
    /// Sent after every command. The default empty line closes an open
    /// block in REPLs that need one.
    pub terminator: String,
}

impl Default for GuessConfig {
    fn default() -> Self {
        Self {
            quiet: Duration::from_millis(100),
            terminator: "\n".into(),
        }
    }
}

/// Accept a prompt if both echoes agree once line breaks are trimmed.
pub fn settle_prompt(first: &[u8], second: &[u8]) -> Option<Vec<u8>> {
    let first = trim_line_breaks(first);
    let second = trim_line_breaks(second);
    if first.is_empty() || first != second {
        return None;
    }
    Some(first.to_vec())
}

fn trim_line_breaks(mut bytes: &[u8]) -> &[u8] {
    while let [b'\r' | b'\n', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b'\r' | b'\n'] = bytes {
        bytes = rest;
    }
    bytes
}

/// Reader predicate that completes once `sync` is fully present.
pub fn sync_progress(sync: &Marker, buf: &[u8]) -> Progress {
    match sync.locate(buf, 0) {
        Some(m) => Progress::Done {
            consumed: m.end(),
            payload: m.start()..m.start(),
        },
        None => Progress::Pending,
    }
}

pub(crate) fn prompt_timeout(detail: &str) -> Error {
    Error::new(ErrorKind::PromptTimeout, format!("prompt wait timeout: {}", detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_prompt() {
        assert_eq!(settle_prompt(b"\r\n>>> ", b">>> "), Some(b">>> ".to_vec()));
        assert_eq!(settle_prompt(b"sh-5.2$ ", b"sh-5.2$ \r\n"), Some(b"sh-5.2$ ".to_vec()));
        assert_eq!(settle_prompt(b">>> ", b"... "), None);
        assert_eq!(settle_prompt(b"\r\n", b"\r\n"), None);
    }

    #[test]
    fn test_sync_progress() {
        let sync = MarkerConfig::default().sync_marker();
        assert_eq!(sync_progress(&sync, b"banner###OTT-PRE-OTT###"), Progress::Pending);
        assert_eq!(
            sync_progress(&sync, b"banner###OTT-PRE-OTT######OTT0OTT###"),
            Progress::Done { consumed: 36, payload: 6..6 }
        );
    }

    #[test]
    fn test_strategy_env() {
        let env = PromptStrategy::default().env();
        assert!(env.iter().any(|(k, v)| k == "PS1" && v == "###OTT$?OTT###"));
        assert!(PromptStrategy::Guess(GuessConfig::default()).env().is_empty());
    }

    #[test]
    fn test_validate_guess() {
        let zero = GuessConfig {
            quiet: Duration::ZERO,
            ..Default::default()
        };
        assert!(PromptStrategy::Guess(zero).validate().is_err());
        assert!(PromptStrategy::default().validate().is_ok());
    }
}
