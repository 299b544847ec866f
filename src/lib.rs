//! ott: literate shell tests over a pseudo-terminal
//!
//! Shell sessions written down in markdown code blocks or `.t` files are
//! replayed in a real interactive shell, and what the shell prints is compared
//! with what the document says it prints.
//!
//! # Overview
//!
//! The shell runs on a pty with its prompt replaced by a marker
//! (`###OTT$?OTT###`). Output is read into a growable buffer and framed
//! between two prompts; the digits between the marker halves are the exit
//! status of the command.
//!
//! ```text
//! ###OTT0OTT###echo hi      <- prompt, then the command
//! hi                        <- command output
//! ###OTT0OTT###             <- next prompt: end of frame, $? = 0
//! ```
//!
//! # Document syntax
//!
//! ````text
//! ## Greeting
//!
//! ```sh
//! $ echo hello
//! hello
//! $ false
//! (rc==1)
//! ```
//! ````
//!
//! # Layers
//!
//! | Module | Role |
//! |--------|------|
//! | `reader` | growable buffer fed from the pty |
//! | `pattern` | fragmented marker matching |
//! | `framer` | start/end anchor framing with safe hold-back |
//! | `protocol` | marker convention and exit-status decoding |
//! | `session` | one shell, one command at a time |
//! | `code`, `markdown`, `tfile` | document formats |
//! | `runner`, `report` | running documents and writing reports |

mod clock;
mod code;
pub mod diff;
mod error;
mod framer;
mod markdown;
mod pattern;
mod protocol;
mod pty;
mod reader;
mod report;
mod runner;
mod session;
mod strategy;
mod tfile;

pub use clock::{Clock, SystemClock};
pub use code::{
    has_code, parse_codes, walk_commands, CheckKind, Checker, Code, Command, RcOp, Shell, StepResult,
    TemplateCommand,
};
pub use error::{Error, ErrorKind};
pub use framer::{FrameObserver, Step, StreamFramer};
pub use markdown::{code_blocks, rewrite, CodeBlock, SHELL_LANGUAGES};
pub use pattern::{AnchorMatch, Marker};
pub use protocol::{
    decode_exit_code, CommandFramer, MarkerConfig, Mirror, DEFAULT_MARKER, DEFAULT_PRE_MARKER, UNKNOWN_EXIT_CODE,
};
pub use pty::{Pty, PtySource, PtyWriter, SpawnSpec};
pub use reader::{GrowableReader, Progress, Source, BUFFER_EXPAND_FACTOR, DEFAULT_BUFFER_SIZE};
pub use report::{Format, OutputSpec, Timing};
pub use runner::{BlockResult, FileResult, RunConfig, RunnerHook, TestResult, TestRunner, TestRunnerBuilder};
pub use session::{CommandResult, Session, SessionConfig, DEFAULT_SHELL};
pub use strategy::{settle_prompt, GuessConfig, PromptStrategy};
pub use tfile::{parse_mode, Section, TestCase, TestFile, TestStep};

// Convenience functions for cargo test integration
pub use runner::{run, run_and_assert};
