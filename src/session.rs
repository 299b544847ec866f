//! Interactive shell session
//!
//! A [`Session`] owns one shell running on a pseudo-terminal and turns each
//! command written to it into a [`CommandResult`]. Every `run` first
//! resynchronizes with the shell, so leftovers from an earlier command never
//! leak into the next result.
//!
//! ```rust,ignore
//! let mut session = Session::new(SessionConfig::default())?;
//! let result = session.run("echo a")?;
//! assert_eq!((result.exit_code, result.lines()), (0, vec!["a".to_string()]));
//! ```

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::Error;
use crate::pattern::Marker;
use crate::protocol::{CommandFramer, Mirror};
use crate::pty::{Pty, PtySource, PtyWriter, SpawnSpec};
use crate::reader::{GrowableReader, DEFAULT_BUFFER_SIZE};
use crate::strategy::{prompt_timeout, settle_prompt, sync_progress, PromptStrategy};

/// Shell started when nothing else is configured
pub const DEFAULT_SHELL: &str = "bash";

/// Configuration for a [`Session`]
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Program to spawn
    pub program: String,
    /// Arguments; the defaults skip rc and profile files
    pub args: Vec<String>,
    /// Extra environment, applied after the strategy's variables
    pub env: Vec<(String, String)>,
    /// Working directory (defaults to the current one)
    pub cwd: Option<PathBuf>,
    /// Terminal width
    pub cols: u16,
    /// Terminal height
    pub rows: u16,
    /// Initial read buffer size
    pub buffer_size: usize,
    pub strategy: PromptStrategy,
    /// How long startup may take before giving up
    pub startup_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_SHELL.into(),
            args: vec!["--norc".into(), "--noprofile".into()],
            env: Vec::new(),
            cwd: None,
            cols: 80,
            rows: 24,
            buffer_size: DEFAULT_BUFFER_SIZE,
            strategy: PromptStrategy::default(),
            startup_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Run `program` with `args` instead of the default shell
    pub fn command<I, S>(mut self, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program = program.into();
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn strategy(mut self, strategy: PromptStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    fn spawn_spec(&self) -> SpawnSpec {
        let mut env = self.strategy.env();
        env.extend(self.env.iter().cloned());
        SpawnSpec {
            program: self.program.clone(),
            args: self.args.clone(),
            env,
            cwd: self.cwd.clone(),
            cols: self.cols,
            rows: self.rows,
        }
    }
}

/// Outcome of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Decoded `$?`, or `-1` when unknown
    pub exit_code: i32,
    /// Bytes printed between the two prompts
    pub output: Vec<u8>,
}

impl CommandResult {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Output split into lines, carriage returns dropped. No output means no
    /// lines; a lone newline is one empty line.
    pub fn lines(&self) -> Vec<String> {
        let text = self.text();
        if text.is_empty() {
            return Vec::new();
        }
        let body = text.strip_suffix('\n').unwrap_or(&text);
        body.split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect()
    }
}

enum Mode {
    Marker { sync_command: String, sync: Marker },
    Guess { quiet: Duration, terminator: String },
}

/// A shell on a pseudo-terminal
pub struct Session {
    reader: GrowableReader<PtySource>,
    writer: PtyWriter,
    framer: CommandFramer,
    mode: Mode,
    mirror: Option<Mirror>,
    poisoned: bool,
    pty: Pty,
}

impl Session {
    /// Spawn the shell and wait until it is ready for commands.
    pub fn new(config: SessionConfig) -> Result<Self, Error> {
        config.strategy.validate()?;
        let (pty, source, writer) = Pty::spawn(&config.spawn_spec())?;
        let mut reader = GrowableReader::new(config.buffer_size, source);
        let mut writer = writer;
        let deadline = reader.deadline(config.startup_timeout);

        let (mode, framer) = match config.strategy {
            PromptStrategy::Marker(ref marker) => {
                let sync_command = marker.sync_command();
                let sync = marker.sync_marker();
                writer.send(sync_command.as_bytes())?;
                if reader
                    .read_until_deadline(deadline, |buf, _| sync_progress(&sync, buf))?
                    .is_none()
                {
                    return Err(prompt_timeout("no response to resynchronization"));
                }
                (Mode::Marker { sync_command, sync }, CommandFramer::new(marker))
            }
            PromptStrategy::Guess(ref guess) => {
                let quiet = guess.quiet;
                reader
                    .read_until_quiet(quiet, deadline)?
                    .ok_or_else(|| prompt_timeout("no initial output"))?;
                writer.send(b"\n")?;
                let first = reader
                    .read_until_quiet(quiet, deadline)?
                    .ok_or_else(|| prompt_timeout("no first prompt"))?;
                writer.send(b"\n")?;
                let second = reader
                    .read_until_quiet(quiet, deadline)?
                    .ok_or_else(|| prompt_timeout("no second prompt"))?;
                let prompt = settle_prompt(&first, &second).ok_or_else(|| prompt_timeout("prompt is not stable"))?;
                info!(prompt = %String::from_utf8_lossy(&prompt), "guessed prompt");
                let mode = Mode::Guess {
                    quiet,
                    terminator: guess.terminator.clone(),
                };
                (mode, CommandFramer::without_status(Marker::single(prompt)))
            }
        };
        debug!(pid = ?pty.process_id(), "session ready");

        Ok(Self {
            reader,
            writer,
            framer,
            mode,
            mirror: None,
            poisoned: false,
            pty,
        })
    }

    /// Copy command output to `mirror` while it is produced.
    pub fn set_mirror(&mut self, mirror: Option<Mirror>) {
        self.mirror = mirror;
    }

    /// Whether an earlier transport failure made the session unusable
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Run `command` and wait for the shell to return to its prompt.
    ///
    /// Blocks until the prompt comes back; there is no timeout.
    pub fn run(&mut self, command: &str) -> Result<CommandResult, Error> {
        if self.poisoned {
            return Err(Error::terminated("session is no longer usable"));
        }
        let result = self.exchange(command);
        if let Err(ref e) = result {
            if e.is_fatal() {
                self.poisoned = true;
            }
        }
        result
    }

    /// Run lines as one command; returns the exit code and output lines.
    pub fn run_lines<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<(i32, Vec<String>), Error> {
        let command = lines.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("\n");
        let result = self.run(&command)?;
        Ok((result.exit_code, result.lines()))
    }

    fn exchange(&mut self, command: &str) -> Result<CommandResult, Error> {
        self.reader.reset();
        self.framer.reset();

        let input = match self.mode {
            Mode::Marker { ref sync_command, ref sync } => {
                self.writer.send(sync_command.as_bytes())?;
                self.reader.read_until(|buf, _| sync_progress(sync, buf))?;
                // The empty line reprints the prompt, which opens the frame.
                format!("\n{}\n", command)
            }
            Mode::Guess { quiet, ref terminator } => {
                self.reader.drain(quiet)?;
                format!("\n{}\n{}", command, terminator)
            }
        };

        debug!(command, "run");
        self.writer.send(input.as_bytes())?;
        let framer = &mut self.framer;
        let mirror = &mut self.mirror;
        let payload = self.reader.read_until(|buf, _| framer.step(buf, mirror.as_mut()))?;
        let exit_code = self.framer.exit_code();
        debug!(rc = exit_code, len = payload.len(), "done");

        Ok(CommandResult {
            exit_code,
            output: payload,
        })
    }

    /// Terminate the shell. The session cannot be used afterwards.
    pub fn cleanup(&mut self) {
        self.poisoned = true;
        self.pty.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines() {
        let r = CommandResult {
            exit_code: 0,
            output: b"a\r\nb".to_vec(),
        };
        assert_eq!(r.lines(), vec!["a", "b"]);
        let empty = CommandResult {
            exit_code: 0,
            output: Vec::new(),
        };
        assert!(empty.lines().is_empty());
        let blank = CommandResult {
            exit_code: 0,
            output: b"\n".to_vec(),
        };
        assert_eq!(blank.lines(), vec![""]);
        let trailing = CommandResult {
            exit_code: 0,
            output: b"a\r\n\r\n".to_vec(),
        };
        assert_eq!(trailing.lines(), vec!["a", ""]);
    }

    #[test]
    fn test_spawn_spec_env_order() {
        let config = SessionConfig::default().env("PS1", "custom").cwd("/tmp");
        let spec = config.spawn_spec();
        let ps1: Vec<_> = spec.env.iter().filter(|(k, _)| k == "PS1").collect();
        assert_eq!(ps1.len(), 2);
        assert_eq!(ps1[1].1, "custom");
        assert_eq!(spec.args, vec!["--norc", "--noprofile"]);
        assert_eq!((spec.cols, spec.rows), (80, 24));
    }

    #[test]
    fn test_spawn_failure() {
        let config = SessionConfig::default().command("/nonexistent/ott-shell", Vec::<String>::new());
        let err = Session::new(config).err().unwrap();
        assert_eq!(err.kind, crate::error::ErrorKind::Spawn);
    }
}
