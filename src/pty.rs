//! Pseudo-terminal transport
//!
//! Spawns the child process on a fresh pty pair, switches the terminal to raw
//! mode and hands out the two halves the session works with: a pollable
//! [`PtySource`] for the reader and a [`PtyWriter`] for commands.

use std::io::{self, Read, Write};
use std::os::fd::{BorrowedFd, RawFd};
use std::path::PathBuf;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, trace};

use crate::error::Error;
use crate::reader::Source;

/// Variables passed through from the parent environment
const INHERITED_ENV: [&str; 2] = ["PATH", "HOME"];

/// What to spawn and how
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Set after the inherited variables, overriding them
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
}

/// A child process attached to a pseudo-terminal
pub struct Pty {
    child: Box<dyn Child + Send + Sync>,
    reaped: bool,
}

/// The readable half of the pty master
pub struct PtySource {
    reader: Box<dyn Read + Send>,
    master: Box<dyn MasterPty + Send>,
    fd: Option<RawFd>,
}

/// The writable half of the pty master
pub struct PtyWriter {
    writer: Box<dyn Write + Send>,
}

impl Pty {
    /// Open a pty of the requested geometry and start the child on it.
    pub fn spawn(spec: &SpawnSpec) -> Result<(Pty, PtySource, PtyWriter), Error> {
        let system = native_pty_system();
        let pair = system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::spawn(format!("failed to open pty: {:#}", e)))?;

        let fd = pair.master.as_raw_fd();
        if let Some(fd) = fd {
            make_raw(fd).map_err(|e| Error::spawn(format!("failed to set raw mode: {}", e)))?;
        }

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        cmd.env_clear();
        for key in INHERITED_ENV {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.env("TERM", "dumb");
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        // portable-pty defaults to the home directory
        if let Some(cwd) = spec.cwd.clone().or_else(|| std::env::current_dir().ok()) {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::spawn(format!("failed to spawn {}: {:#}", spec.program, e)))?;
        drop(pair.slave);
        debug!(program = %spec.program, pid = ?child.process_id(), "spawned");

        let mut pty = Pty { child, reaped: false };
        let reader = match pair.master.try_clone_reader() {
            Ok(r) => r,
            Err(e) => {
                pty.cleanup();
                return Err(Error::spawn(format!("failed to clone pty reader: {:#}", e)));
            }
        };
        let writer = match pair.master.take_writer() {
            Ok(w) => w,
            Err(e) => {
                pty.cleanup();
                return Err(Error::spawn(format!("failed to take pty writer: {:#}", e)));
            }
        };

        let source = PtySource {
            reader,
            master: pair.master,
            fd,
        };
        Ok((pty, source, PtyWriter { writer }))
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Kill and reap the child. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.reaped {
            return;
        }
        self.reaped = true;
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(?status, "child already exited");
            return;
        }
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "kill failed");
        }
        match self.child.wait() {
            Ok(status) => debug!(?status, "child reaped"),
            Err(e) => debug!(error = %e, "wait failed"),
        }
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl PtySource {
    /// Terminal size reported by the pty
    pub fn size(&self) -> Option<PtySize> {
        self.master.get_size().ok()
    }
}

impl Read for PtySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Source for PtySource {
    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        let Some(fd) = self.fd else {
            // No descriptor to poll; let the read block.
            return Ok(true);
        };
        // SAFETY: `fd` belongs to `self.master`, which outlives this borrow.
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        let timeout = match timeout {
            None => PollTimeout::NONE,
            Some(t) => PollTimeout::from(t.as_millis().min(u16::MAX as u128) as u16),
        };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        loop {
            match poll(&mut fds, timeout) {
                Ok(0) => return Ok(false),
                Ok(_) => return Ok(true),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    }
}

impl PtyWriter {
    /// Write all of `data` and flush.
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        trace!(data = %String::from_utf8_lossy(data), "write");
        self.writer.write_all(data).map_err(Error::transport)?;
        self.writer.flush().map_err(Error::transport)
    }
}

/// Put the terminal behind `fd` into raw mode.
///
/// This also clears `ECHO`, so the shell's input is not copied back into the
/// output stream.
fn make_raw(fd: RawFd) -> nix::Result<()> {
    // SAFETY: `fd` is the open pty master held by the caller.
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut termios = tcgetattr(fd)?;
    cfmakeraw(&mut termios);
    tcsetattr(fd, SetArg::TCSANOW, &termios)
}
