//! Command steps inside a code block
//!
//! Line syntax:
//!
//! ```text
//! $ echo hello          command ("# " works too)
//! > continued           continuation of the command above
//! hello                 expected output
//! (rc==0)               exit status check: (rc), (rc==N), (rc!=N), (rc<N), ...
//! /h.llo/ (has)         some output line matches the regex
//! hello (has)           some output line equals the text
//! << ls *.sh            template: its output is parsed as more steps
//! ```

use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Error;
use crate::session::Session;

/// Templates may expand into templates, up to this depth
const MAX_TEMPLATE_DEPTH: usize = 8;

const COMMAND_PREFIXES: [&str; 2] = ["$ ", "# "];
const TEMPLATE_PREFIX: &str = "<< ";
const CONTINUATION_PREFIX: &str = "> ";

/// Anything that can run a command and report `(exit_code, output_lines)`
pub trait Shell {
    fn run_lines(&mut self, lines: &[String]) -> Result<(i32, Vec<String>), Error>;
}

impl Shell for Session {
    fn run_lines(&mut self, lines: &[String]) -> Result<(i32, Vec<String>), Error> {
        Session::run_lines(self, lines)
    }
}

// ──────────────────────────────────────────────
// Checkers
// ──────────────────────────────────────────────

static RC_RE: OnceLock<Regex> = OnceLock::new();

fn rc_regex() -> &'static Regex {
    RC_RE.get_or_init(|| Regex::new(r"\(rc\s*((==|!=|<=|>=|<|>)([0-9]+))?\)$").expect("valid rc pattern"))
}

/// Comparison used by an exit status check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RcOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl RcOp {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "==" => RcOp::Eq,
            "!=" => RcOp::Ne,
            "<" => RcOp::Lt,
            "<=" => RcOp::Le,
            ">" => RcOp::Gt,
            ">=" => RcOp::Ge,
            _ => return None,
        })
    }

    /// `actual OP expected`
    fn holds(self, actual: i32, expected: i32) -> bool {
        match self {
            RcOp::Eq => actual == expected,
            RcOp::Ne => actual != expected,
            RcOp::Lt => actual < expected,
            RcOp::Le => actual <= expected,
            RcOp::Gt => actual > expected,
            RcOp::Ge => actual >= expected,
        }
    }
}

/// What a checker line asserts
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckKind {
    Rc {
        op: RcOp,
        value: i32,
    },
    Has {
        pattern: String,
        #[serde(skip)]
        regex: Option<Regex>,
    },
}

/// A checker parsed from an expected-output line
#[derive(Debug, Clone, Serialize)]
pub struct Checker {
    /// The line as written
    pub line: String,
    #[serde(flatten)]
    pub kind: CheckKind,
}

impl Checker {
    /// Parse a checker line; `None` means the line is plain expected output.
    pub fn parse(line: &str) -> Option<Checker> {
        Self::parse_rc(line).or_else(|| Self::parse_has(line))
    }

    fn parse_rc(line: &str) -> Option<Checker> {
        let caps = rc_regex().captures(line)?;
        let kind = match (caps.get(2), caps.get(3)) {
            (Some(op), Some(value)) => CheckKind::Rc {
                op: RcOp::parse(op.as_str())?,
                value: value.as_str().parse().ok()?,
            },
            _ => CheckKind::Rc { op: RcOp::Eq, value: 0 },
        };
        Some(Checker {
            line: line.to_string(),
            kind,
        })
    }

    fn parse_has(line: &str) -> Option<Checker> {
        let pattern = line.strip_suffix(" (has)")?;
        let regex = match pattern.strip_prefix('/').and_then(|p| p.strip_suffix('/')) {
            Some(re) => match RegexBuilder::new(re).size_limit(1 << 20).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern, error = %e, "invalid (has) regex, treating line as output");
                    return None;
                }
            },
            None => None,
        };
        Some(Checker {
            line: line.to_string(),
            kind: CheckKind::Has {
                pattern: pattern.to_string(),
                regex,
            },
        })
    }

    pub fn is_match(&self, exit_code: i32, actual: &[String]) -> bool {
        match self.kind {
            CheckKind::Rc { op, value } => op.holds(exit_code, value),
            CheckKind::Has { ref regex, ref pattern } => actual.iter().any(|l| match regex {
                Some(re) => re.is_match(l),
                None => l == pattern,
            }),
        }
    }
}

// ──────────────────────────────────────────────
// Steps
// ──────────────────────────────────────────────

/// A command with its expectations
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    /// `"$ "` or `"# "`, kept for rendering
    pub prefix: String,
    /// First line and continuation lines
    pub lines: Vec<String>,
    /// Expected output, trailing empty lines removed
    pub expected: Vec<String>,
    pub checkers: Vec<Checker>,
}

/// A command whose output is more code
#[derive(Debug, Clone, Serialize)]
pub struct TemplateCommand {
    pub lines: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum Code {
    Command(Command),
    Template(TemplateCommand),
}

impl Command {
    pub fn new(prefix: &str, lines: Vec<String>, output: Vec<String>) -> Self {
        let mut expected = Vec::new();
        let mut checkers = Vec::new();
        for line in output {
            match Checker::parse(&line) {
                Some(c) => checkers.push(c),
                None => expected.push(line),
            }
        }
        while expected.last().is_some_and(|l| l.is_empty()) {
            expected.pop();
        }
        Self {
            prefix: prefix.to_string(),
            lines,
            expected,
            checkers,
        }
    }

    /// Source lines of the command itself
    pub fn command_lines(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.lines.len());
        for (i, line) in self.lines.iter().enumerate() {
            let prefix = if i == 0 { self.prefix.as_str() } else { CONTINUATION_PREFIX };
            out.push(format!("{}{}", prefix, line));
        }
        out
    }

    /// Run in `shell` and collect the result.
    pub fn run<S: Shell + ?Sized>(&self, shell: &mut S) -> Result<StepResult, Error> {
        let start = Instant::now();
        let (exit_code, actual) = shell.run_lines(&self.lines)?;
        Ok(StepResult {
            command: self.clone(),
            actual,
            exit_code,
            duration: start.elapsed(),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_lines().join("\n"))
    }
}

/// An executed [`Command`]
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    #[serde(flatten)]
    pub command: Command,
    pub actual: Vec<String>,
    #[serde(rename = "rc")]
    pub exit_code: i32,
    #[serde(skip)]
    pub duration: Duration,
}

impl StepResult {
    /// All checkers hold and, when output is expected, it matches exactly.
    pub fn passed(&self) -> bool {
        if !self.command.checkers.iter().all(|c| c.is_match(self.exit_code, &self.actual)) {
            return false;
        }
        self.command.expected.is_empty() || self.command.expected == self.actual
    }

    /// Checkers that did not hold
    pub fn failed_checkers(&self) -> impl Iterator<Item = &Checker> {
        self.command
            .checkers
            .iter()
            .filter(move |c| !c.is_match(self.exit_code, &self.actual))
    }

    /// The command followed by what it actually printed and its checkers
    pub fn render(&self) -> Vec<String> {
        let mut out = self.command.command_lines();
        out.extend(self.actual.iter().cloned());
        out.extend(self.command.checkers.iter().map(|c| c.line.clone()));
        out
    }
}

// ──────────────────────────────────────────────
// Parsing
// ──────────────────────────────────────────────

fn starter(line: &str) -> Option<&'static str> {
    COMMAND_PREFIXES
        .into_iter()
        .chain([TEMPLATE_PREFIX])
        .find(|p| line.starts_with(p))
}

/// Split code block lines into commands and templates.
///
/// Lines before the first command are ignored. `> ` lines continue a command
/// only while no output line has been seen for it.
pub fn parse_codes<S: AsRef<str>>(lines: &[S]) -> Vec<Code> {
    struct Pending {
        prefix: &'static str,
        lines: Vec<String>,
        output: Vec<String>,
    }

    fn finish(p: Pending, codes: &mut Vec<Code>) {
        if p.prefix == TEMPLATE_PREFIX {
            codes.push(Code::Template(TemplateCommand { lines: p.lines }));
        } else {
            codes.push(Code::Command(Command::new(p.prefix, p.lines, p.output)));
        }
    }

    let mut codes = Vec::new();
    let mut current: Option<Pending> = None;
    for line in lines {
        let line = line.as_ref();
        if let Some(prefix) = starter(line) {
            if let Some(p) = current.take() {
                finish(p, &mut codes);
            }
            current = Some(Pending {
                prefix,
                lines: vec![line[prefix.len()..].to_string()],
                output: Vec::new(),
            });
            continue;
        }
        let Some(ref mut p) = current else {
            continue;
        };
        match line.strip_prefix(CONTINUATION_PREFIX) {
            Some(rest) if p.output.is_empty() => p.lines.push(rest.to_string()),
            _ => p.output.push(line.to_string()),
        }
    }
    if let Some(p) = current {
        finish(p, &mut codes);
    }
    codes
}

/// Whether the lines contain anything runnable
pub fn has_code<S: AsRef<str>>(lines: &[S]) -> bool {
    lines.iter().any(|l| starter(l.as_ref()).is_some())
}

/// Visit every command in `lines`, running templates in `shell` and
/// expanding their output in place.
pub fn walk_commands<S, F>(lines: &[String], shell: &mut S, visit: &mut F) -> Result<(), Error>
where
    S: Shell + ?Sized,
    F: FnMut(&mut S, Command) -> Result<(), Error>,
{
    walk(lines, shell, visit, 0)
}

fn walk<S, F>(lines: &[String], shell: &mut S, visit: &mut F, depth: usize) -> Result<(), Error>
where
    S: Shell + ?Sized,
    F: FnMut(&mut S, Command) -> Result<(), Error>,
{
    for code in parse_codes(lines) {
        match code {
            Code::Command(cmd) => visit(shell, cmd)?,
            Code::Template(t) => {
                if depth >= MAX_TEMPLATE_DEPTH {
                    return Err(Error::parse("template nesting too deep"));
                }
                let (rc, generated) = shell.run_lines(&t.lines)?;
                debug!(rc, lines = generated.len(), "template expanded");
                walk(&generated, shell, visit, depth + 1)?;
            }
        }
    }
    Ok(())
}
