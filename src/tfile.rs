//! Line-oriented `.t` test files
//!
//! ```text
//! # comments up to the first blank line belong to the file
//! # meta
//! # owner: ops
//!
//! greeting:
//!   $ echo hello
//!   hello
//!   $ for i in 1 2; do
//!   > echo $i
//!   > done
//!   1
//!   2
//! ```
//!
//! Expected output lines use the same check syntax as code blocks, so
//! `(rc==1)` and `... (has)` work here too.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::code::{Command, StepResult};
use crate::diff;
use crate::error::Error;

const STEP_PREFIX: &str = "  $ ";
const CONTINUATION_PREFIX: &str = "  > ";
const INDENT: &str = "  ";

static META_RE: OnceLock<Regex> = OnceLock::new();
static CASE_RE: OnceLock<Regex> = OnceLock::new();

fn meta_regex() -> &'static Regex {
    META_RE.get_or_init(|| Regex::new(r"^\s*#\s+(.*?):\s*(.*?)$").expect("valid meta pattern"))
}

fn case_regex() -> &'static Regex {
    CASE_RE.get_or_init(|| Regex::new(r"^(\S.*):\s*$").expect("valid case pattern"))
}

/// One section of a rendered step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Expected,
    Actual,
    Diff,
}

/// Parse a mode such as `actual+diff`.
pub fn parse_mode(mode: &str) -> Result<Vec<Section>, Error> {
    mode.split('+')
        .map(|part| match part.trim() {
            "expected" => Ok(Section::Expected),
            "actual" => Ok(Section::Actual),
            "diff" => Ok(Section::Diff),
            other => Err(Error::parse(format!("unknown render section: {:?}", other))),
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestFile {
    pub name: String,
    /// Comment lines of the file header, as written
    pub comments: Vec<String>,
    pub metadata: Vec<(String, String)>,
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestCase {
    pub name: String,
    pub line: usize,
    pub comments: Vec<String>,
    pub metadata: Vec<(String, String)>,
    pub steps: Vec<TestStep>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestStep {
    pub line: usize,
    pub comments: Vec<String>,
    /// First line and continuations, prefixes removed
    pub command: Vec<String>,
    /// Expected output lines, indentation removed
    pub output: Vec<String>,
    /// Filled in once the step has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
}

impl TestStep {
    /// The step as a runnable command
    pub fn to_command(&self) -> Command {
        Command::new("$ ", self.command.clone(), self.output.clone())
    }

    /// Diff of the expected output against the last run, if any
    pub fn diff(&self) -> String {
        match self.result {
            Some(ref r) => diff::unified(&r.command.expected, &r.actual),
            None => String::new(),
        }
    }
}

impl TestCase {
    pub fn passed(&self) -> bool {
        self.steps
            .iter()
            .all(|s| s.result.as_ref().map_or(true, StepResult::passed))
    }
}

#[derive(Default)]
struct Pending {
    comments: Vec<String>,
    metadata: Option<Vec<(String, String)>>,
}

impl Pending {
    fn take(&mut self) -> (Vec<String>, Vec<(String, String)>) {
        let comments = std::mem::take(&mut self.comments);
        let metadata = self.metadata.take().unwrap_or_default();
        (comments, metadata)
    }
}

impl TestFile {
    /// Parse `source`; `name` is used in error locations.
    pub fn parse(name: &str, source: &str) -> Result<TestFile, Error> {
        let mut file = TestFile {
            name: name.to_string(),
            ..Default::default()
        };
        let mut pending = Pending::default();
        let mut header_open = true;

        for (idx, raw) in source.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            let err = |msg: &str| Error::parse(msg).with_location(name, lineno);

            if line.is_empty() {
                if header_open && file.cases.is_empty() {
                    let (comments, metadata) = pending.take();
                    file.comments = comments;
                    file.metadata = metadata;
                    header_open = false;
                }
                continue;
            }

            let step = file.cases.last_mut().and_then(|c| c.steps.last_mut());
            if let Some(step) = step {
                if let Some(rest) = line.strip_prefix(CONTINUATION_PREFIX) {
                    if step.output.is_empty() {
                        step.command.push(rest.to_string());
                        continue;
                    }
                }
                if !line.starts_with(STEP_PREFIX) {
                    if let Some(rest) = line.strip_prefix(INDENT) {
                        step.output.push(rest.to_string());
                        continue;
                    }
                    if line.trim().is_empty() {
                        step.output.push(String::new());
                        continue;
                    }
                }
            }

            if let Some(rest) = line.strip_prefix(STEP_PREFIX) {
                let (comments, _) = pending.take();
                let case = file.cases.last_mut().ok_or_else(|| err("step outside of a test case"))?;
                case.steps.push(TestStep {
                    line: lineno,
                    comments,
                    command: vec![rest.to_string()],
                    ..Default::default()
                });
                continue;
            }
            if line.starts_with(CONTINUATION_PREFIX) {
                return Err(err("continuation without a step"));
            }

            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                if trimmed == "# meta" || trimmed.starts_with("# meta ") {
                    pending.metadata.get_or_insert_with(Vec::new);
                    continue;
                }
                if let Some(ref mut metadata) = pending.metadata {
                    if let Some(caps) = meta_regex().captures(line) {
                        metadata.push((caps[1].to_string(), caps[2].to_string()));
                        continue;
                    }
                }
                pending.comments.push(line.to_string());
                continue;
            }

            if let Some(caps) = case_regex().captures(line) {
                let (comments, metadata) = pending.take();
                header_open = false;
                file.cases.push(TestCase {
                    name: caps[1].trim().to_string(),
                    line: lineno,
                    comments,
                    metadata,
                    steps: Vec::new(),
                });
                continue;
            }

            if line.starts_with(INDENT) {
                return Err(err("output without a step"));
            }
            return Err(err("unrecognized line"));
        }

        if header_open && file.cases.is_empty() {
            let (comments, metadata) = pending.take();
            file.comments = comments;
            file.metadata = metadata;
        }
        Ok(file)
    }

    pub fn steps(&self) -> impl Iterator<Item = &TestStep> {
        self.cases.iter().flat_map(|c| c.steps.iter())
    }

    pub fn passed(&self) -> bool {
        self.cases.iter().all(TestCase::passed)
    }

    /// Re-emit the file, each step followed by the sections of `mode`
    /// (see [`parse_mode`]).
    pub fn render(&self, mode: &str) -> Result<String, Error> {
        let sections = parse_mode(mode)?;
        let mut out = Vec::new();

        out.extend(self.comments.iter().cloned());
        push_metadata(&mut out, &self.metadata);
        if !out.is_empty() {
            out.push(String::new());
        }

        for (i, case) in self.cases.iter().enumerate() {
            if i > 0 {
                out.push(String::new());
            }
            out.extend(case.comments.iter().cloned());
            push_metadata(&mut out, &case.metadata);
            out.push(format!("{}:", case.name));
            for step in &case.steps {
                out.extend(step.comments.iter().cloned());
                for (j, line) in step.command.iter().enumerate() {
                    let prefix = if j == 0 { STEP_PREFIX } else { CONTINUATION_PREFIX };
                    out.push(format!("{}{}", prefix, line));
                }
                for section in &sections {
                    for line in section_lines(step, *section) {
                        out.push(format!("{}{}", INDENT, line));
                    }
                }
            }
        }

        let mut text = out.join("\n");
        text.push('\n');
        Ok(text)
    }
}

fn push_metadata(out: &mut Vec<String>, metadata: &[(String, String)]) {
    if metadata.is_empty() {
        return;
    }
    out.push("# meta".into());
    for (key, value) in metadata {
        out.push(format!("# {}: {}", key, value));
    }
}

fn section_lines(step: &TestStep, section: Section) -> Vec<String> {
    match (section, &step.result) {
        (Section::Expected, _) | (Section::Actual, None) => step.output.clone(),
        (Section::Actual, Some(result)) => {
            let mut lines = result.actual.clone();
            lines.extend(result.command.checkers.iter().map(|c| c.line.clone()));
            lines
        }
        (Section::Diff, _) => step.diff().lines().map(str::to_string).collect(),
    }
}
