//! Test runner
//!
//! Discovers markdown and `.t` documents, replays each one in its own shell
//! session, and collects per-step results. A [`RunnerHook`] observes the run
//! as it happens.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::code::{has_code, walk_commands, Command, StepResult};
use crate::error::{Error, ErrorKind};
use crate::markdown::{code_blocks, rewrite, CodeBlock};
use crate::protocol::Mirror;
use crate::session::{Session, SessionConfig};
use crate::tfile::TestFile;

/// Configuration for the test runner
pub struct RunConfig {
    /// Files or directories to run
    pub paths: Vec<PathBuf>,
    /// Only run documents whose name contains this string
    pub filter: Option<String>,
    /// File extensions to scan (default: [".md", ".t"])
    pub extensions: Vec<String>,
    /// Run each document in a fresh temporary directory
    pub isolate: bool,
    /// Root directory for temporary working directories
    pub workdir_root: Option<PathBuf>,
    /// Keep working directories after the run
    pub preserve_work: bool,
    /// Print every step, not only failures
    pub verbose: bool,
    /// Shell used for every document
    pub session: SessionConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from("testdata")],
            filter: None,
            extensions: vec![".md".into(), ".t".into()],
            isolate: false,
            workdir_root: None,
            preserve_work: false,
            verbose: false,
            session: SessionConfig::default(),
        }
    }
}

/// Callbacks fired while documents run
pub trait RunnerHook {
    fn on_file_start(&mut self, _file: &Path) {}
    fn on_file_end(&mut self, _result: &FileResult) {}
    /// A code block or `.t` test case is about to run
    fn on_block_start(&mut self, _name: &str, _line: usize) {}
    fn on_step_start(&mut self, _command: &Command) {}
    fn on_step_end(&mut self, _result: &StepResult) {}
    /// Sink for live command output of the next session
    fn mirror(&mut self) -> Option<Mirror> {
        None
    }
}

impl RunnerHook for () {}

/// Steps of one code block or test case
#[derive(Debug, Clone, Serialize)]
pub struct BlockResult {
    pub name: String,
    pub line: usize,
    pub steps: Vec<StepResult>,
}

/// Result of one document
#[derive(Debug, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub blocks: Vec<BlockResult>,
    /// Set when the document could not be run to the end
    pub error: Option<String>,
    #[serde(skip)]
    pub duration: Duration,
    /// Working directory, if kept
    pub workdir: Option<PathBuf>,
    /// The document rewritten with actual output
    #[serde(skip)]
    pub document: Option<String>,
}

impl FileResult {
    fn new(file: &Path) -> Self {
        Self {
            file: file.to_path_buf(),
            blocks: Vec::new(),
            error: None,
            duration: Duration::ZERO,
            workdir: None,
            document: None,
        }
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepResult> {
        self.blocks.iter().flat_map(|b| b.steps.iter())
    }

    pub fn total_count(&self) -> usize {
        self.steps().count()
    }

    pub fn passed_count(&self) -> usize {
        self.steps().filter(|s| s.passed()).count()
    }

    pub fn passed(&self) -> bool {
        self.error.is_none() && self.passed_count() == self.total_count()
    }

    /// `OK (3/3)` or `FAIL (2/3)`
    pub fn summary(&self) -> String {
        format!(
            "{} ({}/{})",
            if self.passed() { "OK" } else { "FAIL" },
            self.passed_count(),
            self.total_count()
        )
    }
}

/// Result of running all documents
#[derive(Debug)]
pub struct TestResult {
    pub files: Vec<FileResult>,
    pub duration: Duration,
}

impl TestResult {
    pub fn all_passed(&self) -> bool {
        self.files.iter().all(FileResult::passed)
    }

    pub fn passed_count(&self) -> usize {
        self.files.iter().filter(|f| f.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.files.len() - self.passed_count()
    }

    pub fn summary(&self) -> String {
        let steps: usize = self.files.iter().map(FileResult::total_count).sum();
        let passed: usize = self.files.iter().map(FileResult::passed_count).sum();
        format!(
            "{} passed, {} failed; {}/{} steps ({}ms)",
            self.passed_count(),
            self.failed_count(),
            passed,
            steps,
            self.duration.as_millis(),
        )
    }
}

/// The test runner
pub struct TestRunner {
    config: RunConfig,
}

impl TestRunner {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Documents to run, in order. Files named explicitly are always kept.
    pub fn discover(&self) -> Result<Vec<PathBuf>, Error> {
        let mut files = Vec::new();
        for path in &self.config.paths {
            if !path.exists() {
                return Err(Error::new(
                    ErrorKind::Io,
                    format!("test path not found: {}", path.display()),
                ));
            }
            if path.is_file() {
                files.push(path.clone());
                continue;
            }
            let mut found = Vec::new();
            self.scan_dir(path, &mut found)?;
            found.sort();
            files.extend(found);
        }
        Ok(files)
    }

    fn scan_dir(&self, dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), Error> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with('.') {
                continue;
            }
            if path.is_dir() {
                self.scan_dir(&path, files)?;
            } else if self.is_test_file(name) && self.matches_filter(&path) {
                files.push(path);
            }
        }
        Ok(())
    }

    fn is_test_file(&self, name: &str) -> bool {
        self.config.extensions.iter().any(|ext| name.ends_with(ext.as_str()))
    }

    fn matches_filter(&self, path: &Path) -> bool {
        match self.config.filter {
            Some(ref filter) => path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|name| name.contains(filter.as_str())),
            None => true,
        }
    }

    /// Number of documents that would run
    pub fn count_tests(&self) -> Result<usize, Error> {
        Ok(self.discover()?.len())
    }

    /// Run every discovered document.
    pub fn run_all(&self, hook: &mut dyn RunnerHook) -> Result<TestResult, Error> {
        let start = Instant::now();
        let files = self.discover()?;
        let mut results = Vec::with_capacity(files.len());
        for file in &files {
            results.push(self.run_one(file, hook));
        }
        Ok(TestResult {
            files: results,
            duration: start.elapsed(),
        })
    }

    /// Run a single document. Failures end up in the result, never as errors.
    pub fn run_one(&self, file: &Path, hook: &mut dyn RunnerHook) -> FileResult {
        let start = Instant::now();
        hook.on_file_start(file);
        let mut result = FileResult::new(file);

        let tmpdir = if self.config.isolate {
            match self.create_workdir(file) {
                Ok(dir) => Some(dir),
                Err(e) => {
                    result.error = Some(format!("failed to create workdir: {}", e));
                    result.duration = start.elapsed();
                    hook.on_file_end(&result);
                    return result;
                }
            }
        } else {
            None
        };

        let mut session_config = self.config.session.clone();
        if let Some(ref dir) = tmpdir {
            session_config = session_config.cwd(dir.path());
        }

        if let Err(e) = self.execute(file, session_config, hook, &mut result) {
            warn!(file = %file.display(), error = %e, "document aborted");
            result.error = Some(e.to_string());
        }

        if let Some(tmpdir) = tmpdir {
            if self.config.preserve_work || !result.passed() {
                let path = tmpdir.path().to_path_buf();
                std::mem::forget(tmpdir); // leak to preserve
                result.workdir = Some(path);
            }
        }

        result.duration = start.elapsed();
        hook.on_file_end(&result);
        result
    }

    fn execute(
        &self,
        file: &Path,
        config: SessionConfig,
        hook: &mut dyn RunnerHook,
        result: &mut FileResult,
    ) -> Result<(), Error> {
        let name = file.to_string_lossy().to_string();
        let source = std::fs::read_to_string(file).map_err(|e| Error::from(e).with_file(&name))?;
        if name.ends_with(".t") {
            let mut doc = TestFile::parse(&name, &source)?;
            run_tfile(&mut doc, config, hook, result)
        } else {
            let blocks = code_blocks(&source).map_err(|e| e.with_file(&name))?;
            run_markdown(&source, &blocks, config, hook, result)
        }
    }

    fn create_workdir(&self, file: &Path) -> Result<tempfile::TempDir, std::io::Error> {
        let stem = file.file_stem().and_then(|s| s.to_str()).unwrap_or("doc");
        let prefix = format!("ott-{}-", stem);
        if let Some(ref root) = self.config.workdir_root {
            std::fs::create_dir_all(root)?;
            tempfile::Builder::new().prefix(&prefix).tempdir_in(root)
        } else {
            tempfile::Builder::new().prefix(&prefix).tempdir()
        }
    }
}

fn start_session(mut config: SessionConfig, hook: &mut dyn RunnerHook) -> Result<Session, Error> {
    if let Some(cwd) = config.cwd.clone() {
        config = config.env("HOME", cwd.to_string_lossy());
    }
    let mut session = Session::new(config)?;
    session.set_mirror(hook.mirror());
    Ok(session)
}

fn run_markdown(
    source: &str,
    blocks: &[CodeBlock],
    config: SessionConfig,
    hook: &mut dyn RunnerHook,
    result: &mut FileResult,
) -> Result<(), Error> {
    let runnable: Vec<&CodeBlock> = blocks.iter().filter(|b| b.is_runnable()).collect();
    if runnable.is_empty() {
        debug!(file = %result.file.display(), "nothing to run");
        return Ok(());
    }
    let mut session = start_session(config, hook)?;
    let mut replacements = Vec::new();

    for block in runnable {
        hook.on_block_start(&block.name, block.line);
        let mut steps = Vec::new();
        let outcome = walk_commands(&block.lines, &mut session, &mut |shell, cmd| {
            hook.on_step_start(&cmd);
            let step = cmd.run(shell)?;
            hook.on_step_end(&step);
            steps.push(step);
            Ok(())
        });

        if outcome.is_ok() {
            let mut lines: Vec<String> = block
                .lines
                .iter()
                .take_while(|l| !has_code(&[l.as_str()]))
                .cloned()
                .collect();
            lines.extend(steps.iter().flat_map(StepResult::render));
            replacements.push((block, lines));
        }
        result.blocks.push(BlockResult {
            name: block.name.clone(),
            line: block.line,
            steps,
        });

        if let Err(e) = outcome {
            let e = e.with_location(result.file.to_string_lossy(), block.line);
            if e.is_fatal() {
                session.cleanup();
                return Err(e);
            }
            warn!(error = %e, "block failed");
            result.error.get_or_insert_with(|| e.to_string());
        }
    }

    session.cleanup();
    result.document = Some(rewrite(source, &replacements));
    Ok(())
}

fn run_tfile(
    doc: &mut TestFile,
    config: SessionConfig,
    hook: &mut dyn RunnerHook,
    result: &mut FileResult,
) -> Result<(), Error> {
    if doc.steps().next().is_none() {
        return Ok(());
    }
    let mut session = start_session(config, hook)?;

    for case in &mut doc.cases {
        hook.on_block_start(&case.name, case.line);
        let mut block = BlockResult {
            name: case.name.clone(),
            line: case.line,
            steps: Vec::new(),
        };
        for step in &mut case.steps {
            let cmd = step.to_command();
            hook.on_step_start(&cmd);
            let outcome = match cmd.run(&mut session) {
                Ok(outcome) => outcome,
                Err(e) => {
                    result.blocks.push(block);
                    session.cleanup();
                    return Err(e.with_location(doc.name.clone(), step.line));
                }
            };
            hook.on_step_end(&outcome);
            step.result = Some(outcome.clone());
            block.steps.push(outcome);
        }
        result.blocks.push(block);
    }

    session.cleanup();
    result.document = Some(doc.render("actual")?);
    Ok(())
}

/// Builder API for convenient test runner construction
pub struct TestRunnerBuilder {
    config: RunConfig,
}

impl TestRunnerBuilder {
    /// Start building a runner for a file or directory
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            config: RunConfig {
                paths: vec![path.into()],
                ..Default::default()
            },
        }
    }

    /// Add another file or directory
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.paths.push(path.into());
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.config.filter = Some(filter.into());
        self
    }

    pub fn extensions(mut self, exts: Vec<String>) -> Self {
        self.config.extensions = exts;
        self
    }

    /// Run every document in its own temporary directory
    pub fn isolate(mut self, isolate: bool) -> Self {
        self.config.isolate = isolate;
        self
    }

    pub fn workdir_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workdir_root = Some(root.into());
        self
    }

    pub fn preserve_work(mut self, preserve: bool) -> Self {
        self.config.preserve_work = preserve;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    pub fn build(self) -> TestRunner {
        TestRunner::new(self.config)
    }

    /// Build and run all documents without a hook
    pub fn run(self) -> Result<TestResult, Error> {
        self.build().run_all(&mut ())
    }
}

/// Convenience function: create a runner builder for a file or directory
pub fn run(path: impl Into<PathBuf>) -> TestRunnerBuilder {
    TestRunnerBuilder::new(path)
}

/// Run documents and integrate with `#[test]` by panicking on failure.
///
/// ```rust,ignore
/// #[test]
/// fn docs() {
///     ott::run_and_assert("testdata");
/// }
/// ```
///
/// `OTT_VERBOSE` prints every step, `OTT_WORK` isolates each document and
/// keeps its working directory.
pub fn run_and_assert(path: impl Into<PathBuf>) {
    let keep = std::env::var("OTT_WORK").is_ok();
    let runner = run(path)
        .verbose(std::env::var("OTT_VERBOSE").is_ok())
        .isolate(keep)
        .preserve_work(keep)
        .build();
    let verbose = runner.config().verbose;

    let result = match runner.run_all(&mut ()) {
        Ok(result) => result,
        Err(e) => panic!("failed to run tests: {}", e),
    };

    for file in &result.files {
        eprintln!("{} {}", file.file.display(), file.summary());
        for step in file.steps() {
            if verbose || !step.passed() {
                print_step(step);
            }
        }
        if let Some(ref err) = file.error {
            eprintln!("  error: {}", err);
        }
        if let Some(ref wd) = file.workdir {
            eprintln!("  workdir: {}", wd.display());
        }
    }

    eprintln!("\n{}", result.summary());

    if !result.all_passed() {
        panic!("{} document(s) failed", result.failed_count());
    }
}

fn print_step(step: &StepResult) {
    let mark = if step.passed() { "PASS" } else { "FAIL" };
    eprintln!("  {}  {}", mark, step.command);
    if step.passed() {
        return;
    }
    for line in crate::diff::unified(&step.command.expected, &step.actual).lines() {
        eprintln!("        {}", line);
    }
    for checker in step.failed_checkers() {
        eprintln!("        failed: {} (rc={})", checker.line, step.exit_code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.md"), "").unwrap();
        fs::write(dir.path().join("a.t"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.md"), "").unwrap();
        fs::create_dir(dir.path().join(".hidden")).unwrap();
        fs::write(dir.path().join(".hidden/d.md"), "").unwrap();

        let runner = run(dir.path()).build();
        let names: Vec<_> = runner
            .discover()
            .unwrap()
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.t", "b.md", "sub/c.md"]);

        let filtered = run(dir.path()).filter("b").build();
        assert_eq!(filtered.count_tests().unwrap(), 1);
    }

    #[test]
    fn test_missing_path() {
        let err = run("/nonexistent/ott-docs").build().discover().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
    }

    #[test]
    fn test_document_without_code_passes() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("prose.md");
        fs::write(&doc, "# Prose\n\n```rust\nfn main() {}\n```\n").unwrap();
        let result = run(&doc).run().unwrap();
        assert!(result.all_passed());
        assert_eq!(result.files[0].summary(), "OK (0/0)");
    }

    #[test]
    fn test_parse_error_fails_document() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("broken.t");
        fs::write(&doc, "  $ echo orphan\n").unwrap();
        let result = run(&doc).run().unwrap();
        assert!(!result.all_passed());
        let error = result.files[0].error.as_deref().unwrap();
        assert!(error.ends_with("1: step outside of a test case"), "{}", error);
    }

    #[test]
    fn test_summary() {
        let mut file = FileResult::new(Path::new("x.md"));
        assert_eq!(file.summary(), "OK (0/0)");
        file.error = Some("boom".into());
        assert_eq!(file.summary(), "FAIL (0/0)");
    }
}
