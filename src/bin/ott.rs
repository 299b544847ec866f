//! ott CLI
//!
//! Replay shell sessions written in markdown and `.t` documents.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ott::{
    Command, FileResult, GuessConfig, Mirror, OutputSpec, PromptStrategy, RunConfig, RunnerHook,
    SessionConfig, StepResult, TestRunner,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ott")]
#[command(version)]
#[command(about = "Run the shell sessions in markdown and .t documents")]
struct Cli {
    /// Documents or directories to run
    #[arg(default_value = ".")]
    paths: Vec<PathBuf>,

    /// Print one character per step instead of the session
    #[arg(short, long)]
    quiet: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Only run documents whose name contains this string
    #[arg(short = 'f', long)]
    filter: Option<String>,

    /// Write a report: FORMAT[:TIMING[:TEMPLATE]], e.g. json or doc:err:{basename}.out.{ext}
    #[arg(short = 'o', long = "output", value_name = "SPEC")]
    outputs: Vec<OutputSpec>,

    /// Shell to run the documents in
    #[arg(long, default_value = ott::DEFAULT_SHELL)]
    shell: String,

    /// Argument passed to the shell (repeatable; replaces the defaults)
    #[arg(long = "shell-arg", allow_hyphen_values = true)]
    shell_args: Vec<String>,

    /// Learn the prompt instead of installing a marker prompt
    #[arg(long = "guess-prompt")]
    guess_prompt: bool,

    /// Run each document in a fresh temporary directory
    #[arg(long)]
    isolate: bool,

    /// Keep the temporary directories
    #[arg(short = 'k', long = "keep")]
    keep: bool,

    /// File extensions to match [default: .md .t]
    #[arg(long = "ext")]
    extensions: Vec<String>,

    /// Show number of documents without running
    #[arg(long = "count")]
    count: bool,

    /// Seconds to wait for the shell to come up
    #[arg(long = "startup-timeout", default_value_t = 10)]
    startup_timeout: u64,
}

impl Cli {
    fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::default()
            .startup_timeout(Duration::from_secs(self.startup_timeout));
        if self.shell != ott::DEFAULT_SHELL || !self.shell_args.is_empty() {
            // `--norc --noprofile` only mean something to bash
            let is_bash = Path::new(&self.shell).file_name().is_some_and(|name| name == "bash");
            let args = if !self.shell_args.is_empty() {
                self.shell_args.clone()
            } else if is_bash && !self.guess_prompt {
                config.args.clone()
            } else {
                Vec::new()
            };
            config = config.command(self.shell.clone(), args);
        }
        if self.guess_prompt {
            config = config.strategy(PromptStrategy::Guess(GuessConfig::default()));
        }
        config
    }

    fn run_config(&self) -> RunConfig {
        let defaults = RunConfig::default();
        RunConfig {
            paths: self.paths.clone(),
            filter: self.filter.clone(),
            extensions: if self.extensions.is_empty() {
                defaults.extensions
            } else {
                self.extensions.clone()
            },
            isolate: self.isolate || self.keep,
            workdir_root: None,
            preserve_work: self.keep,
            verbose: self.verbose,
            session: self.session_config(),
        }
    }
}

/// Live console output
struct Console {
    quiet: bool,
}

impl RunnerHook for Console {
    fn on_file_start(&mut self, file: &Path) {
        println!("== {} ==", file.display());
        if !self.quiet {
            println!();
        }
    }

    fn on_file_end(&mut self, result: &FileResult) {
        if !self.quiet {
            print!("=>");
        }
        println!(" {}", result.summary());
        if let Some(ref err) = result.error {
            println!("   error: {}", err);
        }
        if let Some(ref wd) = result.workdir {
            println!("   workdir: {}", wd.display());
        }
    }

    fn on_block_start(&mut self, name: &str, _line: usize) {
        if !self.quiet && !name.is_empty() {
            println!("{}:", name);
        }
    }

    fn on_step_start(&mut self, command: &Command) {
        if !self.quiet {
            println!("{}", command);
            let _ = std::io::stdout().flush();
        }
    }

    fn on_step_end(&mut self, result: &StepResult) {
        if self.quiet {
            print!("{}", if result.passed() { "." } else { "!" });
            let _ = std::io::stdout().flush();
            return;
        }
        if !result.passed() {
            for line in ott::diff::unified(&result.command.expected, &result.actual).lines() {
                println!("  {}", line);
            }
            for checker in result.failed_checkers() {
                println!("  failed: {} (rc={})", checker.line, result.exit_code);
            }
        }
        println!();
    }

    fn mirror(&mut self) -> Option<Mirror> {
        if self.quiet {
            None
        } else {
            Some(Box::new(std::io::stderr()))
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = std::env::var("OTT_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn write_reports(outputs: &[OutputSpec], result: &FileResult, ts: &chrono::DateTime<chrono::Local>) -> Result<()> {
    for spec in outputs {
        let written = spec
            .write(result, ts)
            .with_context(|| format!("failed to write {} report for {}", spec.format_name, result.file.display()))?;
        if let Some(path) = written {
            tracing::info!(path = %path.display(), "report written");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runner = TestRunner::new(cli.run_config());

    if cli.count {
        return match runner.count_tests() {
            Ok(count) => {
                println!("Found {} document(s)", count);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let ts = chrono::Local::now();
    let mut console = Console { quiet: cli.quiet };
    let result = match runner.run_all(&mut console) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut report_failed = false;
    for file in &result.files {
        if let Err(e) = write_reports(&cli.outputs, file, &ts) {
            eprintln!("error: {:#}", e);
            report_failed = true;
        }
    }

    println!();
    println!("{}", result.summary());

    if result.all_passed() && !report_failed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["ott"]);
        assert_eq!(cli.paths, vec![PathBuf::from(".")]);
        let config = cli.run_config();
        assert_eq!(config.extensions, vec![".md", ".t"]);
        assert_eq!(config.session.program, "bash");
        assert!(matches!(config.session.strategy, PromptStrategy::Marker(_)));
    }

    #[test]
    fn test_cli_shell_and_outputs() {
        let cli = Cli::parse_from([
            "ott",
            "-q",
            "-o",
            "json:err",
            "--shell",
            "python3",
            "--shell-arg",
            "-i",
            "--guess-prompt",
            "docs",
        ]);
        assert!(cli.quiet);
        assert_eq!(cli.outputs.len(), 1);
        let config = cli.run_config();
        assert_eq!(config.session.program, "python3");
        assert_eq!(config.session.args, vec!["-i"]);
        assert!(matches!(config.session.strategy, PromptStrategy::Guess(_)));
    }

    #[test]
    fn test_cli_non_bash_shell_gets_no_bash_flags() {
        let config = Cli::parse_from(["ott", "--shell", "sh"]).session_config();
        assert_eq!(config.program, "sh");
        assert!(config.args.is_empty());

        let config = Cli::parse_from(["ott", "--shell", "/usr/bin/bash"]).session_config();
        assert_eq!(config.program, "/usr/bin/bash");
        assert_eq!(config.args, vec!["--norc", "--noprofile"]);
    }

    #[test]
    fn test_cli_rejects_bad_output() {
        assert!(Cli::try_parse_from(["ott", "-o", "xml"]).is_err());
    }
}
