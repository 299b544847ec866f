//! End-to-end session tests against a real bash on a pty
//!
//! Skipped when `bash` is not on `PATH`.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ott::{ErrorKind, GuessConfig, PromptStrategy, Session, SessionConfig};

fn on_path(program: &str) -> bool {
    std::env::var_os("PATH").is_some_and(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
}

fn have_bash() -> bool {
    on_path("bash")
}

fn session() -> Option<Session> {
    if !have_bash() {
        eprintln!("bash not found, skipping");
        return None;
    }
    Some(Session::new(SessionConfig::default()).unwrap())
}

fn lines(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

#[test]
fn echo_twice_gives_identical_results() {
    let Some(mut sess) = session() else { return };
    assert_eq!(sess.run_lines(&["echo a"]).unwrap(), (0, lines(&["a"])));
    assert_eq!(sess.run_lines(&["echo a"]).unwrap(), (0, lines(&["a"])));
}

#[test]
fn many_commands_stay_in_sync() {
    let Some(mut sess) = session() else { return };
    for i in 0..100 {
        let cmd = format!("echo line-{}", i);
        let (rc, out) = sess.run_lines(&[cmd]).unwrap();
        assert_eq!((rc, out), (0, vec![format!("line-{}", i)]));
    }
}

#[test]
fn exit_codes_are_decoded() {
    let Some(mut sess) = session() else { return };
    assert_eq!(sess.run_lines(&["false"]).unwrap().0, 1);
    assert_eq!(sess.run_lines(&["bash -c 'exit 127'"]).unwrap(), (127, Vec::new()));
    assert_eq!(sess.run_lines(&["true"]).unwrap(), (0, Vec::new()));
}

#[test]
fn bare_echo_prints_one_empty_line() {
    let Some(mut sess) = session() else { return };
    assert_eq!(sess.run_lines(&["echo"]).unwrap(), (0, lines(&[""])));
    assert_eq!(sess.run_lines(&["printf 'a\\n\\n'"]).unwrap(), (0, lines(&["a", ""])));
}

#[test]
fn syntax_error_is_reported() {
    let Some(mut sess) = session() else { return };
    let (rc, out) = sess.run_lines(&[";"]).unwrap();
    assert_ne!(rc, 0);
    assert!(out.iter().any(|l| l.contains("syntax error")), "{:?}", out);
    assert_eq!(sess.run_lines(&["echo after"]).unwrap(), (0, lines(&["after"])));
}

#[test]
fn multi_line_command() {
    let Some(mut sess) = session() else { return };
    let (rc, out) = sess.run_lines(&["for i in 1 2 3; do", "echo $i", "done"]).unwrap();
    assert_eq!((rc, out), (0, lines(&["1", "2", "3"])));
}

#[test]
fn output_resembling_the_marker_is_kept() {
    let Some(mut sess) = session() else { return };
    let (rc, out) = sess.run_lines(&["printf '%s\\n' '###OT' '###' 'OTT###'"]).unwrap();
    assert_eq!((rc, out), (0, lines(&["###OT", "###", "OTT###"])));
}

#[test]
fn state_persists_between_commands() {
    let Some(mut sess) = session() else { return };
    sess.run_lines(&["X=42; cd /"]).unwrap();
    assert_eq!(sess.run_lines(&["echo $X $PWD"]).unwrap(), (0, lines(&["42 /"])));
}

#[test]
fn exit_poisons_the_session() {
    let Some(mut sess) = session() else { return };
    let err = sess.run("exit").unwrap_err();
    assert!(err.is_fatal(), "{}", err);
    assert!(sess.is_poisoned());
    let again = sess.run("echo a").unwrap_err();
    assert_eq!(again.kind, ErrorKind::Terminated);
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn mirror_sees_command_output() {
    let Some(mut sess) = session() else { return };
    let captured = Captured::default();
    sess.set_mirror(Some(Box::new(captured.clone())));
    sess.run("echo mirrored").unwrap();
    let seen = String::from_utf8_lossy(&captured.0.lock().unwrap()).to_string();
    assert!(seen.contains("mirrored"), "{:?}", seen);
    assert!(!seen.contains("###OTT"), "{:?}", seen);
}

#[test]
fn guessed_prompt() {
    if !have_bash() {
        return;
    }
    let config = SessionConfig::default()
        .env("PS1", "guess> ")
        .strategy(PromptStrategy::Guess(GuessConfig::default()));
    let mut sess = Session::new(config).unwrap();
    let (rc, out) = sess.run_lines(&["echo guessed"]).unwrap();
    assert_eq!(rc, ott::UNKNOWN_EXIT_CODE);
    assert!(out.iter().any(|l| l == "guessed"), "{:?}", out);
}

#[test]
fn startup_without_prompt_times_out() {
    if !on_path("cat") {
        return;
    }
    // cat echoes the sync command but never prints the joined marker
    let config = SessionConfig::default()
        .command("cat", Vec::<String>::new())
        .startup_timeout(Duration::from_millis(500));
    let started = Instant::now();
    let err = match Session::new(config) {
        Ok(_) => panic!("cat never shows a prompt"),
        Err(e) => e,
    };
    assert_eq!(err.kind, ErrorKind::PromptTimeout, "{}", err);
    assert!(err.message.starts_with("prompt wait timeout"), "{}", err.message);
    assert!(started.elapsed() < Duration::from_secs(10));
}
