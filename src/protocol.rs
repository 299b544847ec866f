//! Prompt-marker protocol
//!
//! The shell prompt is set to `###OTT<$?>OTT###`, so every prompt it prints
//! doubles as a frame boundary carrying the exit status of the command that
//! just finished. [`CommandFramer`] frames one command's output between two
//! prompts and decodes that status.

use std::io::Write;

use tracing::{trace, warn};

use crate::framer::{FrameObserver, Step, StreamFramer};
use crate::pattern::{AnchorMatch, Marker};
use crate::reader::Progress;

/// Default marker fragments, printed around `$?` by the prompt
pub const DEFAULT_MARKER: [&str; 2] = ["###OTT", "OTT###"];

/// Default pre-synchronization marker
pub const DEFAULT_PRE_MARKER: &str = "###OTT-PRE-OTT###";

/// Exit code reported when the prompt body is not a decimal integer
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Marker convention for prompt-configurable shells
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerConfig {
    /// Fragments of the prompt marker; `$?` is printed between the two halves
    pub fragments: Vec<String>,
    /// Printed by the resynchronization command. Must not contain quotes,
    /// `$`, backslashes or backticks.
    pub pre_marker: String,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            fragments: DEFAULT_MARKER.iter().map(|s| s.to_string()).collect(),
            pre_marker: DEFAULT_PRE_MARKER.to_string(),
        }
    }
}

impl MarkerConfig {
    pub fn marker(&self) -> Marker {
        Marker::new(self.fragments.iter().map(|f| f.as_bytes().to_vec()))
    }

    /// Index of the fragment gap that holds `$?`
    fn status_gap(&self) -> usize {
        (self.fragments.len() / 2).saturating_sub(1)
    }

    /// The `PS1` value: the marker with `$?` between its two halves.
    pub fn ps1(&self) -> String {
        let split = self.status_gap() + 1;
        let split = split.min(self.fragments.len());
        format!(
            "{}$?{}",
            self.fragments[..split].concat(),
            self.fragments[split..].concat()
        )
    }

    /// Environment that installs the prompt convention
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("PS1".into(), self.ps1()),
            ("PS2".into(), String::new()),
            ("HISTFILE".into(), "/dev/null".into()),
        ]
    }

    /// Shell line that prints the pre-marker and leaves `$?` untouched.
    ///
    /// The pre-marker is printed as two separate words, so the contiguous
    /// pre-marker only ever shows up in the command's output, never in an echo
    /// of the command line itself.
    pub fn sync_command(&self) -> String {
        let mut mid = self.pre_marker.len() / 2;
        while !self.pre_marker.is_char_boundary(mid) {
            mid += 1;
        }
        let (head, tail) = self.pre_marker.split_at(mid);
        format!("eval \"printf '%s%s' '{}' '{}'; (exit $?)\"\n", head, tail)
    }

    /// The pre-marker followed by the prompt printed right after it
    pub fn sync_marker(&self) -> Marker {
        let mut fragments = vec![self.pre_marker.as_bytes().to_vec()];
        fragments.extend(self.fragments.iter().map(|f| f.as_bytes().to_vec()));
        Marker::new(fragments)
    }

    /// Rejects pre-markers that cannot be embedded in [`sync_command`](Self::sync_command).
    pub fn validate(&self) -> Result<(), String> {
        if self.fragments.is_empty() || self.fragments.iter().any(|f| f.is_empty()) {
            return Err("marker needs at least one non-empty fragment".into());
        }
        if self.pre_marker.is_empty() {
            return Err("pre-marker must not be empty".into());
        }
        if let Some(c) = self.pre_marker.chars().find(|c| "'\"$\\`\n".contains(*c)) {
            return Err(format!("pre-marker must not contain {:?}", c));
        }
        Ok(())
    }
}

/// Decode the exit status between the two halves of an end anchor.
pub fn decode_exit_code(buf: &[u8], anchor: &AnchorMatch, gap: usize) -> i32 {
    let Some(range) = anchor.gap(gap) else {
        return UNKNOWN_EXIT_CODE;
    };
    let body = &buf[range];
    match std::str::from_utf8(body).ok().and_then(|s| s.trim().parse::<i32>().ok()) {
        Some(rc) => rc,
        None => {
            warn!(body = %String::from_utf8_lossy(body), "prompt carries no exit status");
            UNKNOWN_EXIT_CODE
        }
    }
}

/// Optional live copy of command output
pub type Mirror = Box<dyn Write + Send>;

/// Frames one command between two prompts and decodes its exit status.
pub struct CommandFramer {
    framer: StreamFramer,
    status_gap: Option<usize>,
    exit_code: i32,
}

impl CommandFramer {
    /// Frame with the prompt marker of `config`.
    pub fn new(config: &MarkerConfig) -> Self {
        let marker = config.marker();
        Self {
            framer: StreamFramer::new(marker.clone(), marker),
            status_gap: Some(config.status_gap()),
            exit_code: UNKNOWN_EXIT_CODE,
        }
    }

    /// Frame with a prompt that carries no exit status.
    pub fn without_status(prompt: Marker) -> Self {
        Self {
            framer: StreamFramer::new(prompt.clone(), prompt),
            status_gap: None,
            exit_code: UNKNOWN_EXIT_CODE,
        }
    }

    pub fn reset(&mut self) {
        self.framer.reset();
        self.exit_code = UNKNOWN_EXIT_CODE;
    }

    /// Exit status decoded from the last completed frame
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// One framing step, shaped as a reader predicate.
    pub fn step(&mut self, buf: &[u8], mirror: Option<&mut Mirror>) -> Progress {
        let mut observer = Decoder {
            mirror,
            status_gap: self.status_gap,
            exit_code: UNKNOWN_EXIT_CODE,
            decoded: false,
        };
        match self.framer.step(buf, &mut observer) {
            Step::Pending { .. } => Progress::Pending,
            Step::Complete { payload, end } => {
                if observer.decoded {
                    self.exit_code = observer.exit_code;
                }
                trace!(rc = self.exit_code, len = payload.len(), "frame complete");
                Progress::Done {
                    consumed: end.end(),
                    payload,
                }
            }
        }
    }
}

struct Decoder<'a> {
    mirror: Option<&'a mut Mirror>,
    status_gap: Option<usize>,
    exit_code: i32,
    decoded: bool,
}

impl FrameObserver for Decoder<'_> {
    fn on_data(&mut self, data: &[u8]) {
        if let Some(mirror) = self.mirror.as_mut() {
            if let Err(e) = mirror.write_all(data).and_then(|_| mirror.flush()) {
                warn!(error = %e, "mirror write failed");
            }
        }
    }

    fn on_end_anchor(&mut self, buf: &[u8], anchor: &AnchorMatch) {
        self.decoded = true;
        self.exit_code = match self.status_gap {
            Some(gap) => decode_exit_code(buf, anchor, gap),
            None => UNKNOWN_EXIT_CODE,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn run(framer: &mut CommandFramer, data: &[u8]) -> Option<Vec<u8>> {
        match framer.step(data, None) {
            Progress::Done { payload, .. } => Some(data[payload].to_vec()),
            Progress::Pending => None,
        }
    }

    #[test]
    fn test_ps1_and_env() {
        let config = MarkerConfig::default();
        assert_eq!(config.ps1(), "###OTT$?OTT###");
        let env = config.env();
        assert!(env.contains(&("PS2".to_string(), String::new())));
        assert!(env.contains(&("HISTFILE".to_string(), "/dev/null".to_string())));
    }

    #[test]
    fn test_sync_command_splits_pre_marker() {
        let config = MarkerConfig::default();
        let cmd = config.sync_command();
        assert_eq!(cmd, "eval \"printf '%s%s' '###OTT-P' 'RE-OTT###'; (exit $?)\"\n");
        assert!(!cmd.contains(DEFAULT_PRE_MARKER));
    }

    #[test]
    fn test_sync_marker_includes_prompt() {
        let m = MarkerConfig::default().sync_marker();
        assert!(m.locate(b"###OTT-PRE-OTT###", 0).is_none());
        assert!(m.locate(b"###OTT-PRE-OTT######OTT0OTT###", 0).is_some());
    }

    #[test]
    fn test_validate() {
        assert!(MarkerConfig::default().validate().is_ok());
        let bad = MarkerConfig {
            pre_marker: "it's".into(),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let empty = MarkerConfig {
            fragments: vec![],
            ..Default::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_decode_exit_codes() {
        for (body, expected) in [("0", 0), ("1", 1), ("127", 127), ("abc", UNKNOWN_EXIT_CODE), ("", UNKNOWN_EXIT_CODE)] {
            let data = format!("###OTT0OTT###out\n###OTT{}OTT###", body);
            let mut framer = CommandFramer::new(&MarkerConfig::default());
            assert_eq!(run(&mut framer, data.as_bytes()).unwrap(), b"out\n");
            assert_eq!(framer.exit_code(), expected, "body {:?}", body);
        }
    }

    #[test]
    fn test_exit_code_split_across_chunks() {
        let data = b"###OTT0OTT###x\n###OTT127OTT###";
        let mut framer = CommandFramer::new(&MarkerConfig::default());
        let mut buf = Vec::new();
        let mut out = None;
        for byte in data.iter() {
            buf.push(*byte);
            if let Some(p) = run(&mut framer, &buf) {
                out = Some(p);
                break;
            }
        }
        assert_eq!(out.unwrap(), b"x\n");
        assert_eq!(framer.exit_code(), 127);
    }

    #[test]
    fn test_without_status() {
        let mut framer = CommandFramer::without_status(Marker::single(">>> "));
        assert_eq!(run(&mut framer, b">>> 2\n>>> ").unwrap(), b"2\n");
        assert_eq!(framer.exit_code(), UNKNOWN_EXIT_CODE);
    }

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_mirror_receives_interior_only() {
        let sink = Shared::default();
        let mut mirror: Mirror = Box::new(sink.clone());
        let mut framer = CommandFramer::new(&MarkerConfig::default());
        let data = b"noise###OTT0OTT###hello\nworld\n###OTT0OTT###";
        let mut buf = Vec::new();
        for chunk in data.chunks(5) {
            buf.extend_from_slice(chunk);
            if let Progress::Done { .. } = framer.step(&buf, Some(&mut mirror)) {
                break;
            }
        }
        assert_eq!(sink.0.lock().unwrap().as_slice(), b"hello\nworld\n");
    }
}
