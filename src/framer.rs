//! Incremental stream framing
//!
//! A [`StreamFramer`] looks for a start anchor and an end anchor in the bytes
//! accumulated so far and reports the interior between them once the end
//! anchor is fully confirmed. It is re-run on every new chunk, so it can
//! forward interior bytes to an observer while the command is still running.
//!
//! Bytes are only forwarded when they can no longer turn out to be part of the
//! end anchor: anything from the first occurrence of the anchor's leading
//! fragment onward, and any trailing bytes that are a prefix of that fragment,
//! are held back until the next chunk settles them.
//!
//! Searches resume where the previous step stopped, so a frame costs time in
//! proportion to its length, not to the number of chunks it arrives in.

use std::ops::Range;

use crate::pattern::{AnchorMatch, Marker};

/// Receives what the framer learns while stepping
pub trait FrameObserver {
    /// Confirmed interior bytes, delivered in order and never twice.
    fn on_data(&mut self, _data: &[u8]) {}

    /// The end anchor was confirmed; called once per frame.
    fn on_end_anchor(&mut self, _buf: &[u8], _anchor: &AnchorMatch) {}
}

/// An observer that ignores everything
impl FrameObserver for () {}

/// Outcome of one framing step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The frame is not complete; `emitted` was forwarded to the observer
    /// by this step (possibly empty).
    Pending { emitted: Range<usize> },
    /// The frame is complete
    Complete {
        /// The interior between the start and end anchors
        payload: Range<usize>,
        /// Where the end anchor was found
        end: AnchorMatch,
    },
}

/// Locates `start ... interior ... end` in a growing buffer
#[derive(Debug, Clone)]
pub struct StreamFramer {
    start: Marker,
    end: Marker,
    /// End of the start anchor, once found
    interior_start: Option<usize>,
    /// Offset up to which interior bytes have been forwarded. No end anchor
    /// can begin before it.
    emitted: usize,
}

impl StreamFramer {
    pub fn new(start: Marker, end: Marker) -> Self {
        Self {
            start,
            end,
            interior_start: None,
            emitted: 0,
        }
    }

    /// Forget progress on the current frame. Call whenever the buffer it
    /// reads from is reset.
    pub fn reset(&mut self) {
        self.interior_start = None;
        self.emitted = 0;
    }

    pub fn start_marker(&self) -> &Marker {
        &self.start
    }

    pub fn end_marker(&self) -> &Marker {
        &self.end
    }

    /// Run one step over everything buffered since the last reset.
    ///
    /// `buf` must extend the buffer passed to the previous step.
    pub fn step(&mut self, buf: &[u8], observer: &mut dyn FrameObserver) -> Step {
        let interior_start = match self.interior_start {
            Some(offset) => offset,
            None => {
                let Some(start) = self.start.locate(buf, 0) else {
                    return Step::Pending { emitted: 0..0 };
                };
                self.interior_start = Some(start.end());
                self.emitted = start.end();
                start.end()
            }
        };
        let from = self.emitted.max(interior_start);

        match self.end.locate(buf, from) {
            None => {
                let safe = self.safe_boundary(buf, from);
                if safe > from {
                    observer.on_data(&buf[from..safe]);
                    self.emitted = safe;
                    Step::Pending { emitted: from..safe }
                } else {
                    Step::Pending { emitted: from..from }
                }
            }
            Some(end) => {
                let interior_end = end.start();
                if interior_end > from {
                    observer.on_data(&buf[from..interior_end]);
                }
                observer.on_end_anchor(buf, &end);
                self.reset();
                Step::Complete {
                    payload: interior_start..interior_end,
                    end,
                }
            }
        }
    }

    /// The first offset at or after `from` that might still belong to an
    /// unconfirmed end anchor.
    fn safe_boundary(&self, buf: &[u8], from: usize) -> usize {
        let Some(lead) = self.end.lead() else {
            return buf.len();
        };
        if let Some(pos) = self.end.find_lead(buf, from) {
            return pos;
        }
        buf.len() - partial_suffix(&buf[from..], lead)
    }
}

/// Length of the longest proper prefix of `needle` that `hay` ends with.
fn partial_suffix(hay: &[u8], needle: &[u8]) -> usize {
    let max = needle.len().saturating_sub(1).min(hay.len());
    (1..=max)
        .rev()
        .find(|&k| hay[hay.len() - k..] == needle[..k])
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        data: Vec<Vec<u8>>,
        anchors: usize,
    }

    impl FrameObserver for Recorder {
        fn on_data(&mut self, data: &[u8]) {
            self.data.push(data.to_vec());
        }

        fn on_end_anchor(&mut self, _buf: &[u8], _anchor: &AnchorMatch) {
            self.anchors += 1;
        }
    }

    fn framer() -> StreamFramer {
        let m = Marker::new(["###OTT", "OTT###"]);
        StreamFramer::new(m.clone(), m)
    }

    fn payload_of(step: &Step, buf: &[u8]) -> Option<Vec<u8>> {
        match step {
            Step::Complete { payload, .. } => Some(buf[payload.clone()].to_vec()),
            Step::Pending { .. } => None,
        }
    }

    #[test]
    fn test_no_start_anchor() {
        let mut f = framer();
        let mut rec = Recorder::default();
        let step = f.step(b"banner text", &mut rec);
        assert_eq!(step, Step::Pending { emitted: 0..0 });
        assert!(rec.data.is_empty());
    }

    #[test]
    fn test_complete_in_one_chunk() {
        let buf = b"###OTT0OTT###hello\n###OTT0OTT###";
        let mut f = framer();
        let mut rec = Recorder::default();
        let step = f.step(buf, &mut rec);
        assert_eq!(payload_of(&step, buf).unwrap(), b"hello\n");
        assert_eq!(rec.data, vec![b"hello\n".to_vec()]);
        assert_eq!(rec.anchors, 1);
    }

    #[test]
    fn test_empty_interior() {
        let buf = b"###OTT0OTT######OTT1OTT###";
        let mut f = framer();
        let step = f.step(buf, &mut ());
        assert_eq!(payload_of(&step, buf).unwrap(), b"");
    }

    #[test]
    fn test_holds_back_partial_anchor() {
        let mut f = framer();
        let mut rec = Recorder::default();
        let mut buf = b"###OTT0OTT###out##".to_vec();
        let step = f.step(&buf, &mut rec);
        // "##" could be the start of "###OTT"
        assert_eq!(step, Step::Pending { emitted: 13..16 });
        assert_eq!(rec.data, vec![b"out".to_vec()]);

        buf.extend_from_slice(b"#OTT1");
        let step = f.step(&buf, &mut rec);
        assert_eq!(step, Step::Pending { emitted: 16..16 });

        buf.extend_from_slice(b"OTT###");
        let step = f.step(&buf, &mut rec);
        assert_eq!(payload_of(&step, &buf).unwrap(), b"out");
        assert_eq!(rec.data.concat(), b"out".to_vec());
    }

    #[test]
    fn test_hash_run_released_when_not_anchor() {
        let mut f = framer();
        let mut rec = Recorder::default();
        let mut buf = b"###OTT0OTT#### title".to_vec();
        f.step(&buf, &mut rec);
        buf.extend_from_slice(b"\n###OTT0OTT###");
        let step = f.step(&buf, &mut rec);
        assert_eq!(payload_of(&step, &buf).unwrap(), b"# title\n");
        assert_eq!(rec.data.concat(), b"# title\n".to_vec());
    }

    #[test]
    fn test_chunking_never_changes_result() {
        let data: &[u8] = b"noise###OTT0OTT###line one\n## two ###\nthree\n###OTT42OTT###";
        let mut whole = framer();
        let mut rec_whole = Recorder::default();
        let expected = payload_of(&whole.step(data, &mut rec_whole), data).unwrap();

        for size in 1..data.len() {
            let mut f = framer();
            let mut rec = Recorder::default();
            let mut buf = Vec::new();
            let mut result = None;
            for chunk in data.chunks(size) {
                buf.extend_from_slice(chunk);
                let step = f.step(&buf, &mut rec);
                if let Some(p) = payload_of(&step, &buf) {
                    result = Some(p);
                    break;
                }
            }
            assert_eq!(result.as_deref(), Some(expected.as_slice()), "chunk size {}", size);
            assert_eq!(rec.data.concat(), expected, "mirrored bytes, chunk size {}", size);
            assert_eq!(rec.anchors, 1);
        }
    }

    #[test]
    fn test_resumes_after_forwarded_bytes() {
        let mut f = framer();
        let mut rec = Recorder::default();
        let mut buf = b"###OTT0OTT###0123456789abcdef".to_vec();
        f.step(&buf, &mut rec);
        assert_eq!(rec.data.concat(), b"0123456789abcdef".to_vec());

        // Bytes already forwarded are never searched again, so a marker
        // written over them goes unnoticed.
        buf[13..26].copy_from_slice(b"###OTT9OTT###");
        buf.extend_from_slice(b"tail");
        let step = f.step(&buf, &mut rec);
        assert_eq!(step, Step::Pending { emitted: 29..33 });

        buf.extend_from_slice(b"###OTT0OTT###");
        let step = f.step(&buf, &mut rec);
        assert_eq!(payload_of(&step, &buf).unwrap().len(), 20);
        assert_eq!(rec.anchors, 1);
    }

    #[test]
    fn test_reset_forgets_start_anchor() {
        let mut f = framer();
        f.step(b"###OTT0OTT###partial", &mut ());
        f.reset();
        let buf = b"x###OTT0OTT###next###OTT0OTT###";
        assert_eq!(payload_of(&f.step(buf, &mut ()), buf).unwrap(), b"next");
    }

    #[test]
    fn test_partial_suffix() {
        assert_eq!(partial_suffix(b"abc##", b"###OTT"), 2);
        assert_eq!(partial_suffix(b"abc###OT", b"###OTT"), 5);
        assert_eq!(partial_suffix(b"abc", b"###OTT"), 0);
        assert_eq!(partial_suffix(b"", b"###OTT"), 0);
    }
}
