//! Fragmented pattern matching
//!
//! A [`Marker`] is an ordered list of byte fragments. It matches a buffer only
//! when every fragment is found, in order, each one starting at or after the
//! end of the previous one. Splitting a marker this way means a shell that
//! echoes one fragment back (or prints a command containing only part of the
//! marker) never produces a false match.

use std::ops::Range;

use memchr::memmem::Finder;

/// An ordered sequence of byte fragments
#[derive(Debug, Clone)]
pub struct Marker {
    fragments: Vec<Vec<u8>>,
    /// One searcher per fragment, built once
    finders: Vec<Finder<'static>>,
}

impl PartialEq for Marker {
    fn eq(&self, other: &Self) -> bool {
        self.fragments == other.fragments
    }
}

impl Eq for Marker {}

/// Positions of every fragment of a [`Marker`] located in a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorMatch {
    /// Byte range of each fragment, in marker order
    pub spans: Vec<Range<usize>>,
}

impl AnchorMatch {
    /// Offset of the first byte of the first fragment
    pub fn start(&self) -> usize {
        self.spans.first().map_or(0, |r| r.start)
    }

    /// Offset immediately after the last fragment (the anchor end)
    pub fn end(&self) -> usize {
        self.spans.last().map_or(0, |r| r.end)
    }

    /// The gap between fragment `i` and fragment `i + 1`, if both exist.
    pub fn gap(&self, i: usize) -> Option<Range<usize>> {
        let left = self.spans.get(i)?;
        let right = self.spans.get(i + 1)?;
        Some(left.end..right.start)
    }
}

impl Marker {
    /// Build a marker from its fragments. Empty fragments are dropped.
    pub fn new<I, F>(fragments: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Vec<u8>>,
    {
        let fragments: Vec<Vec<u8>> = fragments
            .into_iter()
            .map(Into::into)
            .filter(|f| !f.is_empty())
            .collect();
        let finders = fragments.iter().map(|f| Finder::new(f).into_owned()).collect();
        Self { fragments, finders }
    }

    /// A marker made of one contiguous fragment
    pub fn single(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new([bytes.into()])
    }

    pub fn fragments(&self) -> &[Vec<u8>] {
        &self.fragments
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Length of the first fragment (0 for an empty marker)
    pub fn lead_len(&self) -> usize {
        self.fragments.first().map_or(0, Vec::len)
    }

    /// The first fragment, if any
    pub fn lead(&self) -> Option<&[u8]> {
        self.fragments.first().map(Vec::as_slice)
    }

    /// Offset of the first occurrence of the first fragment at or after `from`.
    pub fn find_lead(&self, buf: &[u8], from: usize) -> Option<usize> {
        let finder = self.finders.first()?;
        let hay = buf.get(from..)?;
        finder.find(hay).map(|pos| from + pos)
    }

    /// All fragments concatenated
    pub fn joined(&self) -> Vec<u8> {
        self.fragments.concat()
    }

    /// Locate the whole marker in `buf`, starting the search at `from`.
    pub fn locate(&self, buf: &[u8], from: usize) -> Option<AnchorMatch> {
        if self.finders.is_empty() || from > buf.len() {
            return None;
        }
        let mut cursor = from;
        let mut spans = Vec::with_capacity(self.finders.len());
        for finder in &self.finders {
            let pos = cursor + finder.find(&buf[cursor..])?;
            let end = pos + finder.needle().len();
            spans.push(pos..end);
            cursor = end;
        }
        Some(AnchorMatch { spans })
    }
}
