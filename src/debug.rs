//! Line-number mapping, parallel to the source-line positions emitted
//! instructions came from.

/// One source filename mapped to a single segment (spec §3: "single
/// filename mapping per segment").
#[derive(Debug, Default)]
pub struct DebugMap {
    filename: Option<String>,
    lines: Vec<(usize, u32)>,
}

impl DebugMap {
    /// Set the segment's single source filename. Subsequent calls
    /// overwrite it; a segment only ever names one filename.
    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.filename = Some(filename.into());
    }

    /// The segment's source filename, if set.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Append one `(code offset, source line)` entry.
    pub fn push_line(&mut self, offset: usize, line: u32) {
        self.lines.push((offset, line));
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// `true` if no entries have been recorded.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Read-only accessor pairing code offsets with their debug line
    /// numbers: useful to any caller that wants
    /// line-to-offset mapping without reaching into the internal
    /// representation.
    pub fn code_lines(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.lines.iter().copied()
    }
}
