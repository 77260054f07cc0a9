//! Clean line buffers
//!
//! Every payload that crosses a socket or enters the event store is a
//! `CleanLine`: an arbitrary byte string with NUL, CR, and LF removed. The
//! line framing on both the IRC side and the processor side is newline-based,
//! so these three bytes are the only ones that could corrupt framing or the
//! store's one-event-per-line wire rendering.

use std::fmt;

/// A byte string guaranteed to contain no `\0`, `\r`, or `\n`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CleanLine(Vec<u8>);

impl CleanLine {
    /// Build a clean line from arbitrary bytes, stripping disallowed bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let mut data: Vec<u8> = bytes.into();
        data.retain(|&b| b != 0 && b != b'\r' && b != b'\n');
        CleanLine(data)
    }

    /// Wrap bytes already known to be clean.
    ///
    /// Debug builds verify the claim; release builds trust the caller. Used
    /// on hot paths where the input was produced from another `CleanLine`.
    pub fn from_clean(bytes: Vec<u8>) -> Self {
        debug_assert!(
            !bytes.iter().any(|&b| b == 0 || b == b'\r' || b == b'\n'),
            "CleanLine::from_clean called with dirty bytes"
        );
        CleanLine(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for CleanLine {
    fn from(s: &str) -> Self {
        CleanLine::new(s.as_bytes().to_vec())
    }
}

impl From<String> for CleanLine {
    fn from(s: String) -> Self {
        CleanLine::new(s.into_bytes())
    }
}

impl fmt::Display for CleanLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}
