//! Response writer with nested capture scopes.
//!
//! Handlers echo into the innermost open capture, or straight to the wire
//! when nothing is capturing. Every buffering mode the engine supports is a
//! different way of opening and closing captures over this one type.

#[derive(Debug, Default)]
pub struct OutputBuffer {
    captures: Vec<String>,
    wire: Vec<u8>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open capture scopes.
    pub fn level(&self) -> usize {
        self.captures.len()
    }

    pub fn begin_capture(&mut self) {
        self.captures.push(String::new());
    }

    /// Closes the innermost capture and returns what it collected.
    /// Returns an empty string when nothing is capturing.
    pub fn end_capture(&mut self) -> String {
        self.captures.pop().unwrap_or_default()
    }

    /// Length of the innermost capture.
    pub fn captured_len(&self) -> usize {
        self.captures.last().map_or(0, String::len)
    }

    /// Drops whatever the innermost capture holds, keeping it open.
    pub fn discard_current(&mut self) {
        if let Some(top) = self.captures.last_mut() {
            top.clear();
        }
    }

    pub fn echo(&mut self, data: &str) {
        match self.captures.last_mut() {
            Some(top) => top.push_str(data),
            None => self.wire.extend_from_slice(data.as_bytes()),
        }
    }

    /// Writes to the wire, bypassing any open capture.
    pub fn emit(&mut self, data: &[u8]) {
        self.wire.extend_from_slice(data);
    }

    /// Discards capture scopes until `level` remain open.
    pub fn unwind_to(&mut self, level: usize) {
        if self.captures.len() > level {
            log::debug!(
                "unwinding output captures from {} to {level}",
                self.captures.len()
            );
            self.captures.truncate(level);
        }
    }

    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    pub fn wire_string(&self) -> String {
        String::from_utf8_lossy(&self.wire).into_owned()
    }

    pub fn take_wire(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.wire)
    }
}
