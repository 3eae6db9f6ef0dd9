// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

use super::SYSEX_BUFFER_SIZE;

/// Fixed-size accumulator for SysEx data.
///
/// When full, the contents are handed out as a chunk. The chunk remains
/// readable until the next byte is added, which then starts the next chunk.
#[derive(Debug, Clone)]
pub(crate) struct SysExBuffer {
    buffer: [u8; SYSEX_BUFFER_SIZE],
    len: usize,
    receiving: bool,
    first_chunk: bool,
    chunk_emitted: bool,
}

impl SysExBuffer {
    pub(crate) const fn new() -> Self {
        Self {
            buffer: [0; SYSEX_BUFFER_SIZE],
            len: 0,
            receiving: false,
            first_chunk: false,
            chunk_emitted: false,
        }
    }

    /// Discard any unfinished message and start a new one.
    pub(crate) fn start(&mut self) {
        self.len = 0;
        self.receiving = true;
        self.first_chunk = true;
        self.chunk_emitted = false;
    }

    pub(crate) fn end(&mut self) {
        self.begin_next_chunk();
        self.receiving = false;
    }

    /// Mark the current contents as handed out.
    pub(crate) fn emit_chunk(&mut self) {
        debug_assert!(self.receiving);
        self.chunk_emitted = true;
    }

    pub(crate) const fn is_receiving(&self) -> bool {
        self.receiving
    }

    pub(crate) const fn is_first_chunk(&self) -> bool {
        self.first_chunk
    }

    pub(crate) const fn has_space_left(&self, amount: usize) -> bool {
        let len = if self.chunk_emitted { 0 } else { self.len };
        len + amount <= SYSEX_BUFFER_SIZE
    }

    pub(crate) fn add(&mut self, byte: u8) {
        self.add_slice(&[byte]);
    }

    pub(crate) fn add_slice(&mut self, bytes: &[u8]) {
        self.begin_next_chunk();
        debug_assert!(self.has_space_left(bytes.len()));
        let end = self.len + bytes.len();
        self.buffer[self.len..end].copy_from_slice(bytes);
        self.len = end;
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    fn begin_next_chunk(&mut self) {
        if !self.chunk_emitted {
            return;
        }
        self.chunk_emitted = false;
        self.len = 0;
        self.first_chunk = false;
    }
}

impl Default for SysExBuffer {
    fn default() -> Self {
        Self::new()
    }
}
