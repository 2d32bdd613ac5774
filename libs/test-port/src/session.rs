//! Per-session scratch state: the inbound byte ring and the outbound
//! value buffer. One instance exists per entry point (test port and
//! protocol front end); it is never persisted.

use core::fmt;

/// Inbound command ring, 32 bytes with separate read/write cursors.
pub const RX_LEN: usize = 32;

/// Outbound text staging capacity.
pub const TX_LEN: usize = 256;

#[derive(Clone, Debug)]
pub struct ByteRing {
    buf: [u8; RX_LEN],
    ndx_in: u8,
    ndx_out: u8,
}

impl ByteRing {
    pub const fn new() -> Self {
        Self {
            buf: [0; RX_LEN],
            ndx_in: 0,
            ndx_out: 0,
        }
    }

    fn next(ndx: u8) -> u8 {
        (ndx + 1) % (RX_LEN as u8)
    }

    pub fn is_empty(&self) -> bool {
        self.ndx_in == self.ndx_out
    }

    /// Store one byte; dropped when the ring is full.
    pub fn push(&mut self, byte: u8) -> bool {
        let next = Self::next(self.ndx_in);
        if next == self.ndx_out {
            return false;
        }
        self.buf[self.ndx_in as usize] = byte;
        self.ndx_in = next;
        true
    }

    /// The next unread byte, without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.peek_ahead(0)
    }

    /// Unread byte `n` positions past the read cursor.
    pub fn peek_ahead(&self, n: usize) -> Option<u8> {
        let mut ndx = self.ndx_out;
        let mut left = n;
        loop {
            if ndx == self.ndx_in {
                return None;
            }
            if left == 0 {
                return Some(self.buf[ndx as usize]);
            }
            left -= 1;
            ndx = Self::next(ndx);
        }
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.ndx_out as usize];
        self.ndx_out = Self::next(self.ndx_out);
        Some(byte)
    }

    /// True when the unread region holds `byte`.
    pub fn contains(&self, byte: u8) -> bool {
        let mut ndx = self.ndx_out;
        while ndx != self.ndx_in {
            if self.buf[ndx as usize] == byte {
                return true;
            }
            ndx = Self::next(ndx);
        }
        false
    }

    /// Discard up to and including the next line feed.
    pub fn flush_line(&mut self) {
        while let Some(byte) = self.pop() {
            if byte == b'\n' {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.ndx_out = self.ndx_in;
    }
}

impl Default for ByteRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Session scratch record for one command entry point.
pub struct Session {
    pub rx: ByteRing,
    /// The command line currently being parsed, detached from `rx` so a
    /// handler can never read past its own terminator into the next line.
    pub line: ByteRing,
    tx: heapless::Vec<u8, TX_LEN>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            rx: ByteRing::new(),
            line: ByteRing::new(),
            tx: heapless::Vec::new(),
        }
    }

    /// Feed one inbound byte from the transport.
    pub fn push_byte(&mut self, byte: u8) -> bool {
        self.rx.push(byte)
    }

    /// Move the next complete line (terminator included) from `rx` into
    /// the line buffer, replacing whatever was left there. False when no
    /// full line has arrived yet.
    pub fn take_line(&mut self) -> bool {
        if !self.rx.contains(b'\n') {
            return false;
        }
        self.line = ByteRing::new();
        while let Some(byte) = self.rx.pop() {
            let _ = self.line.push(byte);
            if byte == b'\n' {
                break;
            }
        }
        true
    }

    pub fn puts(&mut self, s: &str) {
        let _ = self.tx.extend_from_slice(s.as_bytes());
    }

    /// Pending outbound bytes; the transport drains them via
    /// [`Session::take_tx`].
    pub fn tx_bytes(&self) -> &[u8] {
        &self.tx
    }

    pub fn take_tx(&mut self) -> heapless::Vec<u8, TX_LEN> {
        core::mem::take(&mut self.tx)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// Staged output overflow is silently truncated; the port never blocks on
// a slow reader.
impl fmt::Write for Session {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let _ = self.tx.extend_from_slice(s.as_bytes());
        Ok(())
    }
}
