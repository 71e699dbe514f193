//! Incremental request frame assembly for the control channel.
//!
//! The control socket delivers bytes in arbitrary chunks.  [`FrameAssembler`]
//! hands out a read window sized to exactly the bytes the current frame still
//! needs, so one read can never swallow the start of the next frame:
//!
//! ```text
//! AwaitingByte0 ─1─▶ AwaitingByte1 ─1─▶ AwaitingBody(target) ─(target-2)─▶ Frame
//!       ▲                  │                                                │
//!       │                  └── declared > 2048 ──▶ Discarding(remaining) ──┤
//!       └──────────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::messages::{CONTROL_BUFFER_CAPACITY, LENGTH_PREFIX_SIZE};

/// Where the assembler is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerPhase {
    /// Waiting for the high byte of the length prefix.
    AwaitingByte0,
    /// Waiting for the low byte of the length prefix.
    AwaitingByte1,
    /// Waiting until `target` bytes (the whole frame) are buffered.
    AwaitingBody { target: usize },
    /// Dropping the rest of a frame too large for the receive buffer.
    Discarding { declared: usize, remaining: usize },
}

/// Outcome of feeding bytes into the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyEvent {
    /// More bytes are needed.
    Pending,
    /// A complete frame, length prefix included.
    Frame(Vec<u8>),
    /// A frame whose declared length could not be buffered was dropped.
    Dropped { declared: usize },
}

/// Per-session state machine rebuilding request frames from chunked reads.
///
/// Usage is a two-step cycle: read into [`read_window`](Self::read_window),
/// then report the byte count to [`advance`](Self::advance).
#[derive(Debug)]
pub struct FrameAssembler {
    buf: Box<[u8; CONTROL_BUFFER_CAPACITY]>,
    len: usize,
    phase: AssemblerPhase,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    /// Creates an empty assembler waiting for the first length byte.
    pub fn new() -> Self {
        Self {
            buf: Box::new([0u8; CONTROL_BUFFER_CAPACITY]),
            len: 0,
            phase: AssemblerPhase::AwaitingByte0,
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> AssemblerPhase {
        self.phase
    }

    /// Number of bytes of the current frame held in the buffer.
    pub fn buffered(&self) -> usize {
        self.len
    }

    /// Returns the slice the next read must fill.
    ///
    /// Its length is exactly what the current phase still needs (capped at
    /// the buffer capacity while discarding), and never zero.
    pub fn read_window(&mut self) -> &mut [u8] {
        match self.phase {
            AssemblerPhase::AwaitingByte0 => &mut self.buf[0..1],
            AssemblerPhase::AwaitingByte1 => &mut self.buf[1..2],
            AssemblerPhase::AwaitingBody { target } => &mut self.buf[self.len..target],
            AssemblerPhase::Discarding { remaining, .. } => {
                let n = remaining.min(CONTROL_BUFFER_CAPACITY);
                &mut self.buf[..n]
            }
        }
    }

    /// Records that `n` bytes were read into the last [`read_window`](Self::read_window).
    ///
    /// `n` must not exceed the window length.  A zero-byte read means EOF and
    /// is the caller's to handle; it leaves the assembler untouched.
    pub fn advance(&mut self, n: usize) -> AssemblyEvent {
        if n == 0 {
            return AssemblyEvent::Pending;
        }

        match self.phase {
            AssemblerPhase::AwaitingByte0 => {
                self.len = 1;
                self.phase = AssemblerPhase::AwaitingByte1;
                AssemblyEvent::Pending
            }
            AssemblerPhase::AwaitingByte1 => {
                self.len = LENGTH_PREFIX_SIZE;
                let declared = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
                if declared < LENGTH_PREFIX_SIZE {
                    self.reset();
                    AssemblyEvent::Dropped { declared }
                } else if declared > CONTROL_BUFFER_CAPACITY {
                    self.len = 0;
                    self.phase = AssemblerPhase::Discarding {
                        declared,
                        remaining: declared - LENGTH_PREFIX_SIZE,
                    };
                    AssemblyEvent::Pending
                } else if declared == LENGTH_PREFIX_SIZE {
                    self.take_frame()
                } else {
                    self.phase = AssemblerPhase::AwaitingBody { target: declared };
                    AssemblyEvent::Pending
                }
            }
            AssemblerPhase::AwaitingBody { target } => {
                debug_assert!(self.len + n <= target, "read past the frame boundary");
                self.len += n;
                if self.len == target {
                    self.take_frame()
                } else {
                    AssemblyEvent::Pending
                }
            }
            AssemblerPhase::Discarding {
                declared,
                remaining,
            } => {
                debug_assert!(n <= remaining, "discarded past the frame boundary");
                let remaining = remaining - n;
                if remaining == 0 {
                    self.reset();
                    AssemblyEvent::Dropped { declared }
                } else {
                    self.phase = AssemblerPhase::Discarding {
                        declared,
                        remaining,
                    };
                    AssemblyEvent::Pending
                }
            }
        }
    }

    /// Feeds an in-memory byte slice through the assembler, collecting every
    /// non-pending event.
    pub fn push_bytes(&mut self, mut bytes: &[u8]) -> Vec<AssemblyEvent> {
        let mut events = Vec::new();
        while !bytes.is_empty() {
            let window = self.read_window();
            let n = window.len().min(bytes.len());
            window[..n].copy_from_slice(&bytes[..n]);
            bytes = &bytes[n..];
            match self.advance(n) {
                AssemblyEvent::Pending => {}
                event => events.push(event),
            }
        }
        events
    }

    fn take_frame(&mut self) -> AssemblyEvent {
        let frame = self.buf[..self.len].to_vec();
        self.reset();
        AssemblyEvent::Frame(frame)
    }

    fn reset(&mut self) {
        self.len = 0;
        self.phase = AssemblerPhase::AwaitingByte0;
    }
}
