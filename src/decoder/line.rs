//! Per-line sample cursor
//!
//! [`LineCursor`] turns a run-length encoded edge stream into the cursor
//! surface the acquisition layer needs: current level, advance to the next
//! edge, advance to an absolute position, and transition look-ahead. The
//! peek/put-back machinery of the runtime [`Receiver`] supplies the
//! look-ahead without consuming edges.
//!
//! Cursors only move forward; a full transaction reset re-enters through
//! `advance_to`, never by rewinding.

use crate::runtime::{Receiver, Sample, WorkResult};

/// Persistent cursor state, owned by the decoder node so it survives across
/// `work()` calls (the borrowed [`LineCursor`] is rebuilt each call).
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LineState {
    level: bool,
    position: u64,
    initialized: bool,
}

/// A forward-only cursor over one digital line.
pub(crate) struct LineCursor<'a> {
    rx: Receiver<'a, Sample>,
    state: &'a mut LineState,
}

impl<'a> LineCursor<'a> {
    pub(crate) fn new(rx: Receiver<'a, Sample>, state: &'a mut LineState) -> Self {
        Self { rx, state }
    }

    /// Consume the stream's initial sample to establish the starting level.
    /// No-op once initialized.
    pub(crate) fn ensure_init(&mut self) -> WorkResult<()> {
        if !self.state.initialized {
            let first = self.rx.recv()?;
            self.state.level = first.level;
            self.state.position = first.position;
            self.state.initialized = true;
        }
        Ok(())
    }

    /// Line level at the current position.
    pub(crate) fn level(&self) -> bool {
        self.state.level
    }

    /// Current cursor position in device samples.
    pub(crate) fn position(&self) -> u64 {
        self.state.position
    }

    /// Position of the next edge without consuming it. Blocks until the
    /// producer supplies one; end of stream surfaces as `Shutdown`.
    pub(crate) fn next_edge_position(&mut self) -> WorkResult<u64> {
        Ok(self.rx.peek()?.position)
    }

    /// Move onto the next edge, taking its level.
    pub(crate) fn advance_to_next_edge(&mut self) -> WorkResult<u64> {
        let edge = self.rx.recv()?;
        self.state.level = edge.level;
        self.state.position = edge.position;
        Ok(edge.position)
    }

    /// Move to an absolute position, consuming every edge at or before it.
    pub(crate) fn advance_to(&mut self, position: u64) -> WorkResult<()> {
        loop {
            match self.rx.peek() {
                Ok(edge) if edge.position <= position => {
                    let edge = self.rx.recv()?;
                    self.state.level = edge.level;
                }
                Ok(_) => break,
                Err(e) => return Err(e),
            }
        }
        if position > self.state.position {
            self.state.position = position;
        }
        Ok(())
    }

    /// Whether advancing to `position` would cross a level transition.
    pub(crate) fn would_transition_before(&mut self, position: u64) -> WorkResult<bool> {
        Ok(self.next_edge_position()? <= position)
    }
}
