//! ON/OFF delay filtering
//!
//! A small debouncer for boolean signals: a rising edge can be delayed until
//! the input has been high for `on_ms`, a falling edge until it has been low
//! for `off_ms`. The connection engine uses the off-delay flavor to keep a
//! briefly flapping wireless link from tearing the whole session stack down.

use crate::clock::Deadline;

/// Which edges of the input are delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayKind {
    /// Pass the input through unchanged.
    None,
    /// Delay rising edges by `on_ms`.
    OnDelay,
    /// Delay falling edges by `off_ms`.
    OffDelay,
    /// Delay both edges.
    OnOffDelay,
}

#[derive(Debug)]
pub struct Debounce {
    kind: DelayKind,
    prev: bool,
    on_ms: u32,
    off_ms: u32,
    on_deadline: Deadline,
    off_deadline: Deadline,
}

impl Debounce {
    pub fn new(kind: DelayKind, initial: bool, on_ms: u32, off_ms: u32, now: u32) -> Self {
        Self {
            kind,
            prev: initial,
            on_ms,
            off_ms,
            on_deadline: Deadline::after(now, on_ms),
            off_deadline: Deadline::after(now, off_ms),
        }
    }

    /// Off-delay filter: `true` is reported immediately, `false` only after
    /// the input has stayed low for `off_ms`.
    pub fn off_delay(initial: bool, off_ms: u32, now: u32) -> Self {
        Self::new(DelayKind::OffDelay, initial, 0, off_ms, now)
    }

    /// Feed the raw input and get the filtered verdict.
    ///
    /// While the input sits on the non-delayed side, the opposite edge's
    /// deadline keeps being re-armed, so only a *sustained* change flips the
    /// output.
    pub fn update(&mut self, raw: bool, now: u32) -> bool {
        let mut result = self.prev;
        match self.kind {
            DelayKind::OnDelay => {
                if raw {
                    if self.on_deadline.expired(now) {
                        result = true;
                    }
                } else {
                    self.on_deadline = Deadline::after(now, self.on_ms);
                    result = false;
                }
            }
            DelayKind::OffDelay => {
                if !raw {
                    if self.off_deadline.expired(now) {
                        result = false;
                    }
                } else {
                    self.off_deadline = Deadline::after(now, self.off_ms);
                    result = true;
                }
            }
            DelayKind::OnOffDelay => {
                if raw {
                    if self.on_deadline.expired(now) {
                        result = true;
                    }
                    self.off_deadline = Deadline::after(now, self.off_ms);
                } else {
                    if self.off_deadline.expired(now) {
                        result = false;
                    }
                    self.on_deadline = Deadline::after(now, self.on_ms);
                }
            }
            DelayKind::None => result = raw,
        }
        self.prev = result;
        result
    }
}
