//! Status LED patterns
//!
//! Repeatedly flash the LED in any pattern. Each pattern is a looped list of
//! on/off steps with millisecond durations; [`StatusLed::poll`] advances the
//! current step from the cooperative main loop. The renderer also acts as the
//! engine's status indicator by mapping its three semantic signals onto
//! pattern indices.

use crate::clock::Deadline;
use crate::net::{StatusIndicator, StatusSignal};

/// Anything that can drive the indicator LED.
pub trait LedPin {
    fn set(&mut self, on: bool);
}

struct Step {
    on: bool,
    ms: u32,
}

const fn step(on: bool, ms: u32) -> Step {
    Step { on, ms }
}

static PATTERNS: [&[Step]; 8] = [
    &[step(false, 1000)],
    &[step(true, 1000)],
    &[step(true, 50), step(false, 50)],
    &[step(true, 200), step(false, 200)],
    &[step(true, 500), step(false, 500)],
    &[step(true, 1000), step(false, 1000)],
    &[step(true, 50), step(false, 4950)],
    &[step(true, 50), step(false, 150), step(true, 50), step(false, 1000)],
];

/// Steady off; the link is up and the bridge is idle.
pub const PATTERN_NORMAL: usize = 0;
/// Fast blink while (re)connecting.
pub const PATTERN_SEARCHING: usize = 3;
/// Double pulse on listener trouble.
pub const PATTERN_FAULT: usize = 7;

/// Pattern renderer with per-instance frame state.
pub struct StatusLed<P: LedPin> {
    pin: P,
    pattern: usize,
    applied: Option<usize>,
    frame: usize,
    frame_deadline: Deadline,
}

impl<P: LedPin> StatusLed<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            pattern: PATTERN_NORMAL,
            applied: None,
            frame: 0,
            frame_deadline: Deadline::after(0, 0),
        }
    }

    /// Select a pattern by table index; out-of-range requests are ignored.
    pub fn set_pattern(&mut self, pattern: usize) {
        if pattern < PATTERNS.len() {
            self.pattern = pattern;
        }
    }

    /// Advance the flashing state. Call once per main-loop iteration.
    pub fn poll(&mut self, now: u32) {
        if self.applied != Some(self.pattern) {
            // Restart the new pattern from its first step right away.
            self.applied = Some(self.pattern);
            self.frame = 0;
            self.frame_deadline = Deadline::after(now, 0);
        }
        if self.frame_deadline.expired(now) {
            let steps = PATTERNS[self.pattern];
            let current = &steps[self.frame];
            self.pin.set(current.on);
            self.frame_deadline = Deadline::after(now, current.ms);
            self.frame = (self.frame + 1) % steps.len();
        }
    }
}

impl<P: LedPin> StatusIndicator for StatusLed<P> {
    fn signal(&mut self, signal: StatusSignal) {
        self.set_pattern(match signal {
            StatusSignal::Searching => PATTERN_SEARCHING,
            StatusSignal::Normal => PATTERN_NORMAL,
            StatusSignal::Fault => PATTERN_FAULT,
        });
    }
}

#[cfg(target_os = "espidf")]
impl<'d, T> LedPin for esp_idf_hal::gpio::PinDriver<'d, T, esp_idf_hal::gpio::Output>
where
    T: esp_idf_hal::gpio::Pin,
{
    fn set(&mut self, on: bool) {
        let _ = if on { self.set_high() } else { self.set_low() };
    }
}
