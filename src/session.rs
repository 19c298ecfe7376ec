//! Client session handling
//!
//! One accepted client is serviced to completion before control returns to
//! the caller: the read loop below is a deliberate blocking region, bounded
//! only by the session deadline. While it runs, phase supervision, listener
//! health checks and further accepts are on hold. That serialization is part
//! of the bridge's observable behavior, not an accident.
//!
//! The request header is framed line by line: LF terminates a line, CR bytes
//! are stripped, and an empty line completes the header, which is then handed
//! off to the application together with the client.

use log::{debug, trace};
use std::thread;
use std::time::Duration;

use crate::clock::{Clock, Deadline};

/// How long one client may take to deliver its header.
pub const SESSION_TIMEOUT_MS: u32 = 10_000;

/// An accepted client connection, as seen by the session handler.
pub trait Connection {
    fn is_connected(&mut self) -> bool;
    fn byte_available(&mut self) -> bool;
    /// Next byte, or None if the peer went away.
    fn read_byte(&mut self) -> Option<u8>;
    fn flush_and_close(&mut self);
}

/// Application callback receiving the client and its completed header.
pub type HandoffFn<'a, C> = dyn FnMut(&mut C, &str) + 'a;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Header completed and the handoff ran.
    HandedOff,
    /// The session deadline elapsed first.
    TimedOut,
    /// The client went away first.
    Disconnected,
}

/// Transient per-client state: header accumulator, current-line scratch and
/// the session deadline. Created on accept, consumed on exit.
pub struct Session {
    header: String,
    line: String,
    deadline: Deadline,
}

impl Session {
    pub fn new(now: u32) -> Self {
        Self {
            header: String::new(),
            line: String::new(),
            deadline: Deadline::after(now, SESSION_TIMEOUT_MS),
        }
    }

    /// Service the client until handoff, timeout or disconnect, then flush
    /// and close it. Without a registered handoff the connection is still
    /// drained and closed so an accepted socket is never left dangling.
    pub fn run<C: Connection>(
        mut self,
        conn: &mut C,
        clock: &dyn Clock,
        mut handoff: Option<&mut HandoffFn<'_, C>>,
    ) -> SessionEnd {
        let outcome = loop {
            if !conn.is_connected() {
                break SessionEnd::Disconnected;
            }
            if self.deadline.expired(clock.now_millis()) {
                break SessionEnd::TimedOut;
            }
            if !conn.byte_available() {
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            let byte = match conn.read_byte() {
                Some(byte) => byte,
                None => break SessionEnd::Disconnected,
            };
            let func = match handoff.as_mut() {
                Some(func) => func,
                None => {
                    trace!("no handoff registered, dropping byte");
                    continue;
                }
            };
            match byte {
                b'\r' => {}
                b'\n' => {
                    self.header.push('\n');
                    if self.line.is_empty() {
                        // Blank line: the header is complete.
                        func(conn, &self.header);
                        break SessionEnd::HandedOff;
                    }
                    self.line.clear();
                }
                other => {
                    self.header.push(char::from(other));
                    self.line.push(char::from(other));
                }
            }
        };
        debug!("session ended: {:?}", outcome);
        conn.flush_and_close();
        outcome
    }
}
