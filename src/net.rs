//! Connection supervision
//!
//! The top-level state machine behind the bridge: it owns the wireless link,
//! keeps exactly one TCP listener bound while the link is usable, and hands
//! accepted clients to the session handler. Everything is driven from a
//! single non-blocking `poll` entry point; only an open session blocks (see
//! [`crate::session`]).
//!
//! Phases move strictly `Resetting -> Connecting -> Active -> Resetting`.
//! Association failures, listener faults and session timeouts are all
//! recovered locally and surfaced through the status indicator; nothing in
//! here is fatal.

use log::{debug, info, warn};
use std::net::Ipv4Addr;

use crate::clock::{Clock, Deadline};
use crate::config::{NetMode, NetworkConfig};
use crate::debounce::Debounce;
use crate::session::{Connection, HandoffFn, Session};

/// How long one connection attempt may take before starting over.
const CONNECT_ATTEMPT_MS: u32 = 10_000;
/// How long the link may report down in Active before we give up on it.
const LINK_LOSS_HOLD_MS: u32 = 1_000;

/// RSSI sentinel: the radio has no reading.
pub const RSSI_NONE: i32 = 0;
/// RSSI sentinel: the radio reports an invalid measurement.
pub const RSSI_INVALID: i32 = -255;

/// The wireless radio, as seen by the engine.
pub trait WirelessLink {
    /// Apply mode, credentials and addressing, then start the radio.
    /// Returns false if the radio rejected the configuration.
    fn configure(&mut self, cfg: &NetworkConfig) -> bool;
    fn disconnect(&mut self);
    fn link_up(&mut self) -> bool;
    /// Signed dBm, or one of the `RSSI_*` sentinels while unassociated.
    fn signal_strength(&mut self) -> i32;
    fn local_address(&self) -> Ipv4Addr;
}

/// The TCP listener primitive. At most one socket is bound at a time;
/// `bind` implies releasing any previous socket first.
pub trait Listener {
    type Conn: Connection;
    fn bind(&mut self, port: u16, low_latency: bool) -> bool;
    fn unbind(&mut self);
    fn is_listening(&self) -> bool;
    fn try_accept(&mut self) -> Option<Self::Conn>;
}

/// Service discovery announcement.
pub trait Advertiser {
    fn advertise(&mut self, hostname: &str);
}

/// The three semantic states the engine reports outward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSignal {
    /// Entering Connecting: looking for (or bringing up) the network.
    Searching,
    /// Entering Active: link usable, listener bound.
    Normal,
    /// Listener fault: rebinding without touching the link.
    Fault,
}

/// Visual (or otherwise) status output.
pub trait StatusIndicator {
    fn signal(&mut self, signal: StatusSignal);
}

/// Top-level connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resetting,
    Connecting,
    Active,
}

/// Connection/session management engine.
///
/// Owns the phase, the link, the listener and the connection-attempt
/// deadline; no other component writes them. The status indicator and the
/// handoff are supplied per poll so the application keeps driving the LED
/// and can capture whatever context its handoff needs.
pub struct NetManager<W, L, A, C> {
    cfg: NetworkConfig,
    phase: Phase,
    link: W,
    listener: L,
    advertiser: A,
    clock: C,
    gate: Debounce,
    connect_deadline: Deadline,
}

impl<W, L, A, C> NetManager<W, L, A, C>
where
    W: WirelessLink,
    L: Listener,
    A: Advertiser,
    C: Clock,
{
    pub fn new(cfg: NetworkConfig, link: W, listener: L, advertiser: A, clock: C) -> Self {
        let now = clock.now_millis();
        Self {
            cfg,
            phase: Phase::Resetting,
            link,
            listener,
            advertiser,
            clock,
            gate: Debounce::off_delay(false, LINK_LOSS_HOLD_MS, now),
            connect_deadline: Deadline::after(now, 0),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.cfg
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    /// Adopt a new configuration. This is the only path that honors a mode
    /// switch; `poll` never re-reads the config mid-session.
    pub fn begin(&mut self, cfg: NetworkConfig) {
        self.end();
        self.cfg = cfg;
    }

    /// Release the listener and the link and fall back to Resetting.
    pub fn end(&mut self) {
        self.listener.unbind();
        self.link.disconnect();
        self.phase = Phase::Resetting;
    }

    /// One cooperative step. Returns the phase after the step, or None when
    /// networking is configured off (in which case nothing is touched).
    pub fn poll(
        &mut self,
        status: &mut dyn StatusIndicator,
        handoff: Option<&mut HandoffFn<'_, L::Conn>>,
    ) -> Option<Phase> {
        if self.cfg.mode == NetMode::Off {
            return None;
        }
        match self.phase {
            Phase::Resetting => self.reset(status),
            Phase::Connecting => self.step_connecting(status),
            Phase::Active => self.step_active(status, handoff),
        }
        Some(self.phase)
    }

    /// Tear down and start a fresh connection attempt.
    fn reset(&mut self, status: &mut dyn StatusIndicator) {
        status.signal(StatusSignal::Searching);
        self.listener.unbind();
        self.link.disconnect();
        if !self.link.configure(&self.cfg) {
            warn!("radio rejected configuration");
        }
        self.connect_deadline = Deadline::after(self.clock.now_millis(), CONNECT_ATTEMPT_MS);
        self.phase = Phase::Connecting;
        info!("connecting, mode {:?}", self.cfg.mode);
    }

    fn step_connecting(&mut self, status: &mut dyn StatusIndicator) {
        let connected = match self.cfg.mode {
            NetMode::AccessPoint => true,
            // A valid RSSI is the cheap "associated" proxy during the
            // attempt; the debounced gate takes over once Active.
            NetMode::Station => {
                let rssi = self.link.signal_strength();
                rssi != RSSI_NONE && rssi != RSSI_INVALID
            }
            NetMode::Off => false,
        };
        if connected {
            status.signal(StatusSignal::Normal);
            self.open_listener();
            self.advertiser.advertise(&self.cfg.hostname);
            self.phase = Phase::Active;
            info!("link up, listening on port {}", self.cfg.port);
        } else if self.connect_deadline.expired(self.clock.now_millis()) {
            debug!("connection attempt window elapsed");
            self.phase = Phase::Resetting;
        }
    }

    fn step_active(&mut self, status: &mut dyn StatusIndicator, handoff: Option<&mut HandoffFn<'_, L::Conn>>) {
        let up = match self.cfg.mode {
            NetMode::AccessPoint => true,
            _ => {
                let raw = self.link.link_up();
                self.gate.update(raw, self.clock.now_millis())
            }
        };
        if !up {
            info!("link lost, reconnecting");
            self.phase = Phase::Resetting;
            return;
        }
        if !self.listener.is_listening() {
            warn!("listener fault, rebinding on port {}", self.cfg.port);
            status.signal(StatusSignal::Fault);
            self.listener.unbind();
            self.open_listener();
            return;
        }
        if let Some(mut conn) = self.listener.try_accept() {
            debug!("client accepted");
            Session::new(self.clock.now_millis()).run(&mut conn, &self.clock, handoff);
        }
    }

    fn open_listener(&mut self) {
        if !self.listener.bind(self.cfg.port, true) {
            warn!("failed to bind listener on port {}", self.cfg.port);
        }
    }

    /// Log the current network situation, passphrase masked.
    pub fn log_status(&mut self) {
        let mode = match self.cfg.mode {
            NetMode::Off => "Off",
            NetMode::AccessPoint => "AP",
            NetMode::Station => "STA",
        };
        info!("Net info:");
        info!(" Hostname is {}", self.cfg.hostname);
        info!(" Mode is {}", mode);
        info!(" My AP is '{}' with '{}'", self.cfg.ssid, mask(&self.cfg.psk));
        info!(" My IP is {}/{}", self.link.local_address(), self.cfg.netmask);
        info!(" RSSI is {}dBm", self.link.signal_strength());
        info!(" TCP server at {}:{}", self.link.local_address(), self.cfg.port);
    }
}

fn mask(s: &str) -> String {
    "*".repeat(s.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FakeClock;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct LinkState {
        up: bool,
        rssi: i32,
        configures: usize,
        disconnects: usize,
        last_mode: Option<NetMode>,
    }

    #[derive(Clone, Default)]
    struct MockLink(Rc<RefCell<LinkState>>);

    impl WirelessLink for MockLink {
        fn configure(&mut self, cfg: &NetworkConfig) -> bool {
            let mut s = self.0.borrow_mut();
            s.configures += 1;
            s.last_mode = Some(cfg.mode);
            true
        }

        fn disconnect(&mut self) {
            self.0.borrow_mut().disconnects += 1;
        }

        fn link_up(&mut self) -> bool {
            self.0.borrow().up
        }

        fn signal_strength(&mut self) -> i32 {
            self.0.borrow().rssi
        }

        fn local_address(&self) -> Ipv4Addr {
            Ipv4Addr::new(192, 168, 4, 1)
        }
    }

    #[derive(Default)]
    struct ConnState {
        bytes: VecDeque<u8>,
        connected: bool,
        closed: bool,
    }

    #[derive(Clone, Default)]
    struct MockConn(Rc<RefCell<ConnState>>);

    impl MockConn {
        fn with_bytes(data: &[u8]) -> Self {
            let conn = Self::default();
            {
                let mut s = conn.0.borrow_mut();
                s.bytes = data.iter().copied().collect();
                s.connected = true;
            }
            conn
        }

        fn closed(&self) -> bool {
            self.0.borrow().closed
        }
    }

    impl Connection for MockConn {
        fn is_connected(&mut self) -> bool {
            let mut s = self.0.borrow_mut();
            if s.bytes.is_empty() {
                // Scripted clients hang up once their bytes are spent, so
                // sessions terminate without a running clock.
                s.connected = false;
            }
            s.connected
        }

        fn byte_available(&mut self) -> bool {
            !self.0.borrow().bytes.is_empty()
        }

        fn read_byte(&mut self) -> Option<u8> {
            self.0.borrow_mut().bytes.pop_front()
        }

        fn flush_and_close(&mut self) {
            let mut s = self.0.borrow_mut();
            s.closed = true;
            s.connected = false;
        }
    }

    #[derive(Default)]
    struct ListenerState {
        listening: bool,
        binds: Vec<(u16, bool)>,
        unbinds: usize,
        pending: VecDeque<MockConn>,
    }

    #[derive(Clone, Default)]
    struct MockListener(Rc<RefCell<ListenerState>>);

    impl Listener for MockListener {
        type Conn = MockConn;

        fn bind(&mut self, port: u16, low_latency: bool) -> bool {
            let mut s = self.0.borrow_mut();
            s.binds.push((port, low_latency));
            s.listening = true;
            true
        }

        fn unbind(&mut self) {
            let mut s = self.0.borrow_mut();
            s.unbinds += 1;
            s.listening = false;
        }

        fn is_listening(&self) -> bool {
            self.0.borrow().listening
        }

        fn try_accept(&mut self) -> Option<MockConn> {
            self.0.borrow_mut().pending.pop_front()
        }
    }

    #[derive(Clone, Default)]
    struct MockAdvertiser(Rc<RefCell<Vec<String>>>);

    impl Advertiser for MockAdvertiser {
        fn advertise(&mut self, hostname: &str) {
            self.0.borrow_mut().push(hostname.to_string());
        }
    }

    #[derive(Clone, Default)]
    struct MockStatus(Rc<RefCell<Vec<StatusSignal>>>);

    impl StatusIndicator for MockStatus {
        fn signal(&mut self, signal: StatusSignal) {
            self.0.borrow_mut().push(signal);
        }
    }

    struct Rig {
        link: MockLink,
        listener: MockListener,
        adverts: MockAdvertiser,
        status: MockStatus,
        clock: Rc<FakeClock>,
        mgr: NetManager<MockLink, MockListener, MockAdvertiser, Rc<FakeClock>>,
    }

    impl Rig {
        fn new(mode: NetMode) -> Self {
            let cfg = NetworkConfig {
                mode,
                ..NetworkConfig::default()
            };
            let link = MockLink::default();
            let listener = MockListener::default();
            let adverts = MockAdvertiser::default();
            let clock = Rc::new(FakeClock::at(0));
            let mgr = NetManager::new(
                cfg,
                link.clone(),
                listener.clone(),
                adverts.clone(),
                Rc::clone(&clock),
            );
            Self {
                link,
                listener,
                adverts,
                status: MockStatus::default(),
                clock,
                mgr,
            }
        }

        fn poll(&mut self) -> Option<Phase> {
            self.mgr.poll(&mut self.status, None)
        }

        fn signals(&self) -> Vec<StatusSignal> {
            self.status.0.borrow().clone()
        }

        fn activate(&mut self) {
            if self.mgr.config().mode == NetMode::Station {
                self.link.0.borrow_mut().rssi = -50;
                self.link.0.borrow_mut().up = true;
            }
            assert_eq!(self.poll(), Some(Phase::Connecting));
            assert_eq!(self.poll(), Some(Phase::Active));
        }
    }

    #[test]
    fn off_mode_touches_nothing() {
        let mut rig = Rig::new(NetMode::Off);
        for _ in 0..5 {
            assert_eq!(rig.poll(), None);
        }
        let link = rig.link.0.borrow();
        assert_eq!(link.configures, 0);
        assert_eq!(link.disconnects, 0);
        assert!(rig.listener.0.borrow().binds.is_empty());
        assert_eq!(rig.listener.0.borrow().unbinds, 0);
        assert!(rig.signals().is_empty());
    }

    #[test]
    fn ap_mode_reaches_active_unconditionally() {
        let mut rig = Rig::new(NetMode::AccessPoint);
        assert_eq!(rig.poll(), Some(Phase::Connecting));
        assert_eq!(rig.poll(), Some(Phase::Active));
        assert_eq!(rig.link.0.borrow().configures, 1);
        assert_eq!(rig.listener.0.borrow().binds, [(8080, true)]);
        assert_eq!(*rig.adverts.0.borrow(), ["netbridge"]);
        assert_eq!(
            rig.signals(),
            [StatusSignal::Searching, StatusSignal::Normal]
        );
    }

    #[test]
    fn station_retries_when_the_attempt_window_elapses() {
        let mut rig = Rig::new(NetMode::Station);
        assert_eq!(rig.poll(), Some(Phase::Connecting));
        rig.clock.set(9_999);
        assert_eq!(rig.poll(), Some(Phase::Connecting));
        rig.clock.set(10_000);
        assert_eq!(rig.poll(), Some(Phase::Resetting));
        // The next poll re-runs reset and re-arms the attempt.
        assert_eq!(rig.poll(), Some(Phase::Connecting));
        assert_eq!(rig.link.0.borrow().configures, 2);
        assert_eq!(
            rig.signals(),
            [StatusSignal::Searching, StatusSignal::Searching]
        );
        assert!(rig.listener.0.borrow().binds.is_empty());
    }

    #[test]
    fn station_connects_on_valid_rssi() {
        let mut rig = Rig::new(NetMode::Station);
        assert_eq!(rig.poll(), Some(Phase::Connecting));
        rig.link.0.borrow_mut().rssi = -50;
        assert_eq!(rig.poll(), Some(Phase::Active));
        assert_eq!(rig.listener.0.borrow().binds, [(8080, true)]);
    }

    #[test]
    fn station_rssi_sentinels_do_not_count_as_connected() {
        for sentinel in [RSSI_NONE, RSSI_INVALID] {
            let mut rig = Rig::new(NetMode::Station);
            assert_eq!(rig.poll(), Some(Phase::Connecting));
            rig.link.0.borrow_mut().rssi = sentinel;
            rig.clock.set(5_000);
            assert_eq!(rig.poll(), Some(Phase::Connecting));
        }
    }

    #[test]
    fn short_link_flap_is_ridden_out() {
        let mut rig = Rig::new(NetMode::Station);
        rig.activate();
        rig.clock.set(100);
        assert_eq!(rig.poll(), Some(Phase::Active));
        rig.link.0.borrow_mut().up = false;
        rig.clock.set(200);
        assert_eq!(rig.poll(), Some(Phase::Active));
        rig.clock.set(900);
        assert_eq!(rig.poll(), Some(Phase::Active));
        // The link recovers before the hold expires.
        rig.link.0.borrow_mut().up = true;
        rig.clock.set(1_500);
        assert_eq!(rig.poll(), Some(Phase::Active));
    }

    #[test]
    fn sustained_link_loss_resets() {
        let mut rig = Rig::new(NetMode::Station);
        rig.activate();
        rig.clock.set(100);
        assert_eq!(rig.poll(), Some(Phase::Active));
        rig.link.0.borrow_mut().up = false;
        rig.clock.set(200);
        assert_eq!(rig.poll(), Some(Phase::Active));
        // Hold re-armed at the last up report (t=100).
        rig.clock.set(1_100);
        assert_eq!(rig.poll(), Some(Phase::Resetting));
        assert_eq!(rig.poll(), Some(Phase::Connecting));
    }

    #[test]
    fn ap_mode_ignores_the_gate() {
        let mut rig = Rig::new(NetMode::AccessPoint);
        rig.activate();
        rig.link.0.borrow_mut().up = false;
        rig.clock.set(60_000);
        assert_eq!(rig.poll(), Some(Phase::Active));
    }

    #[test]
    fn listener_fault_rebinds_without_phase_change() {
        let mut rig = Rig::new(NetMode::AccessPoint);
        rig.activate();
        let (unbinds_before, binds_before) = {
            let s = rig.listener.0.borrow();
            (s.unbinds, s.binds.len())
        };
        rig.listener.0.borrow_mut().listening = false;
        rig.listener
            .0
            .borrow_mut()
            .pending
            .push_back(MockConn::with_bytes(b"\n\n"));

        assert_eq!(rig.poll(), Some(Phase::Active));
        {
            let s = rig.listener.0.borrow();
            assert_eq!(s.unbinds, unbinds_before + 1);
            assert_eq!(s.binds.len(), binds_before + 1);
            // No accept on the rebind step.
            assert_eq!(s.pending.len(), 1);
        }
        assert_eq!(rig.signals().last(), Some(&StatusSignal::Fault));
        assert_eq!(
            rig.signals()
                .iter()
                .filter(|s| **s == StatusSignal::Fault)
                .count(),
            1
        );

        // Recovered: the pending client is served on the next poll.
        assert_eq!(rig.poll(), Some(Phase::Active));
        assert!(rig.listener.0.borrow().pending.is_empty());
    }

    #[test]
    fn accepted_client_is_framed_and_handed_off() {
        let mut rig = Rig::new(NetMode::AccessPoint);
        rig.activate();
        let conn = MockConn::with_bytes(b"GET / \r\nHost: x\r\n\r\n");
        rig.listener.0.borrow_mut().pending.push_back(conn.clone());

        let headers = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&headers);
        let mut handoff = move |_: &mut MockConn, header: &str| {
            sink.borrow_mut().push(header.to_string());
        };
        let mut status = MockStatus::default();
        rig.mgr.poll(&mut status, Some(&mut handoff));

        assert_eq!(*headers.borrow(), ["GET / \nHost: x\n\n"]);
        assert!(conn.closed());
    }

    #[test]
    fn one_session_per_poll() {
        let mut rig = Rig::new(NetMode::AccessPoint);
        rig.activate();
        let first = MockConn::with_bytes(b"a\n\n");
        let second = MockConn::with_bytes(b"b\n\n");
        {
            let mut s = rig.listener.0.borrow_mut();
            s.pending.push_back(first.clone());
            s.pending.push_back(second.clone());
        }
        rig.poll();
        assert!(first.closed());
        assert!(!second.closed());
        rig.poll();
        assert!(second.closed());
    }

    #[test]
    fn mode_switch_requires_begin() {
        let mut rig = Rig::new(NetMode::AccessPoint);
        rig.activate();
        let mut cfg = NetworkConfig::default();
        cfg.mode = NetMode::Station;
        rig.mgr.begin(cfg);

        assert_eq!(rig.mgr.phase(), Phase::Resetting);
        assert!(!rig.listener.0.borrow().listening);
        assert!(rig.link.0.borrow().disconnects >= 1);

        assert_eq!(rig.poll(), Some(Phase::Connecting));
        assert_eq!(rig.link.0.borrow().last_mode, Some(NetMode::Station));
    }

    #[test]
    fn end_releases_link_and_listener() {
        let mut rig = Rig::new(NetMode::AccessPoint);
        rig.activate();
        let disconnects = rig.link.0.borrow().disconnects;
        rig.mgr.end();
        assert_eq!(rig.mgr.phase(), Phase::Resetting);
        assert!(!rig.listener.0.borrow().listening);
        assert_eq!(rig.link.0.borrow().disconnects, disconnects + 1);
        rig.mgr.log_status();
    }
}
