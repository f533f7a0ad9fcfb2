//! Control session state machine
//!
//! Tracks one control connection from accept to close.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Control session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// TCP connected, request head not read yet
    Connected,
    /// Upgrade request received, 101 being sent
    Handshaking,
    /// Greeting sent, events flowing
    Open,
    /// Close requested by either side
    Closing,
    /// Socket released
    Closed,
}

/// Complete control session state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Envelope session id handed to the client
    pub sid: Option<String>,

    /// Connection start time
    pub connected_at: Instant,

    /// Time the greeting was sent
    pub opened_at: Option<Instant>,

    /// Time of the last inbound frame
    pub last_seen: Instant,

    /// Text frames received
    pub frames_received: u64,

    /// Events dispatched to the handler
    pub events_dispatched: u64,

    /// Pings answered
    pub pings: u64,
}

impl SessionState {
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Connected,
            sid: None,
            connected_at: now,
            opened_at: None,
            last_seen: now,
            frames_received: 0,
            events_dispatched: 0,
            pings: 0,
        }
    }

    /// Upgrade request accepted
    pub fn start_handshake(&mut self) {
        if self.phase == SessionPhase::Connected {
            self.phase = SessionPhase::Handshaking;
        }
    }

    /// Greeting sent under `sid`
    pub fn open(&mut self, sid: String) {
        if self.phase == SessionPhase::Handshaking {
            self.phase = SessionPhase::Open;
            self.sid = Some(sid);
            self.opened_at = Some(Instant::now());
        }
    }

    /// Record an inbound frame
    pub fn on_frame(&mut self) {
        self.frames_received += 1;
        self.last_seen = Instant::now();
    }

    pub fn on_event(&mut self) {
        self.events_dispatched += 1;
    }

    pub fn on_ping(&mut self) {
        self.pings += 1;
    }

    /// Time since the last inbound frame
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }

    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn is_open(&self) -> bool {
        self.phase == SessionPhase::Open
    }

    pub fn close(&mut self) {
        if self.phase != SessionPhase::Closed {
            self.phase = SessionPhase::Closing;
        }
    }

    pub fn finish(&mut self) {
        self.phase = SessionPhase::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3001)
    }

    #[test]
    fn test_session_lifecycle() {
        let mut state = SessionState::new(1, addr());
        assert_eq!(state.phase, SessionPhase::Connected);

        state.start_handshake();
        assert_eq!(state.phase, SessionPhase::Handshaking);

        state.open("abc".into());
        assert_eq!(state.phase, SessionPhase::Open);
        assert!(state.is_open());
        assert_eq!(state.sid.as_deref(), Some("abc"));
        assert!(state.opened_at.is_some());

        state.close();
        assert_eq!(state.phase, SessionPhase::Closing);
        state.finish();
        assert_eq!(state.phase, SessionPhase::Closed);
        state.close();
        assert_eq!(state.phase, SessionPhase::Closed);
    }

    #[test]
    fn test_open_requires_handshake() {
        let mut state = SessionState::new(1, addr());
        state.open("abc".into());
        assert_eq!(state.phase, SessionPhase::Connected);
        assert!(state.sid.is_none());
    }

    #[test]
    fn test_counters() {
        let mut state = SessionState::new(2, addr());
        state.on_frame();
        state.on_frame();
        state.on_event();
        state.on_ping();
        assert_eq!(state.frames_received, 2);
        assert_eq!(state.events_dispatched, 1);
        assert_eq!(state.pings, 1);
        assert!(state.idle_for() <= state.duration());
    }
}
