//! Process-wide counters for sessions, accounts and the relay.
//!
//! Counters are plain relaxed atomics; they are read for the shutdown summary
//! and by the `status` command, never used for control flow.
use std::sync::atomic::{AtomicU64, Ordering};

static SESSIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_ACTIVE: AtomicU64 = AtomicU64::new(0);
static LOGINS_OK: AtomicU64 = AtomicU64::new(0);
static LOGINS_FAILED: AtomicU64 = AtomicU64::new(0);
static REGISTRATIONS: AtomicU64 = AtomicU64::new(0);
static MESSAGES_POSTED: AtomicU64 = AtomicU64::new(0);
static RELAY_RECEIVED: AtomicU64 = AtomicU64::new(0);
static RELAY_DROPPED: AtomicU64 = AtomicU64::new(0);
static RELAY_LOGGED: AtomicU64 = AtomicU64::new(0);
static RELAY_SENT: AtomicU64 = AtomicU64::new(0);

pub fn session_opened() {
    SESSIONS_OPENED.fetch_add(1, Ordering::Relaxed);
    SESSIONS_ACTIVE.fetch_add(1, Ordering::Relaxed);
}

pub fn session_closed() {
    // Saturating: a close without a matching open must not wrap.
    let _ = SESSIONS_ACTIVE.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(1))
    });
}

pub fn inc_login_ok() {
    LOGINS_OK.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_login_failed() {
    LOGINS_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_registration() {
    REGISTRATIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_message_posted() {
    MESSAGES_POSTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_relay_received() {
    RELAY_RECEIVED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_relay_dropped() {
    RELAY_DROPPED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_relay_logged() {
    RELAY_LOGGED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_relay_sent() {
    RELAY_SENT.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub sessions_opened: u64,
    pub sessions_active: u64,
    pub logins_ok: u64,
    pub logins_failed: u64,
    pub registrations: u64,
    pub messages_posted: u64,
    pub relay_received: u64,
    pub relay_dropped: u64,
    pub relay_logged: u64,
    pub relay_sent: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        sessions_opened: SESSIONS_OPENED.load(Ordering::Relaxed),
        sessions_active: SESSIONS_ACTIVE.load(Ordering::Relaxed),
        logins_ok: LOGINS_OK.load(Ordering::Relaxed),
        logins_failed: LOGINS_FAILED.load(Ordering::Relaxed),
        registrations: REGISTRATIONS.load(Ordering::Relaxed),
        messages_posted: MESSAGES_POSTED.load(Ordering::Relaxed),
        relay_received: RELAY_RECEIVED.load(Ordering::Relaxed),
        relay_dropped: RELAY_DROPPED.load(Ordering::Relaxed),
        relay_logged: RELAY_LOGGED.load(Ordering::Relaxed),
        relay_sent: RELAY_SENT.load(Ordering::Relaxed),
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sessions={}/{} logins={}ok/{}failed registrations={} posts={} relay rx={} dropped={} logged={} tx={}",
            self.sessions_active,
            self.sessions_opened,
            self.logins_ok,
            self.logins_failed,
            self.registrations,
            self.messages_posted,
            self.relay_received,
            self.relay_dropped,
            self.relay_logged,
            self.relay_sent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are global, so assertions compare deltas rather than absolutes.
    #[test]
    fn counters_move_forward() {
        let before = snapshot();
        inc_relay_dropped();
        inc_relay_dropped();
        inc_login_failed();
        let after = snapshot();
        assert!(after.relay_dropped >= before.relay_dropped + 2);
        assert!(after.logins_failed > before.logins_failed);
    }

    #[test]
    fn active_sessions_never_wrap() {
        session_closed();
        session_closed();
        assert!(snapshot().sessions_active < u64::MAX / 2);
    }
}
