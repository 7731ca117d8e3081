//! Port allocator: bind-probe-retry with a bounded forward scan.
//!
//! The teacher crate only ever binds one fixed SOCKS/control pair, so there is no
//! direct counterpart here — this generalizes the same "probe by binding" idiom into
//! a bounded scan that also tracks ports handed out earlier in the same session.

use std::collections::HashMap;
use std::net::TcpListener;

use crate::error::ConfigError;

/// Which role a reserved port is being allocated for. Recorded alongside each
/// claim so a caller can later ask what a given port was reserved for (e.g. when
/// reporting a conflict), per SPEC_FULL.md §4.3's `reserve(requested, role)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRole {
    Socks,
    Control,
    HiddenServiceTarget,
}

/// Tracks ports already handed out in this run, and the role each was claimed
/// for, so the allocator never reuses one even across roles.
#[derive(Debug, Default)]
pub struct PortAllocator {
    claimed: HashMap<u16, PortRole>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `requested` to a usable, currently-bindable port for `role`.
    ///
    /// If `collision_resolve` is false the requested port is returned unchecked (the
    /// caller accepts failure at bind time). Otherwise this probes `127.0.0.1:port`
    /// by binding a short-lived listener, scanning forward on failure up to
    /// `max_attempts` tries, and skipping any port already claimed this session
    /// regardless of which role claimed it.
    pub fn reserve(
        &mut self,
        requested: u16,
        role: PortRole,
        collision_resolve: bool,
        max_attempts: u32,
    ) -> Result<u16, ConfigError> {
        if !collision_resolve {
            self.claimed.insert(requested, role);
            return Ok(requested);
        }

        let mut candidate = requested;
        for attempt in 0..max_attempts {
            if !self.claimed.contains_key(&candidate) && Self::is_bindable(candidate) {
                self.claimed.insert(candidate, role);
                return Ok(candidate);
            }
            candidate = match candidate.checked_add(1) {
                Some(next) => next,
                None => break,
            };
            let _ = attempt;
        }

        Err(ConfigError::PortResolveExhausted {
            requested,
            attempts: max_attempts,
        })
    }

    /// Mark a port as claimed for `role` without probing it, e.g. when adopting a
    /// port already present in a parsed torrc.
    pub fn mark_claimed(&mut self, port: u16, role: PortRole) {
        self.claimed.insert(port, role);
    }

    /// The role `port` was claimed under this session, if any.
    pub fn role_of(&self, port: u16) -> Option<PortRole> {
        self.claimed.get(&port).copied()
    }

    fn is_bindable(port: u16) -> bool {
        TcpListener::bind(("127.0.0.1", port)).is_ok()
    }
}
