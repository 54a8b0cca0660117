//! Display-refresh scheduling.
//!
//! The host owns the clock. The session asks for "one callback at the next
//! refresh" and gets a ticket back; the host later calls
//! [`crate::Session::on_frame`] with that ticket. Cancelling is best-effort on
//! the host side, so the session also ignores any ticket that is no longer
//! the pending one.

use std::{cell::RefCell, fmt, rc::Rc};

/// Token for one scheduled frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameTicket(pub u64);

impl fmt::Display for FrameTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub trait FrameScheduler {
    /// Schedules one callback at the next display refresh.
    fn request_frame(&mut self) -> FrameTicket;
    /// Withdraws a callback that has not fired yet.
    fn cancel_frame(&mut self, ticket: FrameTicket);
}

#[derive(Debug, Default)]
struct ManualState {
    next: u64,
    pending: Option<FrameTicket>,
    requests: u64,
    cancels: u64,
}

/// Scheduler driven by hand, for headless hosts and tests.
///
/// Clones share state: keep one handle, give another to the session, then
/// call [`ManualScheduler::take_pending`] to learn which ticket to fire.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    state: Rc<RefCell<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the outstanding ticket, as if the refresh fired.
    pub fn take_pending(&self) -> Option<FrameTicket> {
        self.state.borrow_mut().pending.take()
    }

    pub fn pending(&self) -> Option<FrameTicket> {
        self.state.borrow().pending
    }

    pub fn requests(&self) -> u64 {
        self.state.borrow().requests
    }

    pub fn cancels(&self) -> u64 {
        self.state.borrow().cancels
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&mut self) -> FrameTicket {
        let mut state = self.state.borrow_mut();
        state.next += 1;
        state.requests += 1;
        let ticket = FrameTicket(state.next);
        state.pending = Some(ticket);
        ticket
    }

    fn cancel_frame(&mut self, ticket: FrameTicket) {
        let mut state = self.state.borrow_mut();
        state.cancels += 1;
        if state.pending == Some(ticket) {
            state.pending = None;
        }
    }
}
