// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Suspension controller.
//!
//! ```text
//!   Active --(about-to-unload)--> Holding
//!   Holding --(ready)-----------> Active     (queue drained FIFO)
//!   Active | Holding --(destroyed)--> Destroyed   (terminal)
//! ```
//!
//! While holding, every outbound operation is queued instead of reaching the
//! transport. The controller is generic over the queued operation so it can
//! be exercised without a transport.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Active,
    Holding,
    Destroyed,
}

/// Outcome of offering an operation to the controller.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission<T> {
    /// Transport is usable; perform the operation now.
    Proceed(T),
    /// Buffered until the next `ready`.
    Queued,
    /// Transport is destroyed; the operation is handed back.
    Rejected(T),
}

#[derive(Debug)]
pub struct Suspension<T> {
    phase: Phase,
    queue: VecDeque<T>,
}

impl<T> Default for Suspension<T> {
    fn default() -> Self {
        Self {
            phase: Phase::Active,
            queue: VecDeque::new(),
        }
    }
}

impl<T> Suspension<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn admit(&mut self, op: T) -> Admission<T> {
        match self.phase {
            Phase::Active => Admission::Proceed(op),
            Phase::Holding => {
                self.queue.push_back(op);
                Admission::Queued
            }
            Phase::Destroyed => Admission::Rejected(op),
        }
    }

    /// `about-to-unload`. Returns true if this started a hold.
    pub fn hold(&mut self) -> bool {
        if self.phase == Phase::Active {
            self.phase = Phase::Holding;
            true
        } else {
            false
        }
    }

    /// `ready`. Returns the buffered operations in submission order, or
    /// `None` if nothing was being held.
    pub fn release(&mut self) -> Option<Vec<T>> {
        if self.phase != Phase::Holding {
            return None;
        }
        self.phase = Phase::Active;
        Some(self.queue.drain(..).collect())
    }

    /// `destroyed`. Returns whatever was still buffered, or `None` if the
    /// controller was already destroyed.
    pub fn destroy(&mut self) -> Option<Vec<T>> {
        if self.phase == Phase::Destroyed {
            return None;
        }
        self.phase = Phase::Destroyed;
        Some(self.queue.drain(..).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_passes_through() {
        let mut s = Suspension::new();
        assert_eq!(s.admit(1), Admission::Proceed(1));
        assert_eq!(s.queued(), 0);
    }

    #[test]
    fn holding_buffers_in_order() {
        let mut s = Suspension::new();
        assert!(s.hold());
        assert!(!s.hold());
        assert_eq!(s.admit(1), Admission::Queued);
        assert_eq!(s.admit(2), Admission::Queued);
        assert_eq!(s.admit(3), Admission::Queued);
        assert_eq!(s.phase(), Phase::Holding);

        assert_eq!(s.release(), Some(vec![1, 2, 3]));
        assert_eq!(s.phase(), Phase::Active);
        assert_eq!(s.admit(4), Admission::Proceed(4));
    }

    #[test]
    fn ready_without_hold_is_noop() {
        let mut s: Suspension<u8> = Suspension::new();
        assert_eq!(s.release(), None);
        assert_eq!(s.phase(), Phase::Active);
    }

    #[test]
    fn destroy_is_terminal() {
        let mut s = Suspension::new();
        s.hold();
        s.admit("queued");
        assert_eq!(s.destroy(), Some(vec!["queued"]));
        assert_eq!(s.destroy(), None);

        assert!(!s.hold());
        assert_eq!(s.release(), None);
        assert_eq!(s.admit("late"), Admission::Rejected("late"));
        assert_eq!(s.phase(), Phase::Destroyed);
    }
}
