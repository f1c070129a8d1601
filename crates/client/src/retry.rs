//! Bounded retry bookkeeping for one client operation.

use corelib::error::Error;
use corelib::node::Member;

/// Tracks the attempts of one operation against its budget.
#[derive(Debug)]
pub struct RetryState {
    budget: u32,
    attempts: u32,
    /// Targets that failed at the connection level.
    failed: Vec<Member>,
    /// Targets whose failure leaves a write's outcome unknown.
    ambiguous: Vec<Member>,
    last_error: Option<Error>,
}

impl RetryState {
    pub fn new(budget: u32) -> Self {
        Self {
            budget,
            attempts: 0,
            failed: Vec::new(),
            ambiguous: Vec::new(),
            last_error: None,
        }
    }

    /// Claim the next attempt; false once the budget is spent.
    pub fn begin_attempt(&mut self) -> bool {
        if self.attempts >= self.budget {
            return false;
        }
        self.attempts += 1;
        true
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn record(&mut self, target: &Member, error: Error) {
        if error.is_connection_failure() && !self.failed.contains(target) {
            self.failed.push(target.clone());
        }
        if error.is_ambiguous() && !self.ambiguous.contains(target) {
            self.ambiguous.push(target.clone());
        }
        self.last_error = Some(error);
    }

    pub fn has_failed(&self, target: &Member) -> bool {
        self.failed.contains(target)
    }

    /// A write must not be re-sent where it may already have been applied.
    pub fn excludes(&self, target: &Member, write: bool) -> bool {
        write && self.ambiguous.contains(target)
    }

    /// The error reported once no attempt or candidate is left.
    ///
    /// Only an application failure is passed through; routing failures all
    /// end as unavailability.
    pub fn into_error(self) -> Error {
        match self.last_error {
            Some(e @ Error::Remote(_)) => e,
            _ => Error::AllServersUnavailable { attempts: self.attempts },
        }
    }
}
