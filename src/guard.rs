//! Advisory mutation lock for the engine instance.
//!
//! Exactly one state-mutating operation may be in flight at a time. The
//! external collaborators invoked mid-operation are untrusted and may call
//! back into the engine; a nested mutating call finds the lock held and
//! fails fast instead of interleaving. Read-only operations never take the
//! lock.

use std::cell::Cell;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationPhase {
    Idle,
    Mutating,
}

#[derive(Debug, PartialEq, Eq)]
pub enum GuardError {
    AlreadyMutating,
}

/// Holds the engine's mutation lock for the duration of one operation.
/// The lock is released when the guard goes out of scope, success or failure.
#[must_use]
#[derive(Debug)]
pub struct MutationGuard<'a> {
    phase: &'a Cell<OperationPhase>,
}

impl<'a> MutationGuard<'a> {
    pub fn new(phase: &'a Cell<OperationPhase>) -> Result<Self, GuardError> {
        if phase.get() == OperationPhase::Mutating {
            return Err(GuardError::AlreadyMutating);
        }
        phase.set(OperationPhase::Mutating);
        Ok(Self { phase })
    }
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        self.phase.set(OperationPhase::Idle);
    }
}
